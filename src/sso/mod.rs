//! Institution single sign-on.
//!
//! Configuration, the authenticator and its result types.

pub mod authenticator;
pub mod config;
pub mod outcome;

pub use authenticator::{InstitutionAuthenticator, MailSettings, SsoServices};
pub use config::{SsoConfig, SsoConfigJson};
pub use outcome::{AuthenticationFailed, FailureKind, SsoOutcome};
