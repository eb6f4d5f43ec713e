//! Institutions known to the identity broker.

pub mod store;
pub mod types;

pub use store::{InstitutionDirectory, InstitutionStore};
pub use types::Institution;
