//! Identity broker assertions.
//!
//! The broker signs a JSON payload as an HS256 JWT and wraps it in a compact
//! JWE (`dir` / `A256GCM`). This module undoes both layers.

pub mod decoder;
pub mod jwe;
pub mod types;

pub use decoder::{AssertionDecoder, AssertionKeys};
pub use types::{BrokerPayload, InboundAssertion, ProviderInfo, ProviderUser};
