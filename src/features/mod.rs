//! Feature flags and switches.
//!
//! Components receive an `Arc<dyn FeatureFlags>` instead of consulting a
//! process-wide registry.

pub mod flags;
pub mod store;

pub use flags::{
    FeatureFlags, FlagKind, StaticFlags, DECLARED_FLAGS, DECLARED_SWITCHES, STORAGE_I18N,
};
pub use store::FlagStore;
