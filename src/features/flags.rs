//! Declared feature flags and switches.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Localized storage-region copy in the welcome mail.
pub const STORAGE_I18N: &str = "storage_i18n";
/// Storage usage limits on projects.
pub const STORAGE_USAGE_LIMITS: &str = "storage_usage_limits";

/// Flags: per-request features.
pub const DECLARED_FLAGS: &[&str] = &[STORAGE_I18N, STORAGE_USAGE_LIMITS];

/// Switches: global on/off features.
pub const DECLARED_SWITCHES: &[&str] = &[
    "disable_registration",
    "enable_inactive_schemas",
    "osf_preregistration",
];

/// Feature lookup passed into components.
pub trait FeatureFlags: Send + Sync {
    fn is_active(&self, name: &str) -> bool;
}

/// Kind of feature toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    Flag,
    Switch,
}

impl std::fmt::Display for FlagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagKind::Flag => write!(f, "flag"),
            FlagKind::Switch => write!(f, "switch"),
        }
    }
}

/// Fixed set of active features, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticFlags {
    active: HashSet<String>,
}

impl StaticFlags {
    pub fn new<I, S>(active: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active: active.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeatureFlags for StaticFlags {
    fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_flags() {
        let flags = StaticFlags::new([STORAGE_I18N]);
        assert!(flags.is_active(STORAGE_I18N));
        assert!(!flags.is_active(STORAGE_USAGE_LIMITS));
        assert!(!StaticFlags::default().is_active(STORAGE_I18N));
    }
}
