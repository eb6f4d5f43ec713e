//! Institution SSO configuration.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::assertion::decoder::parse_encryption_key;
use crate::assertion::AssertionKeys;

/// Institution SSO configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsoConfig {
    /// Shared JWE secret (32 raw bytes or base64).
    #[serde(default)]
    pub jwe_secret: Option<String>,

    /// Shared HS256 signing secret.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Public domain used in mail links.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Support address shown in the welcome mail.
    #[serde(default = "default_support_email")]
    pub support_email: String,

    /// Directory holding the redb databases.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Fixed active feature flags. When unset, the flag store is used.
    #[serde(default)]
    pub static_flags: Option<Vec<String>>,
}

fn default_domain() -> String {
    "http://localhost:5000/".to_string()
}

fn default_support_email() -> String {
    "support@localhost".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/institution-sso")
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            jwe_secret: None,
            jwt_secret: None,
            domain: default_domain(),
            support_email: default_support_email(),
            data_dir: default_data_dir(),
            max_body_bytes: default_max_body_bytes(),
            static_flags: None,
        }
    }
}

impl SsoConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let jwe_secret = self
            .jwe_secret
            .as_deref()
            .ok_or_else(|| "JWE secret is required".to_string())?;
        parse_encryption_key(jwe_secret).map_err(|e| e.to_string())?;

        match self.jwt_secret.as_deref() {
            Some(s) if !s.is_empty() => {}
            _ => return Err("JWT secret is required".to_string()),
        }

        if self.max_body_bytes == 0 {
            return Err("max_body_bytes must be positive".to_string());
        }

        Ok(())
    }

    /// Build the broker keys.
    pub fn assertion_keys(&self) -> Result<AssertionKeys> {
        self.validate().map_err(|e| anyhow!(e))?;
        AssertionKeys::from_secrets(
            self.jwe_secret.as_deref().unwrap_or_default(),
            self.jwt_secret.as_deref().unwrap_or_default(),
        )
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.data_dir.join("accounts.redb")
    }

    pub fn institutions_path(&self) -> PathBuf {
        self.data_dir.join("institutions.redb")
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("mail_outbox.redb")
    }

    pub fn flags_path(&self) -> PathBuf {
        self.data_dir.join("flags.redb")
    }
}

/// JSON configuration file, applied over command line settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SsoConfigJson {
    pub jwe_secret: Option<String>,
    pub jwt_secret: Option<String>,
    pub domain: Option<String>,
    pub support_email: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    pub static_flags: Option<Vec<String>>,
}

impl SsoConfigJson {
    /// Apply JSON config to existing config.
    pub fn apply_to(&self, config: &mut SsoConfig) {
        if let Some(ref secret) = self.jwe_secret {
            config.jwe_secret = Some(secret.clone());
        }
        if let Some(ref secret) = self.jwt_secret {
            config.jwt_secret = Some(secret.clone());
        }
        if let Some(ref domain) = self.domain {
            config.domain = domain.clone();
        }
        if let Some(ref email) = self.support_email {
            config.support_email = email.clone();
        }
        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(max) = self.max_body_bytes {
            config.max_body_bytes = max;
        }
        if let Some(ref flags) = self.static_flags {
            config.static_flags = Some(flags.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SsoConfig::default();
        assert_eq!(config.max_body_bytes, 65536);
        assert!(config.static_flags.is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = SsoConfig::default();
        assert!(config.validate().is_err()); // missing secrets

        config.jwe_secret = Some("short".to_string());
        config.jwt_secret = Some("signing".to_string());
        assert!(config.validate().is_err()); // bad key length

        config.jwe_secret = Some("0123456789abcdef0123456789abcdef".to_string());
        assert!(config.validate().is_ok());
        assert!(config.assertion_keys().is_ok());

        config.jwt_secret = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_apply() {
        let mut config = SsoConfig::default();
        let json: SsoConfigJson = serde_json::from_str(
            r#"{
                "jwe-secret": "0123456789abcdef0123456789abcdef",
                "jwt-secret": "signing",
                "support-email": "help@example.org",
                "data-dir": "/tmp/sso",
                "static-flags": ["storage_i18n"]
            }"#,
        )
        .unwrap();

        json.apply_to(&mut config);

        assert!(config.validate().is_ok());
        assert_eq!(config.support_email, "help@example.org");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/sso"));
        assert_eq!(config.static_flags, Some(vec!["storage_i18n".to_string()]));
        assert_eq!(config.max_body_bytes, 65536); // unchanged
        assert_eq!(config.accounts_path(), PathBuf::from("/tmp/sso/accounts.redb"));
    }
}
