//! Results of an institution SSO attempt.

use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountStatus};

/// Why an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Decryption, signature or payload shape failure.
    TokenInvalid,
    UnknownInstitution,
    MissingFullName,
    /// Storage failure while reconciling the account.
    Internal,
}

/// Rejected authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationFailed {
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthenticationFailed {
    pub fn token_invalid() -> Self {
        Self {
            kind: FailureKind::TokenInvalid,
            message: None,
        }
    }

    pub fn unknown_institution(id: &str) -> Self {
        Self {
            kind: FailureKind::UnknownInstitution,
            message: Some(format!("Invalid institution id: \"{}\"", id)),
        }
    }

    pub fn missing_fullname(message: String) -> Self {
        Self {
            kind: FailureKind::MissingFullName,
            message: Some(message),
        }
    }

    pub fn internal() -> Self {
        Self {
            kind: FailureKind::Internal,
            message: Some("Internal error".to_string()),
        }
    }
}

impl std::fmt::Display for AuthenticationFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message {
            Some(ref message) => write!(f, "{}", message),
            None => write!(f, "Incorrect authentication credentials."),
        }
    }
}

impl std::error::Error for AuthenticationFailed {}

/// Outcome of an attempt that was not rejected.
#[derive(Debug, Clone)]
pub enum SsoOutcome {
    Authenticated(Account),
    /// Silently not authenticated: the account needs manual remediation.
    Declined(AccountStatus),
}

impl SsoOutcome {
    #[allow(dead_code)]
    pub fn account(&self) -> Option<&Account> {
        match self {
            SsoOutcome::Authenticated(account) => Some(account),
            SsoOutcome::Declined(_) => None,
        }
    }
}
