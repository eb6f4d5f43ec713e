//! Broker payload shapes and the normalized inbound assertion.

use serde::{Deserialize, Serialize};

/// Claims of the signed token issued by the identity broker.
///
/// `data` is itself a JSON document encoded as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerClaims {
    pub data: String,
}

/// Decoded `data` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPayload {
    pub provider: ProviderInfo,
}

/// Identity provider section of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Upstream IdP identifier (informational).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
    /// Institution identifier.
    pub id: String,
    pub user: ProviderUser,
}

/// User attributes released by the IdP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

/// Normalized assertion for one SSO request. Empty strings are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAssertion {
    pub institution_id: String,
    pub username: String,
    pub fullname: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub middle_names: Option<String>,
    pub suffix: Option<String>,
}

impl InboundAssertion {
    /// Full name from the payload, or `given + " " + family` when both exist.
    pub fn derived_fullname(&self) -> Option<String> {
        if let Some(ref fullname) = self.fullname {
            return Some(fullname.clone());
        }
        match (&self.given_name, &self.family_name) {
            (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
            _ => None,
        }
    }
}

/// Treat blank attribute values as absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
