//! Institution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An institution that can log users in through the identity broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    /// Identifier the broker sends as `provider.id`.
    pub id: String,
    pub name: String,
    /// Email domains associated with the institution.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Institution {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domains: Vec::new(),
            is_deleted: false,
            created_at: Utc::now(),
        }
    }
}
