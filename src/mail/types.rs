//! Mail templates and queued messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Templates the agent can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MailTemplate {
    /// Sent once when an account is created, claimed or confirmed through
    /// institution SSO.
    InstitutionWelcome,
    /// Terms of use change announcement, sent to every active account.
    #[serde(rename = "tou_notif")]
    #[value(name = "tou_notif")]
    TouNotif,
}

impl MailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            MailTemplate::InstitutionWelcome => "institution_welcome",
            MailTemplate::TouNotif => "tou_notif",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            MailTemplate::InstitutionWelcome => "Welcome to the research platform",
            MailTemplate::TouNotif => "Updated Terms of Use",
        }
    }
}

impl std::fmt::Display for MailTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A templated message waiting for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMail {
    pub id: String,
    pub to: String,
    pub template: MailTemplate,
    #[serde(default)]
    pub subject: String,
    /// Template variables.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub queued_at: DateTime<Utc>,
}

impl OutboundMail {
    pub fn new(
        to: &str,
        template: MailTemplate,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            to: to.to_string(),
            template,
            subject: template.subject().to_string(),
            context,
            queued_at: Utc::now(),
        }
    }
}
