//! Templated mail.
//!
//! The agent never delivers mail itself; it hands messages to a [`Mailer`].

pub mod broadcast;
pub mod outbox;
pub mod types;

use anyhow::Result;

pub use broadcast::{email_all_users, BroadcastReport};
pub use outbox::MailOutbox;
pub use types::MailTemplate;

/// Sends a templated email.
pub trait Mailer: Send + Sync {
    fn send(
        &self,
        to: &str,
        template: MailTemplate,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;
}
