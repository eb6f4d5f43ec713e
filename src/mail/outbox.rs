//! Mail outbox backed by redb.
//!
//! Messages are spooled here and picked up by an external delivery worker,
//! which acknowledges each one after sending.

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use tracing::{info, warn};

use super::types::{MailTemplate, OutboundMail};
use super::Mailer;

/// Outbox table: mail id -> MessagePack<OutboundMail>.
const OUTBOX_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mail_outbox");

/// Persistent queue of outbound mail.
pub struct MailOutbox {
    db: Database,
}

impl MailOutbox {
    /// Open or create an outbox at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open mail outbox: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(OUTBOX_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Queue a message.
    pub fn enqueue(&self, mail: &OutboundMail) -> Result<()> {
        let data = rmp_serde::to_vec_named(mail).context("Failed to serialize mail")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            table.insert(mail.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Queued messages, oldest first.
    pub fn pending(&self) -> Result<Vec<OutboundMail>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;

        let mut mails = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            match rmp_serde::from_slice::<OutboundMail>(value.value()) {
                Ok(mail) => mails.push(mail),
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize queued mail, skipping");
                }
            }
        }
        mails.sort_by_key(|m| m.queued_at);
        Ok(mails)
    }

    /// Remove a delivered message. Returns `false` if it was not queued.
    pub fn acknowledge(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(OUTBOX_TABLE)?;
            let removed = table.remove(id)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OUTBOX_TABLE)?;
        Ok(table.len()? as usize)
    }
}

impl Mailer for MailOutbox {
    fn send(
        &self,
        to: &str,
        template: MailTemplate,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let mail = OutboundMail::new(to, template, context);
        self.enqueue(&mail)?;
        info!(mail_id = %mail.id, to = %to, template = %template, "Queued mail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_send_queues_mail() {
        let dir = tempdir().unwrap();
        let outbox = MailOutbox::open(dir.path().join("outbox.redb")).unwrap();

        let mut context = serde_json::Map::new();
        context.insert("fullname".to_string(), serde_json::json!("Jane Doe"));
        context.insert("storage_flag_is_active".to_string(), serde_json::json!(true));
        outbox
            .send("jdoe@example.edu", MailTemplate::InstitutionWelcome, context)
            .unwrap();

        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].to, "jdoe@example.edu");
        assert_eq!(pending[0].template, MailTemplate::InstitutionWelcome);
        assert_eq!(pending[0].subject, "Welcome to the research platform");
        assert_eq!(pending[0].context["fullname"], "Jane Doe");
        assert_eq!(pending[0].context["storage_flag_is_active"], true);
    }

    #[test]
    fn test_acknowledge_removes_mail() {
        let dir = tempdir().unwrap();
        let outbox = MailOutbox::open(dir.path().join("outbox.redb")).unwrap();

        let mail = OutboundMail::new(
            "a@example.edu",
            MailTemplate::InstitutionWelcome,
            serde_json::Map::new(),
        );
        outbox.enqueue(&mail).unwrap();
        assert_eq!(outbox.count().unwrap(), 1);

        assert!(outbox.acknowledge(&mail.id).unwrap());
        assert!(!outbox.acknowledge(&mail.id).unwrap());
        assert_eq!(outbox.count().unwrap(), 0);
    }
}
