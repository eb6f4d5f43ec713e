//! Bulk mail to every active account.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use super::{MailTemplate, Mailer};
use crate::account::{classify_status, Account, AccountStatus};

/// Counts from one bulk send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub eligible: usize,
    pub sent: usize,
    pub dry_run: bool,
}

/// Registered, confirmed, enabled and unmerged accounts. A dry run reaches
/// superusers only.
pub fn is_recipient(account: &Account, dry_run: bool) -> bool {
    classify_status(account) == AccountStatus::Active && (!dry_run || account.is_superuser)
}

/// Send `template` to every recipient in `accounts`, in order.
///
/// Stops at the first failed send.
pub fn email_all_users(
    accounts: &[Account],
    mailer: &dyn Mailer,
    template: MailTemplate,
    dry_run: bool,
) -> Result<BroadcastReport> {
    let recipients: Vec<&Account> = accounts
        .iter()
        .filter(|account| is_recipient(account, dry_run))
        .collect();

    let mut report = BroadcastReport {
        eligible: recipients.len(),
        sent: 0,
        dry_run,
    };
    info!(template = %template, eligible = report.eligible, dry_run, "Starting bulk mail");

    for account in recipients {
        let mut context = serde_json::Map::new();
        context.insert("fullname".to_string(), account.fullname.clone().into());
        mailer
            .send(&account.username, template, context)
            .with_context(|| format!("Failed to send {} to {}", template, account.username))?;
        report.sent += 1;
    }

    info!(sent = report.sent, eligible = report.eligible, "Bulk mail queued");
    Ok(report)
}
