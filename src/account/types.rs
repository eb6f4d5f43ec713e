//! Local account model and status classification.

use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::names::impute_names;

/// Pending claim for an account added as an unregistered contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnclaimedRecord {
    /// Name the referrer entered for this contributor.
    pub name: String,
    /// Account that added the contributor.
    pub referrer_id: String,
    pub email: Option<String>,
    pub token: String,
}

/// Pending email confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailVerification {
    pub email: String,
    pub expiration: DateTime<Utc>,
}

/// A persisted user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Server-assigned UUID.
    pub id: String,
    /// Login email address, unique.
    pub username: String,
    pub fullname: String,
    pub given_name: Option<String>,
    pub middle_names: Option<String>,
    pub family_name: Option<String>,
    pub suffix: Option<String>,
    /// Confirmed email addresses.
    pub emails: BTreeSet<String>,
    /// Argon2 PHC string. `None` means the password is unusable.
    pub password_hash: Option<String>,
    pub is_registered: bool,
    pub is_claimed: bool,
    pub date_confirmed: Option<DateTime<Utc>>,
    pub date_registered: Option<DateTime<Utc>>,
    pub date_disabled: Option<DateTime<Utc>>,
    /// Account this one was merged into.
    pub merged_by: Option<String>,
    /// Pending claims keyed by project id.
    pub unclaimed_records: HashMap<String, UnclaimedRecord>,
    /// Pending email confirmations keyed by token.
    pub email_verifications: HashMap<String, EmailVerification>,
    /// Institution ids.
    pub affiliated_institutions: BTreeSet<String>,
    pub date_last_login: Option<DateTime<Utc>>,
    pub accepted_terms_of_service: Option<DateTime<Utc>>,
    /// Staff account; receives dry-run bulk mail.
    #[serde(default)]
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A fresh, unregistered account with an unusable password.
    ///
    /// Name parts are imputed from `fullname`.
    pub fn new_unregistered(fullname: &str, username: &str) -> Self {
        let now = Utc::now();
        let names = impute_names(fullname);
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            fullname: fullname.to_string(),
            given_name: names.given,
            middle_names: names.middle,
            family_name: names.family,
            suffix: names.suffix,
            emails: BTreeSet::new(),
            password_hash: None,
            is_registered: false,
            is_claimed: false,
            date_confirmed: None,
            date_registered: None,
            date_disabled: None,
            merged_by: None,
            unclaimed_records: HashMap::new(),
            email_verifications: HashMap::new(),
            affiliated_institutions: BTreeSet::new(),
            date_last_login: None,
            accepted_terms_of_service: None,
            is_superuser: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_usable_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Hash and store a new password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
        self.password_hash = Some(hash.to_string());
        Ok(())
    }

    /// Verify a password against the stored hash.
    #[allow(dead_code)]
    pub fn check_password(&self, password: &str) -> bool {
        let Some(ref stored) = self.password_hash else {
            return false;
        };
        match PasswordHash::new(stored) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Mark the account registered, claimed and confirmed under `username`.
    ///
    /// Password state is left untouched when `password` is `None`.
    pub fn register(&mut self, username: &str, password: Option<&str>) -> Result<()> {
        let now = Utc::now();
        self.username = username.to_string();
        self.emails.insert(username.to_string());
        if let Some(password) = password {
            self.set_password(password)?;
        }
        self.is_registered = true;
        self.is_claimed = true;
        if self.date_confirmed.is_none() {
            self.date_confirmed = Some(now);
        }
        self.date_registered = Some(now);
        Ok(())
    }

    pub fn update_date_last_login(&mut self) {
        self.date_last_login = Some(Utc::now());
    }

    pub fn is_affiliated_with(&self, institution_id: &str) -> bool {
        self.affiliated_institutions.contains(institution_id)
    }

    /// Add an affiliation. Returns `false` if it already existed.
    pub fn affiliate(&mut self, institution_id: &str) -> bool {
        self.affiliated_institutions.insert(institution_id.to_string())
    }

    pub fn is_confirmed(&self) -> bool {
        self.date_confirmed.is_some()
    }
}

/// Account status at authentication time. Exactly one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    /// Added as an unregistered contributor and never claimed.
    Unclaimed,
    /// Self-registered with a password, email never confirmed.
    UnconfirmedWithPassword,
    /// Created through an external IdP login, email never confirmed.
    UnconfirmedWithoutPassword,
    Deactivated,
    Merged,
    /// Unknown or mid-construction state.
    Invalid,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Unclaimed => write!(f, "unclaimed"),
            AccountStatus::UnconfirmedWithPassword => write!(f, "unconfirmed_with_password"),
            AccountStatus::UnconfirmedWithoutPassword => write!(f, "unconfirmed_without_password"),
            AccountStatus::Deactivated => write!(f, "deactivated"),
            AccountStatus::Merged => write!(f, "merged"),
            AccountStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// Pending records to clear when an account is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRecords {
    Claims,
    EmailVerifications,
}

/// What institution SSO does with an existing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Log in as is.
    Continue,
    /// Clear the pending records, assign a fresh password and register.
    Activate { clear: PendingRecords },
    /// Do not authenticate; report for manual remediation.
    Refuse,
}

impl AccountStatus {
    pub fn policy(self) -> StatusPolicy {
        match self {
            AccountStatus::Active => StatusPolicy::Continue,
            AccountStatus::Unclaimed => StatusPolicy::Activate {
                clear: PendingRecords::Claims,
            },
            AccountStatus::UnconfirmedWithPassword => StatusPolicy::Activate {
                clear: PendingRecords::EmailVerifications,
            },
            AccountStatus::UnconfirmedWithoutPassword
            | AccountStatus::Deactivated
            | AccountStatus::Merged
            | AccountStatus::Invalid => StatusPolicy::Refuse,
        }
    }
}

/// Classify an account. Disabled and merged take precedence over everything.
pub fn classify_status(account: &Account) -> AccountStatus {
    if account.date_disabled.is_some() {
        return AccountStatus::Deactivated;
    }
    if account.merged_by.is_some() {
        return AccountStatus::Merged;
    }
    if account.is_registered && account.is_claimed && account.is_confirmed() {
        return AccountStatus::Active;
    }
    if !account.is_claimed {
        return AccountStatus::Unclaimed;
    }
    if !account.is_confirmed() {
        return if account.has_usable_password() {
            AccountStatus::UnconfirmedWithPassword
        } else {
            AccountStatus::UnconfirmedWithoutPassword
        };
    }
    AccountStatus::Invalid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_account() -> Account {
        let mut account = Account::new_unregistered("Jane Doe", "jdoe@example.edu");
        account.register("jdoe@example.edu", None).unwrap();
        account
    }

    #[test]
    fn test_new_account_has_imputed_names_and_no_password() {
        let account = Account::new_unregistered("Jane Quinn Doe Jr.", "jdoe@example.edu");
        assert_eq!(account.given_name.as_deref(), Some("Jane"));
        assert_eq!(account.middle_names.as_deref(), Some("Quinn"));
        assert_eq!(account.family_name.as_deref(), Some("Doe"));
        assert_eq!(account.suffix.as_deref(), Some("Jr."));
        assert!(!account.has_usable_password());
        assert!(!account.is_registered);
    }

    #[test]
    fn test_register_without_password_keeps_it_unusable() {
        let account = active_account();
        assert!(account.is_registered);
        assert!(account.is_claimed);
        assert!(account.is_confirmed());
        assert!(!account.has_usable_password());
        assert!(account.emails.contains("jdoe@example.edu"));
    }

    #[test]
    fn test_password_hash_and_check() {
        let mut account = active_account();
        account.set_password("correct horse").unwrap();
        assert!(account.has_usable_password());
        assert!(account.check_password("correct horse"));
        assert!(!account.check_password("battery staple"));
    }

    #[test]
    fn test_classify_active() {
        assert_eq!(classify_status(&active_account()), AccountStatus::Active);
    }

    #[test]
    fn test_classify_unclaimed() {
        let mut account = Account::new_unregistered("Jane Doe", "jdoe@example.edu");
        account.unclaimed_records.insert(
            "abc12".to_string(),
            UnclaimedRecord {
                name: "J. Doe".to_string(),
                referrer_id: "ref01".to_string(),
                email: Some("jdoe@example.edu".to_string()),
                token: "tok".to_string(),
            },
        );
        assert_eq!(classify_status(&account), AccountStatus::Unclaimed);
    }

    #[test]
    fn test_classify_unconfirmed_by_password() {
        let mut account = Account::new_unregistered("Jane Doe", "jdoe@example.edu");
        account.is_registered = true;
        account.is_claimed = true;
        assert_eq!(classify_status(&account), AccountStatus::UnconfirmedWithoutPassword);

        account.set_password("hunter22").unwrap();
        assert_eq!(classify_status(&account), AccountStatus::UnconfirmedWithPassword);
    }

    #[test]
    fn test_classify_disabled_and_merged_take_precedence() {
        let mut account = active_account();
        account.merged_by = Some("other".to_string());
        assert_eq!(classify_status(&account), AccountStatus::Merged);

        account.date_disabled = Some(Utc::now());
        assert_eq!(classify_status(&account), AccountStatus::Deactivated);
    }

    #[test]
    fn test_classify_invalid() {
        // Claimed and confirmed but never registered
        let mut account = Account::new_unregistered("Jane Doe", "jdoe@example.edu");
        account.is_claimed = true;
        account.date_confirmed = Some(Utc::now());
        assert_eq!(classify_status(&account), AccountStatus::Invalid);
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(AccountStatus::Active.policy(), StatusPolicy::Continue);
        assert_eq!(
            AccountStatus::Unclaimed.policy(),
            StatusPolicy::Activate { clear: PendingRecords::Claims }
        );
        assert_eq!(
            AccountStatus::UnconfirmedWithPassword.policy(),
            StatusPolicy::Activate { clear: PendingRecords::EmailVerifications }
        );
        for status in [
            AccountStatus::UnconfirmedWithoutPassword,
            AccountStatus::Deactivated,
            AccountStatus::Merged,
            AccountStatus::Invalid,
        ] {
            assert_eq!(status.policy(), StatusPolicy::Refuse);
        }
    }

    #[test]
    fn test_affiliation_is_idempotent() {
        let mut account = active_account();
        assert!(!account.is_affiliated_with("cos"));
        assert!(account.affiliate("cos"));
        assert!(!account.affiliate("cos"));
        assert_eq!(account.affiliated_institutions.len(), 1);
    }
}
