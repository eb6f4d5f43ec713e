//! Institution SSO authentication and account reconciliation.
//!
//! Only the identity broker calls this. One call verifies the broker's
//! assertion, resolves the local account, repairs its status where SSO is
//! allowed to, sends the welcome mail once and records the affiliation.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::outcome::{AuthenticationFailed, SsoOutcome};
use crate::account::{
    classify_status, Account, AccountRepository, AccountStatus, PendingRecords, StatusPolicy,
};
use crate::assertion::{AssertionDecoder, InboundAssertion};
use crate::features::{FeatureFlags, STORAGE_I18N};
use crate::institution::InstitutionDirectory;
use crate::mail::{MailTemplate, Mailer};
use crate::report::ErrorSink;

/// External collaborators of the authenticator.
#[derive(Clone)]
pub struct SsoServices {
    pub accounts: Arc<dyn AccountRepository>,
    pub institutions: Arc<dyn InstitutionDirectory>,
    pub mailer: Arc<dyn Mailer>,
    pub error_sink: Arc<dyn ErrorSink>,
    pub flags: Arc<dyn FeatureFlags>,
}

/// Values rendered into the welcome mail.
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub domain: String,
    pub support_email: String,
}

/// Authenticates institution SSO assertions.
pub struct InstitutionAuthenticator {
    decoder: AssertionDecoder,
    services: SsoServices,
    mail_settings: MailSettings,
}

impl InstitutionAuthenticator {
    pub fn new(decoder: AssertionDecoder, services: SsoServices, mail_settings: MailSettings) -> Self {
        Self {
            decoder,
            services,
            mail_settings,
        }
    }

    /// Authenticate a raw broker request body.
    ///
    /// `Err` rejects the attempt. `Ok(SsoOutcome::Declined(_))` means the
    /// account exists but SSO may not log into it; the caller neither
    /// authenticates nor surfaces an error.
    pub fn authenticate(&self, raw_body: &[u8]) -> Result<SsoOutcome, AuthenticationFailed> {
        let assertion = self.decoder.decode(raw_body).map_err(|e| {
            warn!(error = %e, "Institution assertion rejected");
            AuthenticationFailed::token_invalid()
        })?;

        let institution = self
            .services
            .institutions
            .lookup(&assertion.institution_id)
            .map_err(|e| internal_error("institution lookup", e))?
            .ok_or_else(|| AuthenticationFailed::unknown_institution(&assertion.institution_id))?;

        let username = assertion.username.as_str();

        let Some(fullname) = assertion.derived_fullname() else {
            let message = format!(
                "Institution login failed: fullname required for user \"{}\" from institution \"{}\"",
                username, assertion.institution_id
            );
            self.services.error_sink.report(&message);
            return Err(AuthenticationFailed::missing_fullname(message));
        };

        let (mut account, created) = self
            .services
            .accounts
            .get_or_create(&fullname, username)
            .map_err(|e| internal_error("account lookup", e))?;

        let mut activation_required = false;
        if created {
            info!(username = %username, "Institution SSO: new user");
        } else {
            let status = classify_status(&account);
            match status.policy() {
                StatusPolicy::Continue => {
                    info!(username = %username, "Institution SSO: active user");
                }
                StatusPolicy::Activate { clear } => {
                    match clear {
                        PendingRecords::Claims => account.unclaimed_records.clear(),
                        PendingRecords::EmailVerifications => account.email_verifications.clear(),
                    }
                    activation_required = true;
                    info!(username = %username, status = %status, "Institution SSO: activating account");
                }
                StatusPolicy::Refuse => {
                    let message = refusal_message(status, username);
                    self.services.error_sink.report(&message);
                    error!(username = %username, status = %status, "{}", message);
                    return Ok(SsoOutcome::Declined(status));
                }
            }
        }

        // Both activation cases replace whatever password the account had
        let new_password_required = activation_required;

        let newly_affiliated = account.affiliate(&institution.id);

        if created || activation_required {
            // One write covers registration and the new affiliation
            self.register_account(
                &mut account,
                &assertion,
                &fullname,
                activation_required,
                new_password_required,
            )?;
        } else if newly_affiliated {
            self.services
                .accounts
                .save(&account)
                .map_err(|e| internal_error("affiliation save", e))?;
        }

        if newly_affiliated {
            info!(username = %username, institution = %institution.id, "Institution SSO: affiliated user");
        }

        Ok(SsoOutcome::Authenticated(account))
    }

    /// Update, register and save a created or activated account, then send
    /// the welcome mail.
    fn register_account(
        &self,
        account: &mut Account,
        assertion: &InboundAssertion,
        fullname: &str,
        activation_required: bool,
        new_password_required: bool,
    ) -> Result<(), AuthenticationFailed> {
        if let Some(ref given) = assertion.given_name {
            account.given_name = Some(given.clone());
        }
        if let Some(ref family) = assertion.family_name {
            account.family_name = Some(family.clone());
        }
        if let Some(ref middle) = assertion.middle_names {
            account.middle_names = Some(middle.clone());
        }
        if let Some(ref suffix) = assertion.suffix {
            account.suffix = Some(suffix.clone());
        }

        // The institution's name for the user replaces a self-entered one
        if activation_required {
            account.fullname = fullname.to_string();
        }

        account.update_date_last_login();
        // The broker front-end gates on terms-of-service consent
        account.accepted_terms_of_service = Some(Utc::now());

        let password = new_password_required.then(|| Uuid::new_v4().to_string());
        account
            .register(&assertion.username, password.as_deref())
            .map_err(|e| internal_error("account registration", e))?;
        self.services
            .accounts
            .save(account)
            .map_err(|e| internal_error("account save", e))?;

        self.send_welcome(account);
        Ok(())
    }

    fn send_welcome(&self, account: &Account) {
        let mut context = serde_json::Map::new();
        context.insert("fullname".to_string(), account.fullname.clone().into());
        context.insert("domain".to_string(), self.mail_settings.domain.clone().into());
        context.insert(
            "support_email".to_string(),
            self.mail_settings.support_email.clone().into(),
        );
        context.insert(
            "storage_flag_is_active".to_string(),
            self.services.flags.is_active(STORAGE_I18N).into(),
        );

        match self
            .services
            .mailer
            .send(&account.username, MailTemplate::InstitutionWelcome, context)
        {
            Ok(()) => debug!(username = %account.username, "Welcome mail queued"),
            Err(e) => warn!(error = %e, username = %account.username, "Failed to send welcome mail"),
        }
    }
}

fn internal_error(stage: &str, e: anyhow::Error) -> AuthenticationFailed {
    error!(stage = %stage, error = %e, "Institution SSO storage failure");
    AuthenticationFailed::internal()
}

/// Error-sink message for an account SSO must not log into.
fn refusal_message(status: AccountStatus, username: &str) -> String {
    match status {
        AccountStatus::UnconfirmedWithoutPassword => format!(
            "Institution SSO is not eligible for an unconfirmed account created via external IdP login: username = \"{}\"",
            username
        ),
        AccountStatus::Deactivated => format!(
            "Institution SSO is not eligible for a deactivated account: username = \"{}\"",
            username
        ),
        AccountStatus::Merged => format!(
            "Institution SSO is not eligible for a merged account: username = \"{}\"",
            username
        ),
        _ => format!(
            "Institution SSO is not eligible for an inactive account with an unknown or invalid status: username = \"{}\"",
            username
        ),
    }
}
