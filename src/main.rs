//! Institution SSO Agent
//!
//! Logs users in on behalf of the institution identity broker. The broker
//! posts an encrypted, signed assertion; the agent resolves or creates the
//! local account, repairs its status where allowed, queues the welcome mail
//! and records the institution affiliation.

mod account;
mod assertion;
mod features;
mod institution;
mod mail;
mod notifications;
mod report;
mod sso;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use account::{AccountRepository, AccountStatus, AccountStore};
use assertion::{AssertionDecoder, BrokerPayload};
use features::{FeatureFlags, FlagKind, FlagStore, StaticFlags, DECLARED_FLAGS, DECLARED_SWITCHES};
use institution::{Institution, InstitutionStore};
use mail::{email_all_users, BroadcastReport, MailOutbox, MailTemplate};
use notifications::CategorizeRequest;
use report::TracingErrorSink;
use sso::{
    AuthenticationFailed, FailureKind, InstitutionAuthenticator, MailSettings, SsoConfig,
    SsoConfigJson, SsoOutcome, SsoServices,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "institution-sso-agent")]
#[command(about = "Institution single sign-on agent for the identity broker")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JWE secret shared with the broker (32 raw bytes or base64)
    #[arg(long, env = "SSO_JWE_SECRET", hide_env_values = true, global = true)]
    jwe_secret: Option<String>,

    /// HS256 secret shared with the broker
    #[arg(long, env = "SSO_JWT_SECRET", hide_env_values = true, global = true)]
    jwt_secret: Option<String>,

    /// Public domain rendered into mail
    #[arg(long, env = "SSO_DOMAIN", global = true)]
    domain: Option<String>,

    /// Support address rendered into mail
    #[arg(long, env = "SSO_SUPPORT_EMAIL", global = true)]
    support_email: Option<String>,

    /// Directory for the redb databases
    #[arg(long, env = "SSO_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Largest accepted assertion body in bytes
    #[arg(long, env = "SSO_MAX_BODY_BYTES", global = true)]
    max_body_bytes: Option<usize>,

    /// Fixed active feature flags (comma-separated); bypasses the flag store
    #[arg(long, env = "SSO_ENABLED_FLAGS", global = true)]
    enabled_flags: Option<String>,

    /// JSON configuration file applied over the other settings
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v', env = "SSO_VERBOSE", global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve authentication requests on a Unix socket
    Serve {
        /// Path to Unix socket
        #[arg(long, default_value = "/tmp/institution-sso.sock", env = "AGENT_SOCKET")]
        socket: PathBuf,
    },
    /// Authenticate one assertion body (file path, or - for stdin)
    Authenticate {
        #[arg(long)]
        body: String,
    },
    /// Seal a broker payload JSON file into an assertion body
    Mint {
        #[arg(long)]
        payload: PathBuf,
    },
    /// Manage institutions
    Institution {
        #[command(subcommand)]
        action: InstitutionAction,
    },
    /// Inspect the mail outbox
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
    /// Manage feature flags and switches
    Flags {
        #[command(subcommand)]
        action: FlagsAction,
    },
    /// Manage accounts
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Queue a templated mail for every active account
    EmailAllUsers {
        #[arg(long, value_enum)]
        template: MailTemplate,
        /// Only mail superusers
        #[arg(long)]
        dry_run: bool,
    },
    /// Categorize subscribers of a moved file or folder
    Categorize {
        /// JSON request file
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum InstitutionAction {
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Email domain (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    List,
    /// Grant or revoke superuser status
    Superuser {
        #[arg(long)]
        username: String,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Subcommand, Debug)]
enum OutboxAction {
    List,
    /// Remove a delivered message
    Ack {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum FlagsAction {
    /// Add declared toggles and delete stale ones
    Sync,
    Set {
        #[arg(long, value_enum)]
        kind: FlagKind,
        #[arg(long)]
        name: String,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    List,
}

/// Build the configuration from arguments, then the optional JSON file.
fn config_from_args(args: &Args) -> Result<SsoConfig> {
    let mut config = SsoConfig::default();

    if let Some(ref secret) = args.jwe_secret {
        config.jwe_secret = Some(secret.clone());
    }
    if let Some(ref secret) = args.jwt_secret {
        config.jwt_secret = Some(secret.clone());
    }
    if let Some(ref domain) = args.domain {
        config.domain = domain.clone();
    }
    if let Some(ref email) = args.support_email {
        config.support_email = email.clone();
    }
    if let Some(ref dir) = args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(max) = args.max_body_bytes {
        config.max_body_bytes = max;
    }
    if let Some(ref flags) = args.enabled_flags {
        config.static_flags = Some(
            flags
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        );
    }

    if let Some(ref path) = args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let json: SsoConfigJson = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        json.apply_to(&mut config);
    }

    Ok(config)
}

/// Account fields returned to the broker.
#[derive(Debug, Serialize)]
struct AccountSummary {
    id: String,
    username: String,
    fullname: String,
    affiliated_institutions: BTreeSet<String>,
}

/// One reply per socket connection.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AgentReply {
    Authenticated { account: AccountSummary },
    Declined { account_status: AccountStatus },
    Failed { kind: FailureKind, message: String },
}

impl AgentReply {
    fn failed(failure: &AuthenticationFailed) -> Self {
        AgentReply::Failed {
            kind: failure.kind,
            message: failure.to_string(),
        }
    }
}

impl From<Result<SsoOutcome, AuthenticationFailed>> for AgentReply {
    fn from(result: Result<SsoOutcome, AuthenticationFailed>) -> Self {
        match result {
            Ok(SsoOutcome::Authenticated(account)) => AgentReply::Authenticated {
                account: AccountSummary {
                    id: account.id,
                    username: account.username,
                    fullname: account.fullname,
                    affiliated_institutions: account.affiliated_institutions,
                },
            },
            Ok(SsoOutcome::Declined(status)) => AgentReply::Declined {
                account_status: status,
            },
            Err(failure) => AgentReply::failed(&failure),
        }
    }
}

/// Institution SSO agent
struct SsoAgent {
    authenticator: InstitutionAuthenticator,
    max_body_bytes: usize,
}

impl SsoAgent {
    /// Open the stores under the data directory and wire the authenticator.
    fn from_config(config: &SsoConfig) -> Result<Self> {
        let decoder = AssertionDecoder::new(config.assertion_keys()?);

        let accounts = Arc::new(AccountStore::open(config.accounts_path())?);
        let institutions = Arc::new(InstitutionStore::open(config.institutions_path())?);
        let outbox = Arc::new(MailOutbox::open(config.outbox_path())?);

        let flags: Arc<dyn FeatureFlags> = match config.static_flags {
            Some(ref names) => Arc::new(StaticFlags::new(names.iter().cloned())),
            None => Arc::new(FlagStore::open(config.flags_path())?),
        };

        info!(
            data_dir = ?config.data_dir,
            accounts = accounts.count()?,
            institutions = institutions.count()?,
            queued_mail = outbox.count()?,
            static_flags = config.static_flags.is_some(),
            max_body_bytes = config.max_body_bytes,
            "Stores opened"
        );

        let services = SsoServices {
            accounts,
            institutions,
            mailer: outbox,
            error_sink: Arc::new(TracingErrorSink),
            flags,
        };
        let mail_settings = MailSettings {
            domain: config.domain.clone(),
            support_email: config.support_email.clone(),
        };

        Ok(Self {
            authenticator: InstitutionAuthenticator::new(decoder, services, mail_settings),
            max_body_bytes: config.max_body_bytes,
        })
    }

    fn handle(&self, body: &[u8]) -> AgentReply {
        if body.len() > self.max_body_bytes {
            warn!(
                len = body.len(),
                max = self.max_body_bytes,
                "Assertion body too large"
            );
            return AgentReply::failed(&AuthenticationFailed::token_invalid());
        }
        self.authenticator.authenticate(body).into()
    }
}

/// Read one body, authenticate it on the blocking pool and reply.
async fn handle_connection(agent: Arc<SsoAgent>, mut stream: UnixStream) -> Result<()> {
    let mut body = Vec::new();
    // One extra byte so oversized bodies are detected, not truncated
    let limit = agent.max_body_bytes as u64 + 1;
    (&mut stream)
        .take(limit)
        .read_to_end(&mut body)
        .await
        .context("Failed to read request body")?;
    debug!(len = body.len(), "Request body received");

    let worker = Arc::clone(&agent);
    let reply = tokio::task::spawn_blocking(move || worker.handle(&body))
        .await
        .context("Authentication task failed")?;

    let data = serde_json::to_vec(&reply).context("Failed to serialize reply")?;
    stream.write_all(&data).await?;
    stream.shutdown().await?;
    Ok(())
}

async fn run_listener(agent: Arc<SsoAgent>, listener: UnixListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await.context("Failed to accept connection")?;
        let agent = Arc::clone(&agent);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(agent, stream).await {
                warn!(error = %e, "Connection failed");
            }
        });
    }
}

async fn serve(agent: SsoAgent, socket: &Path) -> Result<()> {
    if socket.exists() {
        std::fs::remove_file(socket)
            .with_context(|| format!("Failed to remove stale socket: {:?}", socket))?;
    }
    let listener = UnixListener::bind(socket)
        .with_context(|| format!("Failed to bind socket: {:?}", socket))?;

    info!(socket = ?socket, "Starting agent server");
    run_listener(Arc::new(agent), listener).await
}

/// Queue `template` for every active account in the data directory.
fn run_email_all_users(
    config: &SsoConfig,
    template: MailTemplate,
    dry_run: bool,
) -> Result<BroadcastReport> {
    let accounts = AccountStore::open(config.accounts_path())?;
    let outbox = MailOutbox::open(config.outbox_path())?;
    email_all_users(&accounts.list()?, &outbox, template, dry_run)
}

fn set_superuser(store: &AccountStore, username: &str, active: bool) -> Result<()> {
    let mut account = store
        .find_by_username(username)?
        .ok_or_else(|| anyhow!("No account with username {}", username))?;
    account.is_superuser = active;
    store.save(&account)?;
    info!(username = %username, active, "Superuser status updated");
    Ok(())
}

fn read_body(source: &str) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    if source == "-" {
        std::io::stdin()
            .read_to_end(&mut body)
            .context("Failed to read stdin")?;
    } else {
        body = std::fs::read(source).with_context(|| format!("Failed to read body: {}", source))?;
    }
    Ok(body)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},error_report=error",
            env!("CARGO_CRATE_NAME"),
            log_level
        ))
        .json()
        .with_writer(std::io::stderr)
        .init();

    let config = config_from_args(&args)?;

    match args.command {
        Command::Serve { ref socket } => {
            config.validate().map_err(|e| anyhow!(e))?;
            info!("Starting Institution SSO Agent");
            let agent = SsoAgent::from_config(&config)?;
            serve(agent, socket).await?;
        }
        Command::Authenticate { ref body } => {
            let body = read_body(body)?;
            let agent = SsoAgent::from_config(&config)?;
            print_json(&agent.handle(&body))?;
        }
        Command::Mint { ref payload } => {
            let raw = std::fs::read_to_string(payload)
                .with_context(|| format!("Failed to read payload: {:?}", payload))?;
            let payload: BrokerPayload =
                serde_json::from_str(&raw).context("Invalid broker payload")?;
            let decoder = AssertionDecoder::new(config.assertion_keys()?);
            println!("{}", decoder.seal(&payload)?);
        }
        Command::Institution { ref action } => {
            let store = InstitutionStore::open(config.institutions_path())?;
            match action {
                InstitutionAction::Add { id, name, domains } => {
                    let mut institution = Institution::new(id.as_str(), name.as_str());
                    institution.domains = domains.clone();
                    print_json(&store.upsert(institution)?)?;
                }
                InstitutionAction::List => print_json(&store.list()?)?,
            }
        }
        Command::Outbox { ref action } => {
            let outbox = MailOutbox::open(config.outbox_path())?;
            match action {
                OutboxAction::List => print_json(&outbox.pending()?)?,
                OutboxAction::Ack { id } => {
                    if !outbox.acknowledge(id)? {
                        return Err(anyhow!("No queued mail with id {}", id));
                    }
                }
            }
        }
        Command::Flags { ref action } => {
            let store = FlagStore::open(config.flags_path())?;
            match action {
                FlagsAction::Sync => {
                    print_json(&store.sync_declared(DECLARED_FLAGS, DECLARED_SWITCHES)?)?
                }
                FlagsAction::Set { kind, name, active } => {
                    if !store.set_active(*kind, name, *active)? {
                        return Err(anyhow!("Unknown {} {}; run flags sync first", kind, name));
                    }
                }
                FlagsAction::List => print_json(&store.list()?)?,
            }
        }
        Command::Account { ref action } => {
            let store = AccountStore::open(config.accounts_path())?;
            match action {
                AccountAction::List => print_json(&store.list()?)?,
                AccountAction::Superuser { username, active } => {
                    set_superuser(&store, username, *active)?
                }
            }
        }
        Command::EmailAllUsers { template, dry_run } => {
            print_json(&run_email_all_users(&config, template, dry_run)?)?;
        }
        Command::Categorize { ref input } => {
            let raw = std::fs::read_to_string(input)
                .with_context(|| format!("Failed to read input: {:?}", input))?;
            let request: CategorizeRequest =
                serde_json::from_str(&raw).context("Invalid categorize request")?;
            print_json(&request.categorize())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::decoder::tests::{payload, test_decoder, TEST_JWE_SECRET, TEST_JWT_SECRET};
    use crate::assertion::ProviderUser;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> SsoConfig {
        SsoConfig {
            jwe_secret: Some(TEST_JWE_SECRET.to_string()),
            jwt_secret: Some(TEST_JWT_SECRET.to_string()),
            data_dir: dir.path().to_path_buf(),
            max_body_bytes: 4096,
            static_flags: Some(Vec::new()),
            ..Default::default()
        }
    }

    fn test_agent(dir: &TempDir) -> SsoAgent {
        let config = test_config(dir);
        InstitutionStore::open(config.institutions_path())
            .unwrap()
            .upsert(Institution::new("cos", "Center for Open Science"))
            .unwrap();
        SsoAgent::from_config(&config).unwrap()
    }

    fn sealed(institution: &str, username: &str) -> String {
        test_decoder()
            .seal(&payload(
                institution,
                ProviderUser {
                    username: Some(username.to_string()),
                    fullname: Some("Jane Doe".to_string()),
                    ..Default::default()
                },
            ))
            .unwrap()
    }

    fn reply_json(reply: &AgentReply) -> serde_json::Value {
        serde_json::to_value(reply).unwrap()
    }

    #[test]
    fn test_config_from_args() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"support-email": "help@example.org"}"#).unwrap();

        let args = Args::try_parse_from([
            "institution-sso-agent",
            "--jwe-secret",
            TEST_JWE_SECRET,
            "--jwt-secret",
            "signing",
            "--support-email",
            "ignored@example.org",
            "--enabled-flags",
            "storage_i18n, ,other",
            "--config",
            config_path.to_str().unwrap(),
            "outbox",
            "list",
        ])
        .unwrap();

        let config = config_from_args(&args).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.support_email, "help@example.org");
        assert_eq!(
            config.static_flags,
            Some(vec!["storage_i18n".to_string(), "other".to_string()])
        );
        assert!(matches!(args.command, Command::Outbox { action: OutboxAction::List }));
    }

    #[test]
    fn test_email_all_users_args() {
        let args = Args::try_parse_from([
            "institution-sso-agent",
            "email-all-users",
            "--template",
            "tou_notif",
            "--dry-run",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::EmailAllUsers {
                template: MailTemplate::TouNotif,
                dry_run: true
            }
        ));
        assert!(Args::try_parse_from([
            "institution-sso-agent",
            "email-all-users",
            "--template",
            "no_such_template",
        ])
        .is_err());
    }

    #[test]
    fn test_email_all_users_queues_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        {
            let store = AccountStore::open(config.accounts_path()).unwrap();
            for username in ["a@example.edu", "b@example.edu"] {
                let mut account = account::Account::new_unregistered("Some One", username);
                account.register(username, None).unwrap();
                store.save(&account).unwrap();
            }
            let pending = account::Account::new_unregistered("Pending", "c@example.edu");
            store.save(&pending).unwrap();
            set_superuser(&store, "b@example.edu", true).unwrap();
            assert!(set_superuser(&store, "missing@example.edu", true).is_err());
        }

        let report = run_email_all_users(&config, MailTemplate::TouNotif, true).unwrap();
        assert_eq!(report.sent, 1);

        let report = run_email_all_users(&config, MailTemplate::TouNotif, false).unwrap();
        assert_eq!(report.eligible, 2);
        assert_eq!(report.sent, 2);

        let outbox = MailOutbox::open(config.outbox_path()).unwrap();
        assert_eq!(outbox.count().unwrap(), 3);
    }

    #[test]
    fn test_flags_set_args() {
        let args = Args::try_parse_from([
            "institution-sso-agent",
            "flags",
            "set",
            "--kind",
            "switch",
            "--name",
            "disable_registration",
            "--active",
            "true",
        ])
        .unwrap();
        match args.command {
            Command::Flags {
                action: FlagsAction::Set { kind, name, active },
            } => {
                assert_eq!(kind, FlagKind::Switch);
                assert_eq!(name, "disable_registration");
                assert!(active);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_agent_requires_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.jwt_secret = None;
        assert!(SsoAgent::from_config(&config).is_err());
    }

    #[test]
    fn test_handle_replies() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);

        let json = reply_json(&agent.handle(sealed("cos", "jdoe@example.edu").as_bytes()));
        assert_eq!(json["status"], "authenticated");
        assert_eq!(json["account"]["username"], "jdoe@example.edu");
        assert_eq!(json["account"]["affiliated_institutions"][0], "cos");

        let json = reply_json(&agent.handle(sealed("nowhere", "jdoe@example.edu").as_bytes()));
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "unknown_institution");
        assert!(json["message"].as_str().unwrap().contains("nowhere"));

        let json = reply_json(&agent.handle(b"not a token"));
        assert_eq!(json["kind"], "token_invalid");
        assert_eq!(json["message"], "Incorrect authentication credentials.");

        let json = reply_json(&agent.handle(&[b'a'; 5000]));
        assert_eq!(json["kind"], "token_invalid");
    }

    #[test]
    fn test_welcome_mail_queued_in_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let agent = test_agent(&dir);
        agent.handle(sealed("cos", "jdoe@example.edu").as_bytes());
        drop(agent);

        let outbox = MailOutbox::open(test_config(&dir).outbox_path()).unwrap();
        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].to, "jdoe@example.edu");
    }

    #[test]
    fn test_declined_reply() {
        let reply: AgentReply = Ok(SsoOutcome::Declined(AccountStatus::Deactivated)).into();
        let json = reply_json(&reply);
        assert_eq!(json["status"], "declined");
        assert_eq!(json["account_status"], "deactivated");
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(test_agent(&dir));
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(run_listener(agent, listener));

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream
            .write_all(sealed("cos", "socket@example.edu").as_bytes())
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&response).unwrap();
        assert_eq!(json["status"], "authenticated");
        assert_eq!(json["account"]["fullname"], "Jane Doe");

        server.abort();
    }
}
