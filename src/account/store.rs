//! Account store backed by redb embedded database.
//!
//! Accounts are kept as MessagePack in a primary table with a username
//! index, mirrored in in-memory caches loaded on open.

use anyhow::{Context, Result};
use chrono::Utc;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use super::types::Account;

/// Primary account table: UUID -> MessagePack<Account>.
const ACCOUNTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
/// Secondary index: username -> UUID.
const USERNAME_INDEX: TableDefinition<&str, &str> = TableDefinition::new("account_username_index");

/// Persistence operations the SSO flow needs.
pub trait AccountRepository: Send + Sync {
    /// Find the account for `username`, or build a new unregistered one.
    ///
    /// A newly built account is not persisted and has no usable password.
    /// The flag is `true` when the account was created.
    fn get_or_create(&self, fullname: &str, username: &str) -> Result<(Account, bool)>;

    fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Insert or update an account.
    fn save(&self, account: &Account) -> Result<()>;
}

/// Account store with in-memory caches and persistent storage.
pub struct AccountStore {
    db: Database,
    /// Primary cache: UUID -> Account.
    account_cache: RwLock<HashMap<String, Account>>,
    /// Index cache: username -> UUID.
    username_cache: RwLock<HashMap<String, String>>,
}

impl AccountStore {
    /// Open or create an account store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open account database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS_TABLE)?;
            let _ = write_txn.open_table(USERNAME_INDEX)?;
        }
        write_txn.commit()?;

        let (account_cache, username_cache) = Self::load_all(&db)?;
        debug!(accounts = account_cache.len(), "Loaded accounts into cache");

        Ok(Self {
            db,
            account_cache: RwLock::new(account_cache),
            username_cache: RwLock::new(username_cache),
        })
    }

    /// Get an account by UUID.
    pub fn get(&self, id: &str) -> Result<Option<Account>> {
        if let Ok(cache) = self.account_cache.read() {
            if let Some(account) = cache.get(id) {
                return Ok(Some(account.clone()));
            }
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        match table.get(id)? {
            Some(value) => {
                let account: Account = rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize account")?;

                if let Ok(mut cache) = self.account_cache.write() {
                    cache.insert(account.id.clone(), account.clone());
                }

                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// All accounts, oldest first.
    pub fn list(&self) -> Result<Vec<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;

        let mut accounts = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let account: Account =
                rmp_serde::from_slice(value.value()).context("Failed to deserialize account")?;
            accounts.push(account);
        }
        accounts.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(accounts)
    }

    /// Number of stored accounts.
    pub fn count(&self) -> Result<usize> {
        if let Ok(cache) = self.account_cache.read() {
            return Ok(cache.len());
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;
        Ok(table.len()? as usize)
    }

    fn load_all(db: &Database) -> Result<(HashMap<String, Account>, HashMap<String, String>)> {
        let mut accounts = HashMap::new();
        let mut usernames = HashMap::new();

        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS_TABLE)?;

        for entry in table.iter()? {
            let (_, value) = entry?;
            match rmp_serde::from_slice::<Account>(value.value()) {
                Ok(account) => {
                    usernames.insert(account.username.clone(), account.id.clone());
                    accounts.insert(account.id.clone(), account);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize account during load, skipping");
                }
            }
        }

        Ok((accounts, usernames))
    }
}

impl AccountRepository for AccountStore {
    fn get_or_create(&self, fullname: &str, username: &str) -> Result<(Account, bool)> {
        match self.find_by_username(username)? {
            Some(account) => Ok((account, false)),
            None => Ok((Account::new_unregistered(fullname, username), true)),
        }
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let uuid = if let Ok(cache) = self.username_cache.read() {
            cache.get(username).cloned()
        } else {
            None
        };

        if let Some(uuid) = uuid {
            return self.get(&uuid);
        }

        let uuid = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(USERNAME_INDEX)?;
            table.get(username)?.map(|value| value.value().to_string())
        };

        match uuid {
            Some(uuid) => self.get(&uuid),
            None => Ok(None),
        }
    }

    fn save(&self, account: &Account) -> Result<()> {
        let mut account = account.clone();
        account.updated_at = Utc::now();

        let data = rmp_serde::to_vec_named(&account).context("Failed to serialize account")?;
        let write_txn = self.db.begin_write()?;
        let previous_username = {
            let mut accounts_table = write_txn.open_table(ACCOUNTS_TABLE)?;
            let mut username_index = write_txn.open_table(USERNAME_INDEX)?;

            // Checked inside the write transaction; redb serializes writers
            let owner = username_index
                .get(account.username.as_str())?
                .map(|value| value.value().to_string());
            if let Some(owner) = owner {
                if owner != account.id {
                    anyhow::bail!("username '{}' already exists", account.username);
                }
            }

            let previous_username = match accounts_table.get(account.id.as_str())? {
                Some(value) => Some(
                    rmp_serde::from_slice::<Account>(value.value())
                        .context("Failed to deserialize account")?
                        .username,
                ),
                None => None,
            };

            if let Some(ref old) = previous_username {
                username_index.remove(old.as_str())?;
            }
            accounts_table.insert(account.id.as_str(), data.as_slice())?;
            username_index.insert(account.username.as_str(), account.id.as_str())?;
            previous_username
        };
        write_txn.commit()?;

        if let Ok(mut cache) = self.username_cache.write() {
            if let Some(ref old) = previous_username {
                cache.remove(old);
            }
            cache.insert(account.username.clone(), account.id.clone());
        }
        if let Ok(mut cache) = self.account_cache.write() {
            cache.insert(account.id.clone(), account.clone());
        }

        debug!(account = %account.id, username = %account.username, "Saved account");
        Ok(())
    }
}
