//! Persistent flag store backed by redb.
//!
//! Holds the on/off state of every declared flag and switch and reconciles
//! the stored set against the declared lists.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info};

use super::flags::{FeatureFlags, FlagKind};

/// Flag table: "<kind>:<name>" -> MessagePack<FlagRecord>.
const FLAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("feature_flags");

/// Stored state of one flag or switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub name: String,
    pub kind: FlagKind,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of reconciling stored toggles with the declared lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added_flags: Vec<String>,
    pub deleted_flags: Vec<String>,
    pub added_switches: Vec<String>,
    pub deleted_switches: Vec<String>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added_flags.is_empty()
            && self.deleted_flags.is_empty()
            && self.added_switches.is_empty()
            && self.deleted_switches.is_empty()
    }
}

fn record_key(kind: FlagKind, name: &str) -> String {
    format!("{}:{}", kind, name)
}

/// Flag store with an in-memory cache.
pub struct FlagStore {
    db: Database,
    cache: RwLock<HashMap<String, FlagRecord>>,
}

impl FlagStore {
    /// Open or create a flag store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open flag database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(FLAGS_TABLE)?;
        }
        write_txn.commit()?;

        let mut cache = HashMap::new();
        {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(FLAGS_TABLE)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                let record: FlagRecord = rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize flag record")?;
                cache.insert(key.value().to_string(), record);
            }
        }
        debug!(toggles = cache.len(), "Loaded feature toggles");

        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    /// Stored toggles sorted by kind and name.
    pub fn list(&self) -> Result<Vec<FlagRecord>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| anyhow::anyhow!("Flag cache lock poisoned"))?;
        let mut records: Vec<FlagRecord> = cache.values().cloned().collect();
        records.sort_by(|a, b| (a.kind.to_string(), &a.name).cmp(&(b.kind.to_string(), &b.name)));
        Ok(records)
    }

    /// Turn a stored toggle on or off. Returns `false` if it does not exist.
    pub fn set_active(&self, kind: FlagKind, name: &str, active: bool) -> Result<bool> {
        let key = record_key(kind, name);
        let mut record = match self.cache.read().ok().and_then(|c| c.get(&key).cloned()) {
            Some(record) => record,
            None => return Ok(false),
        };
        record.active = active;
        record.updated_at = Utc::now();
        self.write_records(&[record], &[])?;
        info!(kind = %kind, name = %name, active, "Feature toggle updated");
        Ok(true)
    }

    /// Add declared toggles missing from the store (inactive) and delete
    /// stored toggles that are no longer declared.
    pub fn sync_declared(&self, flags: &[&str], switches: &[&str]) -> Result<SyncReport> {
        let stored: Vec<FlagRecord> = self.list()?;
        let mut report = SyncReport::default();
        let mut to_add = Vec::new();
        let mut to_delete = Vec::new();

        for (kind, declared) in [(FlagKind::Flag, flags), (FlagKind::Switch, switches)] {
            let declared: BTreeSet<&str> = declared.iter().copied().collect();
            let current: BTreeSet<&str> = stored
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| r.name.as_str())
                .collect();

            let (added, deleted) = match kind {
                FlagKind::Flag => (&mut report.added_flags, &mut report.deleted_flags),
                FlagKind::Switch => (&mut report.added_switches, &mut report.deleted_switches),
            };

            for name in declared.difference(&current) {
                to_add.push(FlagRecord {
                    name: name.to_string(),
                    kind,
                    active: false,
                    updated_at: Utc::now(),
                });
                added.push(name.to_string());
            }
            for name in current.difference(&declared) {
                to_delete.push(record_key(kind, name));
                deleted.push(name.to_string());
            }
        }

        if !report.is_noop() {
            self.write_records(&to_add, &to_delete)?;
        }

        info!(
            added_flags = ?report.added_flags,
            deleted_flags = ?report.deleted_flags,
            added_switches = ?report.added_switches,
            deleted_switches = ?report.deleted_switches,
            "Feature toggles synced"
        );

        Ok(report)
    }

    fn write_records(&self, upserts: &[FlagRecord], deletes: &[String]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FLAGS_TABLE)?;
            for record in upserts {
                let data =
                    rmp_serde::to_vec_named(record).context("Failed to serialize flag record")?;
                table.insert(record_key(record.kind, &record.name).as_str(), data.as_slice())?;
            }
            for key in deletes {
                table.remove(key.as_str())?;
            }
        }
        write_txn.commit()?;

        if let Ok(mut cache) = self.cache.write() {
            for record in upserts {
                cache.insert(record_key(record.kind, &record.name), record.clone());
            }
            for key in deletes {
                cache.remove(key);
            }
        }
        Ok(())
    }
}

impl FeatureFlags for FlagStore {
    fn is_active(&self, name: &str) -> bool {
        let Ok(cache) = self.cache.read() else {
            return false;
        };
        [FlagKind::Flag, FlagKind::Switch]
            .iter()
            .any(|kind| cache.get(&record_key(*kind, name)).is_some_and(|r| r.active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::flags::{DECLARED_FLAGS, DECLARED_SWITCHES, STORAGE_I18N};
    use tempfile::tempdir;

    fn test_store() -> (FlagStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = FlagStore::open(dir.path().join("flags.redb")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_sync_adds_declared_inactive() {
        let (store, _dir) = test_store();
        let report = store.sync_declared(DECLARED_FLAGS, DECLARED_SWITCHES).unwrap();

        assert_eq!(report.added_flags.len(), DECLARED_FLAGS.len());
        assert_eq!(report.added_switches.len(), DECLARED_SWITCHES.len());
        assert!(report.deleted_flags.is_empty());
        assert!(!store.is_active(STORAGE_I18N));
        assert_eq!(
            store.list().unwrap().len(),
            DECLARED_FLAGS.len() + DECLARED_SWITCHES.len()
        );
    }

    #[test]
    fn test_sync_is_idempotent_and_keeps_state() {
        let (store, _dir) = test_store();
        store.sync_declared(DECLARED_FLAGS, DECLARED_SWITCHES).unwrap();
        assert!(store.set_active(FlagKind::Flag, STORAGE_I18N, true).unwrap());

        let report = store.sync_declared(DECLARED_FLAGS, DECLARED_SWITCHES).unwrap();
        assert!(report.is_noop());
        assert!(store.is_active(STORAGE_I18N));
    }

    #[test]
    fn test_sync_deletes_undeclared() {
        let (store, _dir) = test_store();
        store.sync_declared(&["old_flag", "kept"], &["old_switch"]).unwrap();

        let report = store.sync_declared(&["kept", "new_flag"], &[]).unwrap();
        assert_eq!(report.added_flags, vec!["new_flag"]);
        assert_eq!(report.deleted_flags, vec!["old_flag"]);
        assert_eq!(report.deleted_switches, vec!["old_switch"]);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["kept", "new_flag"]);
    }

    #[test]
    fn test_set_active_unknown_toggle() {
        let (store, _dir) = test_store();
        assert!(!store.set_active(FlagKind::Switch, "missing", true).unwrap());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flags.redb");
        {
            let store = FlagStore::open(path.clone()).unwrap();
            store.sync_declared(&[STORAGE_I18N], &[]).unwrap();
            store.set_active(FlagKind::Flag, STORAGE_I18N, true).unwrap();
        }
        let store = FlagStore::open(path).unwrap();
        assert!(store.is_active(STORAGE_I18N));
    }
}
