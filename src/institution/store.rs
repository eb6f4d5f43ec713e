//! Institution directory backed by redb.

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

use super::types::Institution;

/// Institution table: id -> MessagePack<Institution>.
const INSTITUTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("institutions");

/// Read-only institution lookup used by the SSO flow.
pub trait InstitutionDirectory: Send + Sync {
    /// Look up a live institution. Deleted institutions are not returned.
    fn lookup(&self, id: &str) -> Result<Option<Institution>>;
}

/// Institution store with an in-memory cache.
pub struct InstitutionStore {
    db: Database,
    cache: RwLock<HashMap<String, Institution>>,
}

impl InstitutionStore {
    /// Open or create an institution store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open institution database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(INSTITUTIONS_TABLE)?;
        }
        write_txn.commit()?;

        let mut cache = HashMap::new();
        {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(INSTITUTIONS_TABLE)?;
            for entry in table.iter()? {
                let (_, value) = entry?;
                match rmp_serde::from_slice::<Institution>(value.value()) {
                    Ok(institution) => {
                        cache.insert(institution.id.clone(), institution);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to deserialize institution during load, skipping");
                    }
                }
            }
        }
        debug!(institutions = cache.len(), "Loaded institutions into cache");

        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    /// Insert or replace an institution.
    pub fn upsert(&self, institution: Institution) -> Result<Institution> {
        let data =
            rmp_serde::to_vec_named(&institution).context("Failed to serialize institution")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(INSTITUTIONS_TABLE)?;
            table.insert(institution.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(institution.id.clone(), institution.clone());
        }

        Ok(institution)
    }

    /// Get an institution by id, including deleted ones.
    pub fn get(&self, id: &str) -> Result<Option<Institution>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(institution) = cache.get(id) {
                return Ok(Some(institution.clone()));
            }
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSTITUTIONS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(
                rmp_serde::from_slice(value.value()).context("Failed to deserialize institution")?,
            )),
            None => Ok(None),
        }
    }

    /// All institutions sorted by id.
    pub fn list(&self) -> Result<Vec<Institution>> {
        let mut institutions: Vec<Institution> = match self.cache.read() {
            Ok(cache) => cache.values().cloned().collect(),
            Err(_) => {
                let read_txn = self.db.begin_read()?;
                let table = read_txn.open_table(INSTITUTIONS_TABLE)?;
                let mut out = Vec::new();
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    out.push(rmp_serde::from_slice(value.value())?);
                }
                out
            }
        };
        institutions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(institutions)
    }

    pub fn count(&self) -> Result<usize> {
        if let Ok(cache) = self.cache.read() {
            return Ok(cache.len());
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(INSTITUTIONS_TABLE)?;
        Ok(table.len()? as usize)
    }
}

impl InstitutionDirectory for InstitutionStore {
    fn lookup(&self, id: &str) -> Result<Option<Institution>> {
        Ok(self.get(id)?.filter(|institution| !institution.is_deleted))
    }
}
