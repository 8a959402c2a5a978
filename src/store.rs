use crate::error::RelayError;
use crate::keys::incident_record_key;
use anyhow::{Context, Result};
use incident_core::model::NotificationRecord;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Byte store addressed by string keys.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), RelayError>;
}

#[derive(Debug, Clone)]
pub struct RedbKvStore {
    db: Arc<Database>,
}

impl RedbKvStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory at {}", parent.display()))?;
        }

        let db =
            Database::create(path).with_context(|| format!("open redb at {}", path.display()))?;
        let write_tx = db
            .begin_write()
            .context("begin write transaction for table init")?;
        {
            write_tx.open_table(KV_TABLE).context("open kv table")?;
        }
        write_tx.commit().context("commit table init transaction")?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RedbKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError> {
        let read_tx = self
            .db
            .begin_read()
            .map_err(|error| store_error("begin read transaction", error))?;
        let table = read_tx
            .open_table(KV_TABLE)
            .map_err(|error| store_error("open kv table", error))?;
        let value = table
            .get(key)
            .map_err(|error| store_error("read kv entry", error))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), RelayError> {
        let write_tx = self
            .db
            .begin_write()
            .map_err(|error| store_error("begin write transaction", error))?;
        {
            let mut table = write_tx
                .open_table(KV_TABLE)
                .map_err(|error| store_error("open kv table", error))?;
            table
                .insert(key, value)
                .map_err(|error| store_error("insert kv entry", error))?;
        }
        write_tx
            .commit()
            .map_err(|error| store_error("commit kv write", error))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RelayError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| RelayError::Store("memory store lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), RelayError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| RelayError::Store("memory store lock poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// JSON persistence of notification records on top of a [`KvStore`].
#[derive(Clone)]
pub struct NotificationStore {
    kv: Arc<dyn KvStore>,
}

impl NotificationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn load(&self, incident_id: &str) -> Result<Option<NotificationRecord>, RelayError> {
        let Some(raw) = self.kv.get(&incident_record_key(incident_id))? else {
            return Ok(None);
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|error| RelayError::Store(format!("deserialize record {incident_id}: {error}")))
    }

    pub fn save(&self, record: &NotificationRecord) -> Result<(), RelayError> {
        let serialized = serde_json::to_vec(record).map_err(|error| {
            RelayError::Store(format!("serialize record {}: {error}", record.incident_id))
        })?;
        self.kv
            .set(&incident_record_key(&record.incident_id), &serialized)
    }

    /// Probes the underlying store; used by readiness checks.
    pub fn ping(&self) -> Result<(), RelayError> {
        self.kv.get("__ready__").map(|_| ())
    }
}

fn store_error(operation: &str, error: impl std::fmt::Display) -> RelayError {
    RelayError::Store(format!("{operation}: {error}"))
}
