//! Local persistence for job records.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::warn;

use reviva_core::{JobKind, OwnerId};

use crate::record::JobRecord;

/// Record store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed persistence for the single resumable record per (owner, kind).
pub trait RecordStore: Send + Sync {
    fn load(&self, owner: &OwnerId, kind: JobKind) -> Result<Option<JobRecord>, StoreError>;

    /// Insert or replace the record for its (owner, kind) slot.
    fn save(&self, record: &JobRecord) -> Result<(), StoreError>;

    fn clear(&self, owner: &OwnerId, kind: JobKind) -> Result<(), StoreError>;

    /// All persisted records; read on process start by `resume()`.
    fn all(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<(OwnerId, JobKind), JobRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn load(&self, owner: &OwnerId, kind: JobKind) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(owner.clone(), kind))
            .cloned())
    }

    fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .insert((record.owner_id.clone(), record.kind), record.clone());
        Ok(())
    }

    fn clear(&self, owner: &OwnerId, kind: JobKind) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(&(owner.clone(), kind));
        Ok(())
    }

    fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

/// Durable store: one JSON document on disk, rewritten on every mutation.
///
/// The record set is at most one small record per (owner, kind), so a full
/// rewrite is cheaper than anything smarter.
#[derive(Debug)]
pub struct JsonFileRecordStore {
    path: PathBuf,
    records: Mutex<HashMap<(OwnerId, JobKind), JobRecord>>,
}

impl JsonFileRecordStore {
    /// Open the store, loading any existing document. A corrupt document is
    /// discarded with a warning rather than blocking startup; the remote
    /// provider remains the source of truth.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<JobRecord>>(&raw) {
                Ok(list) => list
                    .into_iter()
                    .map(|r| ((r.owner_id.clone(), r.kind), r))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding corrupt job record document");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Storage(e.to_string())),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn flush(&self, records: &HashMap<(OwnerId, JobKind), JobRecord>) -> Result<(), StoreError> {
        let list: Vec<&JobRecord> = records.values().collect();
        let raw = serde_json::to_string_pretty(&list)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Storage(e.to_string()))?;
        }
        std::fs::write(&self.path, raw).map_err(|e| StoreError::Storage(e.to_string()))
    }
}

impl RecordStore for JsonFileRecordStore {
    fn load(&self, owner: &OwnerId, kind: JobKind) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(owner.clone(), kind))
            .cloned())
    }

    fn save(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records.insert((record.owner_id.clone(), record.kind), record.clone());
        self.flush(&records)
    }

    fn clear(&self, owner: &OwnerId, kind: JobKind) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records.remove(&(owner.clone(), kind));
        self.flush(&records)
    }

    fn all(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}
