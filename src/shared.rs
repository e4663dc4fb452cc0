use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::filter::RecordFilter;
use crate::record::{Input, Record};
use crate::store::{AppendReport, DuplicatePolicy, RecordStore};

/// Metadata about the last write of the records file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub hash: String,
    pub saved_at: String,
    pub records_count: u64,
    /// Time spent serializing and writing the file.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// The process-wide record store, shared by the HTTP handlers and the refresh
/// scheduler. Every read and mutation goes through one `RwLock`.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<RecordStore>>,
    path: Arc<PathBuf>,
    persist_lock: Arc<Mutex<()>>,
}

impl SharedStore {
    pub fn new(store: RecordStore, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
            path: Arc::new(path.into()),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load the records file at `path` and wrap it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let store = RecordStore::load(&path)?;
        info!(path = %path.display(), records = store.len(), "records loaded");
        Ok(Self::new(store, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Record> {
        self.inner.read().await.records().to_vec()
    }

    pub async fn get(&self, record_id: &str) -> Result<Record, StoreError> {
        self.inner.read().await.get(record_id).cloned()
    }

    pub async fn filter(&self, filter: &RecordFilter) -> Vec<Record> {
        self.inner.read().await.filter(filter).cloned().collect()
    }

    pub async fn distinct(&self, field: &str) -> Vec<Value> {
        self.inner.read().await.distinct(field)
    }

    pub async fn create(&self, input: &Input) -> Result<Record, StoreError> {
        self.inner.write().await.create(input)
    }

    pub async fn create_scoped(
        &self,
        input: &Input,
        filter: &RecordFilter,
    ) -> Result<Record, StoreError> {
        self.inner.write().await.create_scoped(input, filter)
    }

    pub async fn update(&self, record_id: &str, input: &Input) -> Result<Record, StoreError> {
        self.inner.write().await.update(record_id, input)
    }

    pub async fn delete(&self, record_id: &str) -> bool {
        self.inner.write().await.delete(record_id)
    }

    /// Append fetched entries and persist the result as one step.
    ///
    /// The write lock is held until the file is written. If the write fails
    /// the appended entries are removed again, so the store never holds a
    /// refresh that is not on disk.
    pub async fn append_and_persist(
        &self,
        records: Vec<Record>,
        policy: DuplicatePolicy,
    ) -> Result<(AppendReport, Meta), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let started = Instant::now();
        let mut store = self.inner.write().await;

        let before = store.len();
        let report = store.append_fetched(records, policy);
        let written = match store.to_json() {
            Ok(bytes) => self.write_file(&bytes).await,
            Err(e) => Err(e),
        };

        match written {
            Ok(hash) => Ok((report, self.meta(hash, store.len(), started))),
            Err(e) => {
                store.truncate(before);
                warn!(
                    path = %self.path.display(),
                    dropped = report.appended,
                    error = %e,
                    "records file not written, fetched entries dropped"
                );
                Err(e)
            }
        }
    }

    /// Write the whole sequence to the records file, replacing it.
    ///
    /// The snapshot is taken under the read lock; the file is written outside
    /// of it.
    pub async fn persist(&self) -> Result<Meta, StoreError> {
        let _guard = self.persist_lock.lock().await;
        let started = Instant::now();

        let (bytes, records_count) = {
            let store = self.inner.read().await;
            (store.to_json()?, store.len())
        };

        let hash = self.write_file(&bytes).await?;
        Ok(self.meta(hash, records_count, started))
    }

    /// Write `bytes` to a sibling temp path and rename it over the target.
    /// Returns the sha1 of the bytes.
    async fn write_file(&self, bytes: &[u8]) -> Result<String, StoreError> {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        let hash = format!("{:x}", hasher.finalize());

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.display().to_string(),
                source,
            })?;
        tokio::fs::rename(&tmp, self.path.as_path())
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(hash)
    }

    fn meta(&self, hash: String, records_count: usize, started: Instant) -> Meta {
        let meta = Meta {
            hash,
            saved_at: Utc::now().to_rfc3339(),
            records_count: records_count as u64,
            elapsed: started.elapsed(),
        };
        info!(
            path = %self.path.display(),
            records = meta.records_count,
            hash = %meta.hash,
            saved_at = %meta.saved_at,
            "records file written"
        );
        meta
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
