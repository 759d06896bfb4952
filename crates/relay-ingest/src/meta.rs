//! File metadata records and their audit history.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_store::RemotePath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Lifecycle state of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// Present on the remote and matching its record.
    Active,
    /// Remote content no longer matches the recorded hash.
    Desync,
    /// Recorded but not found on the remote.
    Missing,
    /// Deleted through the gateway. Kept for history.
    Deleted,
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Upload,
    Update,
    Delete,
    Desync,
}

/// One tracked remote file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: RemotePath,
    pub file_name: String,
    pub extension: Option<String>,
    pub mime_type: String,
    pub size: u64,
    /// SHA-256 hex of the stored content. Absent for files that predate
    /// tracking; backfilled lazily on first update attempt.
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One audit entry. Old and new values are kept so a change can be
/// traced in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub path: RemotePath,
    pub action: HistoryAction,
    pub old_etag: Option<String>,
    pub new_etag: Option<String>,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub changed_by: String,
    pub at: DateTime<Utc>,
}

/// Persistence seam for file records and history.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_by_path(&self, path: &RemotePath) -> Result<Option<FileRecord>>;

    async fn create(&self, record: FileRecord) -> Result<()>;

    /// Backfills hash and etag on an existing record.
    async fn update_hash_and_etag(
        &self,
        path: &RemotePath,
        content_hash: &str,
        etag: &str,
    ) -> Result<()>;

    async fn update_status(&self, path: &RemotePath, status: FileStatus) -> Result<()>;

    /// Records the result of a successful overwrite.
    async fn update_size_hash_etag(
        &self,
        path: &RemotePath,
        size: u64,
        content_hash: &str,
        etag: &str,
    ) -> Result<()>;

    async fn create_history_entry(&self, entry: HistoryEntry) -> Result<()>;
}

/// In-memory [`MetadataStore`] for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<RemotePath, FileRecord>>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        match self.history.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_record<R>(
        &self,
        path: &RemotePath,
        apply: impl FnOnce(&mut FileRecord) -> R,
    ) -> Result<R> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let record = records
            .get_mut(path)
            .ok_or_else(|| Error::Metadata(format!("no record for {path}")))?;
        record.updated_at = Utc::now();
        Ok(apply(record))
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn find_by_path(&self, path: &RemotePath) -> Result<Option<FileRecord>> {
        let records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.get(path).cloned())
    }

    async fn create(&self, record: FileRecord) -> Result<()> {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert(record.path.clone(), record);
        Ok(())
    }

    async fn update_hash_and_etag(
        &self,
        path: &RemotePath,
        content_hash: &str,
        etag: &str,
    ) -> Result<()> {
        self.with_record(path, |record| {
            record.content_hash = Some(content_hash.to_string());
            record.etag = Some(etag.to_string());
        })
    }

    async fn update_status(&self, path: &RemotePath, status: FileStatus) -> Result<()> {
        self.with_record(path, |record| {
            record.status = status;
        })
    }

    async fn update_size_hash_etag(
        &self,
        path: &RemotePath,
        size: u64,
        content_hash: &str,
        etag: &str,
    ) -> Result<()> {
        self.with_record(path, |record| {
            record.size = size;
            record.content_hash = Some(content_hash.to_string());
            record.etag = Some(etag.to_string());
        })
    }

    async fn create_history_entry(&self, entry: HistoryEntry) -> Result<()> {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(entry);
        Ok(())
    }
}
