//! Durable dedup memory: the ids of directive messages already acted upon.
//!
//! The record keeps at most [`MAX_PROCESSED_IDS`] ids, sorted descending and
//! free of duplicates. Merges are unions, so applying the same update twice,
//! or two updates in either order, converges on the same record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};
use tokio::sync::Mutex;

use crate::{
    consts::MAX_PROCESSED_IDS,
    core::{back_up_corrupt_file, unix_now_millis, write_json_atomic},
    error::StorageError,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    #[serde(default)]
    pub processed_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<i64>,
}

/// Everything the ledger persists. The install time is written once and
/// bounds how far back backlog replay may reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(default)]
    pub history: ProcessedRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub count: usize,
    pub newest_id: Option<i64>,
    pub oldest_id: Option<i64>,
    pub last_sync_time: Option<i64>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self) -> Result<LedgerDocument, StorageError>;

    async fn store(&self, document: &LedgerDocument) -> Result<(), StorageError>;
}

pub struct ProcessedLedger {
    store: Box<dyn LedgerStore>,
    write_lock: Mutex<()>,
}

impl ProcessedLedger {
    pub fn new(store: impl LedgerStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get_all(&self) -> Result<Vec<i64>, StorageError> {
        Ok(self.store.load().await?.history.processed_ids)
    }

    pub async fn mark_processed(&self, ids: &[i64]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut document = self.store.load().await?;
        document.history.processed_ids = merge_ids(&document.history.processed_ids, ids);
        document.history.last_sync_time = Some(unix_now_millis());
        self.store.store(&document).await?;
        tracing::debug!(
            marked = ids.len(),
            total = document.history.processed_ids.len(),
            "marked messages as processed"
        );
        Ok(())
    }

    pub fn is_processed(id: i64, processed_ids: &[i64]) -> bool {
        processed_ids.contains(&id)
    }

    pub async fn contains(&self, id: i64) -> Result<bool, StorageError> {
        Ok(Self::is_processed(id, &self.get_all().await?))
    }

    pub async fn install_time(&self) -> Result<Option<i64>, StorageError> {
        Ok(self.store.load().await?.install_time)
    }

    /// Records `now` as the install time unless one already exists, and
    /// returns the effective value.
    pub async fn ensure_install_time(&self, now: i64) -> Result<i64, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.store.load().await?;
        if let Some(existing) = document.install_time {
            return Ok(existing);
        }
        document.install_time = Some(now);
        self.store.store(&document).await?;
        tracing::info!(install_time = now, "recorded install time");
        Ok(now)
    }

    pub async fn stats(&self) -> Result<LedgerStats, StorageError> {
        let record = self.store.load().await?.history;
        Ok(LedgerStats {
            count: record.processed_ids.len(),
            newest_id: record.processed_ids.first().copied(),
            oldest_id: record.processed_ids.last().copied(),
            last_sync_time: record.last_sync_time,
        })
    }

    /// Forgets every processed id; the install time is kept.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.store.load().await?;
        document.history = ProcessedRecord::default();
        self.store.store(&document).await
    }
}

pub fn merge_ids(existing: &[i64], incoming: &[i64]) -> Vec<i64> {
    let mut merged: Vec<i64> = existing.iter().chain(incoming).copied().collect();
    merged.sort_unstable_by(|a, b| b.cmp(a));
    merged.dedup();
    merged.truncate(MAX_PROCESSED_IDS);
    merged
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    document: StdMutex<LedgerDocument>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_install_time(install_time: i64) -> Self {
        Self {
            document: StdMutex::new(LedgerDocument {
                install_time: Some(install_time),
                ..LedgerDocument::default()
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<LedgerDocument, StorageError> {
        Ok(self
            .document
            .lock()
            .map(|document| document.clone())
            .unwrap_or_default())
    }

    async fn store(&self, document: &LedgerDocument) -> Result<(), StorageError> {
        if let Ok(mut current) = self.document.lock() {
            *current = document.clone();
        }
        Ok(())
    }
}

/// JSON ledger file next to the settings file.
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    async fn load(&self) -> Result<LedgerDocument, StorageError> {
        if !self.path.exists() {
            return Ok(LedgerDocument::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StorageError::Read {
            what: "processed ledger",
            source,
        })?;
        match serde_json::from_str::<LedgerDocument>(&content) {
            Ok(mut document) => {
                // Hand-edited files may be unsorted or oversized.
                document.history.processed_ids = merge_ids(&document.history.processed_ids, &[]);
                Ok(document)
            }
            Err(error) => {
                tracing::warn!(%error, "processed ledger unreadable, starting fresh");
                back_up_corrupt_file(&self.path);
                Ok(LedgerDocument::default())
            }
        }
    }

    async fn store(&self, document: &LedgerDocument) -> Result<(), StorageError> {
        write_json_atomic(&self.path, document, "processed ledger")
    }
}
