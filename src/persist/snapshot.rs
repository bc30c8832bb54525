//! Snapshot Chunk Store
//!
//! One metadata file plus N numbered data-chunk files in a single
//! folder. Unlike the segmented log, chunks are addressed by ordinal
//! position: callers write a given chunk index directly, typically when
//! re-saving a full snapshot in place.
//!
//! The meta file is pinned to ordinal 0 by its `_meta` marker regardless
//! of its name; chunks sort after it by their embedded numeric suffix.
//! `chunk_count` is derived from the folder listing at read time, never
//! persisted.

use crate::persist::config::SnapshotConfig;
use crate::persist::fetch::map_concurrent;
use crate::persist::object_store::{FileHandle, ObjectStore, StoreError};
use serde_json::Value;
use tracing::warn;

/// Concurrency bound for retention deletes
const CLEANUP_CONCURRENCY: usize = 5;

/// Error type for snapshot operations
#[derive(Debug)]
pub enum SnapshotError {
    /// Object store failure
    Store(StoreError),
    /// Meta file body was not a JSON object
    Json(serde_json::Error),
    /// No meta file exists in the snapshot folder
    MetaMissing,
    /// No file exists at the requested ordinal
    ChunkMissing(usize),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Store(e) => write!(f, "Store error: {}", e),
            SnapshotError::Json(e) => write!(f, "JSON error: {}", e),
            SnapshotError::MetaMissing => write!(f, "Snapshot meta file not found"),
            SnapshotError::ChunkMissing(ordinal) => {
                write!(f, "No chunk file at ordinal {}", ordinal)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<StoreError> for SnapshotError {
    fn from(e: StoreError) -> Self {
        SnapshotError::Store(e)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Json(e)
    }
}

/// Manages the snapshot meta file and its ordinal-addressed chunks
pub struct SnapshotStore<S: ObjectStore> {
    store: S,
    config: SnapshotConfig,
}

impl<S: ObjectStore + Clone> Clone for SnapshotStore<S> {
    fn clone(&self) -> Self {
        SnapshotStore {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

/// Trailing digit run of a file stem, e.g. `snapshot_chunk_17.json` -> 17
fn embedded_index(name: &str) -> Option<u64> {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn is_meta_name(name: &str) -> bool {
    name.contains("_meta")
}

impl<S: ObjectStore> SnapshotStore<S> {
    /// Create a snapshot store over the given folder
    pub fn new(store: S, config: SnapshotConfig) -> Self {
        SnapshotStore { store, config }
    }

    /// List snapshot files: meta pinned to position 0, chunks ascending
    /// by embedded index.
    pub async fn list_ordered(&self) -> Result<Vec<FileHandle>, SnapshotError> {
        let handles = self.store.list(&self.config.folder).await?;
        let mut files: Vec<FileHandle> = handles
            .into_iter()
            .filter(|h| h.name.contains(&self.config.marker) || is_meta_name(&h.name))
            .collect();
        files.sort_by_key(|h| {
            if is_meta_name(&h.name) {
                (0u8, 0u64)
            } else {
                (1u8, embedded_index(&h.name).unwrap_or(u64::MAX))
            }
        });
        Ok(files)
    }

    /// Write one chunk at the given ordinal.
    ///
    /// A known `target_file_id` (the common re-save case) is updated in
    /// place; otherwise the ordinal is resolved through `list_ordered`,
    /// and a fresh chunk file is created if nothing exists there yet.
    pub async fn write_chunk(
        &self,
        ordinal: usize,
        bytes: &[u8],
        target_file_id: Option<&str>,
    ) -> Result<String, SnapshotError> {
        if let Some(file_id) = target_file_id {
            self.store.update(file_id, bytes, None).await?;
            return Ok(file_id.to_string());
        }

        // Position 0 is the meta file, so chunk N lives at index N + 1
        let files = self.list_ordered().await?;
        if let Some(handle) = files.get(ordinal + 1) {
            self.store.update(&handle.id, bytes, None).await?;
            return Ok(handle.id.clone());
        }

        let name = format!("snapshot_chunk_{}.json", ordinal);
        let handle = self.store.create(&self.config.folder, &name, bytes).await?;
        Ok(handle.id)
    }

    /// Write the snapshot meta document, creating the ordinal-0 file if
    /// it does not exist yet.
    pub async fn write_meta(&self, bytes: &[u8]) -> Result<String, SnapshotError> {
        let files = self.list_ordered().await?;
        match files.first() {
            Some(handle) if is_meta_name(&handle.name) => {
                self.store.update(&handle.id, bytes, None).await?;
                Ok(handle.id.clone())
            }
            _ => {
                let handle = self
                    .store
                    .create(&self.config.folder, &self.config.meta_name, bytes)
                    .await?;
                Ok(handle.id)
            }
        }
    }

    /// Read the snapshot meta document with its derived `chunkCount`.
    pub async fn read_meta(&self) -> Result<Value, SnapshotError> {
        let files = self.list_ordered().await?;
        let meta_handle = match files.first() {
            Some(handle) if is_meta_name(&handle.name) => handle,
            _ => return Err(SnapshotError::MetaMissing),
        };

        let content = self.store.read(&meta_handle.id).await?;
        // Anything other than a JSON object is a corrupt meta file
        let mut meta: serde_json::Map<String, Value> = serde_json::from_slice(&content.data)?;

        // Derived, never persisted: everything in the folder minus the meta file
        let chunk_count = files.len().saturating_sub(1);
        meta.insert("chunkCount".to_string(), Value::from(chunk_count));
        Ok(Value::Object(meta))
    }

    /// Read one chunk by ordinal.
    pub async fn read_chunk(&self, ordinal: usize) -> Result<Value, SnapshotError> {
        let files = self.list_ordered().await?;
        let handle = files
            .get(ordinal + 1)
            .ok_or(SnapshotError::ChunkMissing(ordinal))?;
        let content = self.store.read(&handle.id).await?;
        Ok(serde_json::from_slice(&content.data)?)
    }

    /// Delete every chunk whose embedded index is `>= keep_count`,
    /// tolerating individual failures. Returns the number deleted.
    pub async fn cleanup(&self, keep_count: usize) -> Result<usize, SnapshotError> {
        let files = self.list_ordered().await?;
        let stale: Vec<FileHandle> = files
            .into_iter()
            .skip(1) // ordinal 0 is the meta file, never retention-deleted
            .filter(|h| {
                embedded_index(&h.name)
                    .map(|idx| idx >= keep_count as u64)
                    .unwrap_or(false)
            })
            .collect();

        let outcomes = map_concurrent(stale, CLEANUP_CONCURRENCY, |handle| {
            let store = &self.store;
            async move {
                match store.delete(&handle.id).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(chunk = %handle.name, error = %e, "failed to delete stale chunk");
                        false
                    }
                }
            }
        })
        .await;

        Ok(outcomes.into_iter().filter(|ok| *ok).count())
    }
}
