//! Object Store Client
//!
//! Thin abstraction over a remote store that only offers whole-file
//! get/create/update/delete — no transactions, no partial writes, no
//! native append. Everything the crate persists goes through this trait.
//!
//! Implementations:
//! - `InMemoryObjectStore`: for unit tests
//! - `LocalFsObjectStore`: for development and local testing
//!
//! No operation is retried internally; callers decide recovery strategy.
//! `update` takes an optional version token so callers can do optimistic
//! concurrency: the write fails with `Conflict` if the stored version
//! moved since the caller's `read`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Handle to a stored file, as returned by `list` and `create`.
///
/// Never cached beyond one request: the size is a point-in-time
/// observation, and the id can go stale under concurrent deletes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHandle {
    /// Store-assigned file identifier
    pub id: String,
    /// File name within its folder
    pub name: String,
    /// Size in bytes at list time
    pub size_bytes: u64,
}

/// File contents plus the version token observed at read time.
#[derive(Debug, Clone)]
pub struct FileContent {
    /// Raw file bytes
    pub data: Vec<u8>,
    /// Opaque version token for conditional updates
    pub version: String,
}

/// Error type for object store operations
#[derive(Debug)]
pub enum StoreError {
    /// File id or name not found (stale handle)
    NotFound(String),
    /// Conditional update lost: stored version moved since read
    Conflict { expected: String, actual: String },
    /// Create raced with another writer of the same name
    AlreadyExists(String),
    /// Transient I/O failure (network, timeout)
    Io(IoError),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "File not found: {}", id),
            StoreError::Conflict { expected, actual } => {
                write!(f, "Version conflict: expected {}, got {}", expected, actual)
            }
            StoreError::AlreadyExists(name) => write!(f, "File already exists: {}", name),
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Other(msg) => write!(f, "Object store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            ErrorKind::AlreadyExists => StoreError::AlreadyExists(e.to_string()),
            _ => StoreError::Io(e),
        }
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store abstraction trait
///
/// Methods return boxed futures so the trait stays object-safe and
/// implementations can be swapped without generics leaking upward.
pub trait ObjectStore: Send + Sync + 'static {
    /// List all files in a folder (name filtering is the caller's job)
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<FileHandle>>> + Send + 'a>>;

    /// Read a file's contents by id
    fn read<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileContent>> + Send + 'a>>;

    /// Create a new file; fails with `AlreadyExists` if the name is taken
    fn create<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileHandle>> + Send + 'a>>;

    /// Overwrite an existing file, returning the new version token.
    ///
    /// When `expected_version` is supplied the write fails with `Conflict`
    /// unless the stored version still matches.
    fn update<'a>(
        &'a self,
        file_id: &'a str,
        data: &'a [u8],
        expected_version: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + 'a>>;

    /// Delete a file by id
    fn delete<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>>;
}

// ============================================================================
// InMemoryObjectStore - For tests
// ============================================================================

/// In-memory object store for unit tests.
///
/// File ids are `folder/name` paths; versions are a global counter so
/// every write observably moves the token.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    inner: Arc<RwLock<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    files: HashMap<String, StoredFile>,
    next_version: u64,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    version: u64,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        InMemoryObjectStore {
            inner: Arc::new(RwLock::new(InMemoryState::default())),
        }
    }

    fn file_id(folder: &str, name: &str) -> String {
        format!("{}/{}", folder, name)
    }

    /// Number of stored files (for testing)
    pub fn len(&self) -> usize {
        self.inner.read().files.len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.inner.read().files.is_empty()
    }

    /// Raw bytes of a file, if present (for test inspection)
    pub fn raw(&self, file_id: &str) -> Option<Vec<u8>> {
        self.inner.read().files.get(file_id).map(|f| f.data.clone())
    }

    /// Replace a file's bytes without moving its folder (for test setup,
    /// e.g. inflating a segment past its rotation threshold)
    pub fn put_raw(&self, file_id: &str, data: Vec<u8>) {
        let mut state = self.inner.write();
        state.next_version += 1;
        let version = state.next_version;
        state.files.insert(file_id.to_string(), StoredFile { data, version });
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryObjectStore {
    fn clone(&self) -> Self {
        InMemoryObjectStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<FileHandle>>> + Send + 'a>> {
        Box::pin(async move {
            let prefix = format!("{}/", folder);
            let state = self.inner.read();
            let mut handles: Vec<FileHandle> = state
                .files
                .iter()
                .filter(|(id, _)| id.starts_with(&prefix))
                .map(|(id, f)| FileHandle {
                    id: id.clone(),
                    name: id[prefix.len()..].to_string(),
                    size_bytes: f.data.len() as u64,
                })
                .collect();

            // Sort by name for consistent ordering
            handles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(handles)
        })
    }

    fn read<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileContent>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .read()
                .files
                .get(file_id)
                .map(|f| FileContent {
                    data: f.data.clone(),
                    version: f.version.to_string(),
                })
                .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
        })
    }

    fn create<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileHandle>> + Send + 'a>> {
        Box::pin(async move {
            let id = Self::file_id(folder, name);
            let mut state = self.inner.write();
            if state.files.contains_key(&id) {
                return Err(StoreError::AlreadyExists(id));
            }
            state.next_version += 1;
            let version = state.next_version;
            state.files.insert(
                id.clone(),
                StoredFile {
                    data: data.to_vec(),
                    version,
                },
            );
            Ok(FileHandle {
                id,
                name: name.to_string(),
                size_bytes: data.len() as u64,
            })
        })
    }

    fn update<'a>(
        &'a self,
        file_id: &'a str,
        data: &'a [u8],
        expected_version: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.write();
            state.next_version += 1;
            let next = state.next_version;
            let file = state
                .files
                .get_mut(file_id)
                .ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
            if let Some(expected) = expected_version {
                let actual = file.version.to_string();
                if actual != expected {
                    return Err(StoreError::Conflict {
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            file.data = data.to_vec();
            file.version = next;
            Ok(next.to_string())
        })
    }

    fn delete<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.write().files.remove(file_id);
            Ok(())
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing.
///
/// File ids are paths relative to the base directory; the version token
/// is a content fingerprint (CRC32 + length), so a conditional update
/// detects any conflicting rewrite that changed the bytes. The
/// check-then-write in `update` is not atomic against another process;
/// this store backs single-process development, not production.
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    fn full_path(&self, file_id: &str) -> PathBuf {
        self.base_path.join(file_id)
    }

    fn version_of(data: &[u8]) -> String {
        format!("{:08x}-{}", crc32fast::hash(data), data.len())
    }

    /// Base directory (for testing)
    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<FileHandle>>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.base_path.join(folder);
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut handles = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(StoreError::from)?;
            while let Some(entry) = entries.next_entry().await.map_err(StoreError::from)? {
                let meta = entry.metadata().await.map_err(StoreError::from)?;
                if !meta.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                handles.push(FileHandle {
                    id: format!("{}/{}", folder, name),
                    name,
                    size_bytes: meta.len(),
                });
            }
            handles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(handles)
        })
    }

    fn read<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileContent>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(file_id);
            let data = tokio::fs::read(&path).await.map_err(StoreError::from)?;
            let version = Self::version_of(&data);
            Ok(FileContent { data, version })
        })
    }

    fn create<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = StoreResult<FileHandle>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.base_path.join(folder);
            tokio::fs::create_dir_all(&dir).await.map_err(StoreError::from)?;
            let path = dir.join(name);
            // create_new opens exclusively: a losing racer gets
            // AlreadyExists from the kernel, never a silent overwrite
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
                .map_err(StoreError::from)?;
            file.write_all(data).await.map_err(StoreError::from)?;
            Ok(FileHandle {
                id: format!("{}/{}", folder, name),
                name: name.to_string(),
                size_bytes: data.len() as u64,
            })
        })
    }

    fn update<'a>(
        &'a self,
        file_id: &'a str,
        data: &'a [u8],
        expected_version: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(file_id);
            let current = tokio::fs::read(&path).await.map_err(StoreError::from)?;
            if let Some(expected) = expected_version {
                let actual = Self::version_of(&current);
                if actual != expected {
                    return Err(StoreError::Conflict {
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            tokio::fs::write(&path, data).await.map_err(StoreError::from)?;
            Ok(Self::version_of(data))
        })
    }

    fn delete<'a>(
        &'a self,
        file_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(file_id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(StoreError::from(e)),
            }
        })
    }
}
