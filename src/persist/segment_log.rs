//! Segmented Append Log
//!
//! Emulates an appendable log over a store that only supports whole-file
//! writes. The log is a folder of segment files named `prefix{N}.ext`
//! with a strictly increasing integer suffix; the first segment may be
//! unsuffixed. At most one segment is open for append at a time: the
//! highest-numbered segment whose listed size is below the rotation
//! threshold.
//!
//! ## Append
//!
//! 1. List and sort segments (unsuffixed first, then by suffix).
//! 2. Candidate = last sorted segment, or a fresh segment at index 1.
//! 3. Candidate at/over threshold: create `prefix{N+1}.ext`, never read.
//! 4. Otherwise read, parse the container, push the record, and write
//!    back conditionally on the version observed at read time.
//! 5. Read or parse failure on an in-threshold candidate: rotate forward
//!    to a new segment instead of retrying. Forward progress over
//!    consistency; a transient read failure must never block writers.
//!
//! A lost conditional write (version conflict) or a create race re-runs
//! the whole selection loop, bounded by `MAX_APPEND_ATTEMPTS`. This
//! closes the lost-update window of a plain read-modify-write.

use crate::persist::config::LogConfig;
use crate::persist::fetch::map_concurrent;
use crate::persist::object_store::{FileHandle, ObjectStore, StoreError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// Concurrency bound for full-log reads
const READ_CONCURRENCY: usize = 8;
/// Concurrency bound for bulk deletes
const DELETE_CONCURRENCY: usize = 5;
/// Selection-loop retries before an append gives up
const MAX_APPEND_ATTEMPTS: u32 = 5;

/// Record container shape, a fixed property of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerShape {
    /// Bare JSON array of records
    Array,
    /// JSON object with a `deltas` array
    Deltas,
}

#[derive(Deserialize)]
struct DeltasDoc {
    deltas: Vec<Value>,
}

impl ContainerShape {
    /// Parse a segment body into its records
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
        match self {
            ContainerShape::Array => serde_json::from_slice(bytes),
            ContainerShape::Deltas => {
                let doc: DeltasDoc = serde_json::from_slice(bytes)?;
                Ok(doc.deltas)
            }
        }
    }

    /// Serialize records into a segment body
    pub fn to_bytes(&self, records: &[Value]) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ContainerShape::Array => serde_json::to_vec(records),
            ContainerShape::Deltas => {
                serde_json::to_vec(&serde_json::json!({ "deltas": records }))
            }
        }
    }
}

/// Error type for log operations
#[derive(Debug)]
pub enum LogError {
    /// Object store failure
    Store(StoreError),
    /// Record or container serialization failure
    Json(serde_json::Error),
    /// Append lost every selection-loop attempt to concurrent writers
    RetriesExhausted(u32),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Store(e) => write!(f, "Store error: {}", e),
            LogError::Json(e) => write!(f, "JSON error: {}", e),
            LogError::RetriesExhausted(n) => {
                write!(f, "Append retries exhausted after {} attempts", n)
            }
        }
    }
}

impl std::error::Error for LogError {}

impl From<StoreError> for LogError {
    fn from(e: StoreError) -> Self {
        LogError::Store(e)
    }
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        LogError::Json(e)
    }
}

/// Outcome of an append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Whether the record went into an existing or a fresh segment
    pub status: AppendStatus,
    /// Id of the segment file written
    pub file_id: String,
    /// Name of the segment file written
    pub file_name: String,
}

/// How the append landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendStatus {
    /// Record appended to the open segment
    Appended,
    /// A new segment was created for the record
    Created,
}

impl AppendStatus {
    /// Wire name for the status
    pub fn as_str(&self) -> &'static str {
        match self {
            AppendStatus::Appended => "appended",
            AppendStatus::Created => "created",
        }
    }
}

/// One logical append log over a folder of segment files
pub struct SegmentedLog<S: ObjectStore> {
    store: S,
    config: LogConfig,
    shape: ContainerShape,
}

impl<S: ObjectStore + Clone> Clone for SegmentedLog<S> {
    fn clone(&self) -> Self {
        SegmentedLog {
            store: self.store.clone(),
            config: self.config.clone(),
            shape: self.shape,
        }
    }
}

impl<S: ObjectStore> SegmentedLog<S> {
    /// Create a log instance over the given folder
    pub fn new(store: S, config: LogConfig, shape: ContainerShape) -> Self {
        SegmentedLog {
            store,
            config,
            shape,
        }
    }

    /// Ordinal embedded in a segment name, if the name belongs to this log.
    ///
    /// The unsuffixed first segment maps to ordinal 0, so a numbered
    /// successor always sorts after it.
    fn segment_ordinal(&self, name: &str) -> Option<u64> {
        let suffix = format!(".{}", self.config.extension);
        let stem = name.strip_suffix(&suffix)?;
        let digits = stem.strip_prefix(&self.config.prefix)?;
        if digits.is_empty() {
            return Some(0);
        }
        digits.parse().ok()
    }

    fn segment_name(&self, ordinal: u64) -> String {
        format!(
            "{}{}.{}",
            self.config.prefix, ordinal, self.config.extension
        )
    }

    /// List this log's segments, sorted by embedded ordinal ascending
    async fn list_segments(&self) -> Result<Vec<(u64, FileHandle)>, LogError> {
        let handles = self.store.list(&self.config.folder).await?;
        let mut segments: Vec<(u64, FileHandle)> = handles
            .into_iter()
            .filter_map(|h| self.segment_ordinal(&h.name).map(|ord| (ord, h)))
            .collect();
        segments.sort_by_key(|(ord, _)| *ord);
        Ok(segments)
    }

    /// Append one record, rotating segments at the configured threshold.
    ///
    /// Retries the whole selection loop on version conflicts and create
    /// races so that no concurrent writer's record is silently dropped.
    pub async fn append(&self, record: &Value) -> Result<AppendOutcome, LogError> {
        for _ in 0..MAX_APPEND_ATTEMPTS {
            match self.try_append(record).await {
                Ok(outcome) => return Ok(outcome),
                Err(LogError::Store(StoreError::Conflict { .. }))
                | Err(LogError::Store(StoreError::AlreadyExists(_))) => {
                    info!(
                        folder = %self.config.folder,
                        "append raced with a concurrent writer, re-selecting segment"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(LogError::RetriesExhausted(MAX_APPEND_ATTEMPTS))
    }

    async fn try_append(&self, record: &Value) -> Result<AppendOutcome, LogError> {
        let segments = self.list_segments().await?;

        let next_index = match segments.last() {
            None => 1,
            Some((ordinal, handle)) => {
                if handle.size_bytes >= self.config.rotation_threshold_bytes {
                    // Oversized open segment: rotate, never read it
                    ordinal + 1
                } else {
                    match self.append_to_segment(handle, record).await {
                        Ok(outcome) => return Ok(outcome),
                        Err(AppendToSegmentError::Fatal(e)) => return Err(e),
                        Err(AppendToSegmentError::Unreadable(e)) => {
                            // Forward progress over consistency: rotate past
                            // the segment we could not read back
                            warn!(
                                folder = %self.config.folder,
                                segment = %handle.name,
                                error = %e,
                                "open segment unreadable, rotating to a new segment"
                            );
                            ordinal + 1
                        }
                    }
                }
            }
        };

        let name = self.segment_name(next_index);
        let bytes = self.shape.to_bytes(std::slice::from_ref(record))?;
        let handle = self
            .store
            .create(&self.config.folder, &name, &bytes)
            .await?;
        Ok(AppendOutcome {
            status: AppendStatus::Created,
            file_id: handle.id,
            file_name: handle.name,
        })
    }

    async fn append_to_segment(
        &self,
        handle: &FileHandle,
        record: &Value,
    ) -> Result<AppendOutcome, AppendToSegmentError> {
        let content = match self.store.read(&handle.id).await {
            Ok(content) => content,
            Err(e) => return Err(AppendToSegmentError::Unreadable(LogError::Store(e))),
        };
        let mut records = match self.shape.parse(&content.data) {
            Ok(records) => records,
            Err(e) => return Err(AppendToSegmentError::Unreadable(LogError::Json(e))),
        };
        records.push(record.clone());

        let bytes = self
            .shape
            .to_bytes(&records)
            .map_err(|e| AppendToSegmentError::Fatal(LogError::Json(e)))?;
        self.store
            .update(&handle.id, &bytes, Some(&content.version))
            .await
            .map_err(|e| AppendToSegmentError::Fatal(LogError::Store(e)))?;

        Ok(AppendOutcome {
            status: AppendStatus::Appended,
            file_id: handle.id.clone(),
            file_name: handle.name.clone(),
        })
    }

    /// Read every record across all segments.
    ///
    /// A segment that fails to read or parse contributes nothing instead
    /// of aborting the call. Order across segments is undefined.
    pub async fn read_all(&self) -> Result<Vec<Value>, LogError> {
        let segments = self.list_segments().await?;

        // Zero-byte segments cannot parse; skip the doomed read
        let handles: Vec<FileHandle> = segments
            .into_iter()
            .filter(|(_, h)| h.size_bytes > 0)
            .map(|(_, h)| h)
            .collect();

        let per_segment = map_concurrent(handles, READ_CONCURRENCY, |handle| {
            let store = &self.store;
            let shape = self.shape;
            async move {
                match store.read(&handle.id).await {
                    Ok(content) => match shape.parse(&content.data) {
                        Ok(records) => records,
                        Err(e) => {
                            warn!(segment = %handle.name, error = %e, "skipping unparsable segment");
                            Vec::new()
                        }
                    },
                    Err(e) => {
                        warn!(segment = %handle.name, error = %e, "skipping unreadable segment");
                        Vec::new()
                    }
                }
            }
        })
        .await;

        Ok(per_segment.into_iter().flatten().collect())
    }

    /// Delete every segment, tolerating individual failures.
    ///
    /// Returns the number of segments actually deleted.
    pub async fn clear_all(&self) -> Result<usize, LogError> {
        let segments = self.list_segments().await?;

        let outcomes = map_concurrent(segments, DELETE_CONCURRENCY, |(_, handle)| {
            let store = &self.store;
            async move {
                match store.delete(&handle.id).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(segment = %handle.name, error = %e, "failed to delete segment");
                        false
                    }
                }
            }
        })
        .await;

        Ok(outcomes.into_iter().filter(|ok| *ok).count())
    }
}

enum AppendToSegmentError {
    /// Candidate could not be read or parsed; caller rotates forward
    Unreadable(LogError),
    /// Write-side failure; caller propagates (conflicts retry upstream)
    Fatal(LogError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::object_store::InMemoryObjectStore;
    use serde_json::json;

    fn delta_log(store: InMemoryObjectStore, threshold: u64) -> SegmentedLog<InMemoryObjectStore> {
        SegmentedLog::new(
            store,
            LogConfig {
                folder: "analytics_deltas".to_string(),
                prefix: "savepoints".to_string(),
                extension: "json".to_string(),
                rotation_threshold_bytes: threshold,
            },
            ContainerShape::Deltas,
        )
    }

    fn interest_log(store: InMemoryObjectStore) -> SegmentedLog<InMemoryObjectStore> {
        SegmentedLog::new(
            store,
            LogConfig {
                folder: "interest_points".to_string(),
                prefix: "interest_points".to_string(),
                extension: "json".to_string(),
                rotation_threshold_bytes: 500_000,
            },
            ContainerShape::Array,
        )
    }

    #[tokio::test]
    async fn test_first_append_creates_segment_one() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store, 250_000);

        let outcome = log.append(&json!({"a": 1})).await.unwrap();
        assert_eq!(outcome.status, AppendStatus::Created);
        assert_eq!(outcome.file_name, "savepoints1.json");
    }

    #[tokio::test]
    async fn test_appends_land_in_open_segment_until_threshold() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store.clone(), 250_000);

        log.append(&json!({"n": 1})).await.unwrap();
        let second = log.append(&json!({"n": 2})).await.unwrap();
        let third = log.append(&json!({"n": 3})).await.unwrap();
        assert_eq!(second.status, AppendStatus::Appended);
        assert_eq!(third.file_name, "savepoints1.json");

        // Inflate the open segment past the threshold; the next append
        // must rotate and never touch the oversized file
        let inflated = format!("{{\"deltas\": [{}]}}", "1,".repeat(300_000).trim_end_matches(','));
        store.put_raw("analytics_deltas/savepoints1.json", inflated.into_bytes());

        let fourth = log.append(&json!({"n": 4})).await.unwrap();
        assert_eq!(fourth.status, AppendStatus::Created);
        assert_eq!(fourth.file_name, "savepoints2.json");

        let records = log.read_all().await.unwrap();
        let fours: Vec<_> = records.iter().filter(|r| r["n"] == 4).collect();
        assert_eq!(fours.len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_at_exact_threshold() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store.clone(), 50);

        log.append(&json!({"pad": "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}))
            .await
            .unwrap();
        // savepoints1.json now holds >= 50 bytes
        let outcome = log.append(&json!({"n": 2})).await.unwrap();
        assert_eq!(outcome.status, AppendStatus::Created);
        assert_eq!(outcome.file_name, "savepoints2.json");
    }

    #[tokio::test]
    async fn test_read_all_merges_segments() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store, 60);

        for i in 0..6 {
            log.append(&json!({"n": i, "pad": "aaaaaaaaaaaaaaaaaaaa"}))
                .await
                .unwrap();
        }

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 6);
        let mut ns: Vec<i64> = records.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        ns.sort_unstable();
        assert_eq!(ns, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_read_all_skips_corrupt_segment() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store.clone(), 60);

        for i in 0..4 {
            log.append(&json!({"n": i, "pad": "aaaaaaaaaaaaaaaaaaaa"}))
                .await
                .unwrap();
        }
        let before = log.read_all().await.unwrap().len();

        store.put_raw(
            "analytics_deltas/savepoints1.json",
            b"{not json at all".to_vec(),
        );

        let records = log.read_all().await.unwrap();
        assert!(records.len() < before);
        assert!(!records.is_empty(), "other segments must still contribute");
    }

    #[tokio::test]
    async fn test_read_all_skips_zero_byte_segment() {
        let store = InMemoryObjectStore::new();
        let log = interest_log(store.clone());

        log.append(&json!({"p": 1})).await.unwrap();
        store.put_raw("interest_points/interest_points2.json", Vec::new());

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_open_segment_rotates_forward() {
        let store = InMemoryObjectStore::new();
        let log = interest_log(store.clone());

        log.append(&json!({"p": 1})).await.unwrap();
        // Corrupt the open segment while it is still under the threshold
        store.put_raw(
            "interest_points/interest_points1.json",
            b"garbage".to_vec(),
        );

        let outcome = log.append(&json!({"p": 2})).await.unwrap();
        assert_eq!(outcome.status, AppendStatus::Created);
        assert_eq!(outcome.file_name, "interest_points2.json");
    }

    #[tokio::test]
    async fn test_unsuffixed_first_segment_sorts_first() {
        let store = InMemoryObjectStore::new();
        store.put_raw(
            "interest_points/interest_points.json",
            serde_json::to_vec(&json!([{"p": 0}])).unwrap(),
        );
        store.put_raw(
            "interest_points/interest_points1.json",
            serde_json::to_vec(&json!([{"p": 1}])).unwrap(),
        );
        let log = interest_log(store);

        // The numbered successor, not the unsuffixed file, is open
        let outcome = log.append(&json!({"p": 2})).await.unwrap();
        assert_eq!(outcome.status, AppendStatus::Appended);
        assert_eq!(outcome.file_name, "interest_points1.json");

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_foreign_files_ignored() {
        let store = InMemoryObjectStore::new();
        store.put_raw("interest_points/readme.txt", b"not a segment".to_vec());
        store.put_raw(
            "interest_points/interest_pointsX.json",
            b"[1]".to_vec(),
        );
        let log = interest_log(store);

        let records = log.read_all().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_deletes_segments() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store.clone(), 60);

        for i in 0..4 {
            log.append(&json!({"n": i, "pad": "aaaaaaaaaaaaaaaaaaaa"}))
                .await
                .unwrap();
        }
        let deleted = log.clear_all().await.unwrap();
        assert!(deleted >= 2);
        assert!(log.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_both_survive() {
        let store = InMemoryObjectStore::new();
        let log = delta_log(store, 250_000);
        log.append(&json!({"n": 0})).await.unwrap();

        let log_a = log.clone();
        let log_b = log.clone();
        let rec_a = json!({"n": 1});
        let rec_b = json!({"n": 2});
        let (a, b) = tokio::join!(log_a.append(&rec_a), log_b.append(&rec_b));
        a.unwrap();
        b.unwrap();

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 3, "no append may be silently lost");
    }

    #[test]
    fn test_container_shapes() {
        let records = vec![json!({"a": 1}), json!({"b": 2})];

        let arr = ContainerShape::Array.to_bytes(&records).unwrap();
        assert_eq!(ContainerShape::Array.parse(&arr).unwrap(), records);

        let doc = ContainerShape::Deltas.to_bytes(&records).unwrap();
        assert!(serde_json::from_slice::<Value>(&doc).unwrap()["deltas"].is_array());
        assert_eq!(ContainerShape::Deltas.parse(&doc).unwrap(), records);

        // Wrong shape is a parse error, not a silent empty list
        assert!(ContainerShape::Deltas.parse(&arr).is_err());
    }
}
