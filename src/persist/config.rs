//! Configuration for the Persistence Core
//!
//! Folder names and rotation thresholds for the logical logs and
//! collections. One folder per log/collection; folders never share a
//! file-name namespace.

use serde::{Deserialize, Serialize};

/// Configuration for one segmented log instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Object store folder holding this log's segments
    pub folder: String,
    /// Segment file name prefix (`prefix{N}.ext`)
    pub prefix: String,
    /// Segment file extension, without the dot
    pub extension: String,
    /// Size above which the open segment rotates
    pub rotation_threshold_bytes: u64,
}

/// Configuration for the snapshot chunk store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Object store folder holding meta + chunk files
    pub folder: String,
    /// Substring that marks a file as belonging to the snapshot
    pub marker: String,
    /// Name of the meta file when it has to be created
    pub meta_name: String,
}

/// Configuration for the task lifecycle store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Object store folder holding the two collection documents
    pub folder: String,
    /// File backing the deferred (snoozed) collection
    pub deferred_file: String,
    /// File backing the deleted (audit) collection
    pub deleted_file: String,
}

/// Top-level configuration for the persistence core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Delta (savepoint) log
    pub deltas: LogConfig,
    /// Interest-point log
    pub interest: LogConfig,
    /// Snapshot chunk store
    pub snapshot: SnapshotConfig,
    /// Task lifecycle store
    pub tasks: TaskConfig,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            deltas: LogConfig {
                folder: "analytics_deltas".to_string(),
                prefix: "savepoints".to_string(),
                extension: "json".to_string(),
                rotation_threshold_bytes: 250_000,
            },
            interest: LogConfig {
                folder: "interest_points".to_string(),
                prefix: "interest_points".to_string(),
                extension: "json".to_string(),
                rotation_threshold_bytes: 500_000,
            },
            snapshot: SnapshotConfig {
                folder: "analytics_snapshot".to_string(),
                marker: "snapshot".to_string(),
                meta_name: "system_analytics_snapshot_meta.json".to_string(),
            },
            tasks: TaskConfig {
                folder: "analytics_tasks".to_string(),
                deferred_file: "snoozed_tasks.json".to_string(),
                deleted_file: "deleted_tasks.json".to_string(),
            },
        }
    }
}

impl PersistConfig {
    /// Configuration for tests (tiny thresholds so rotation triggers fast)
    pub fn test() -> Self {
        let mut config = PersistConfig::default();
        config.deltas.rotation_threshold_bytes = 200;
        config.interest.rotation_threshold_bytes = 200;
        config
    }

    /// Parse configuration from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
