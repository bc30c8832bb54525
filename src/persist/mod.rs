//! Object Store Persistence Core
//!
//! Durable persistence for the analytics dataset over a backing store
//! that only offers whole-file operations. Three emulations the store
//! does not provide natively:
//!
//! - an appendable log (segment files with size-based rotation),
//! - a merged read over many segments (bounded-concurrency fan-out),
//! - a permission-scoped, lazily-expiring task queue.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher ─┬─ SegmentedLog (deltas)   ─┐
//!             ├─ SegmentedLog (interest) ─┤
//!             ├─ SnapshotStore           ─┼─ ObjectStore
//!             └─ TaskStore               ─┘
//! ```
//!
//! Requests are handled by short-lived, stateless invocations; there is
//! no in-process long-lived state and no background timer.

pub mod actor;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod object_store;
pub mod segment_log;
pub mod snapshot;
pub mod tasks;

pub use actor::{normalize, owns_task, Actor, Role, TokenVerifier};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::{LogConfig, PersistConfig, SnapshotConfig, TaskConfig};
pub use fetch::map_concurrent;
pub use object_store::{
    FileContent, FileHandle, InMemoryObjectStore, LocalFsObjectStore, ObjectStore, StoreError,
    StoreResult,
};
pub use segment_log::{AppendOutcome, AppendStatus, ContainerShape, LogError, SegmentedLog};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use tasks::{RestoreOutcome, TaskCollection, TaskError, TaskKind, TaskRecord, TaskStore};
