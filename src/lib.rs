//! Analytics Store
//!
//! Persistence subsystem of a sales-analytics dashboard. The remote
//! object store only exposes whole-file get/create/update/delete, so
//! this crate emulates an appendable segmented log, a consistent merged
//! read over many segments, and a permission-scoped, time-expiring task
//! queue — tolerating partial failures without server-held locks.

pub mod dispatch;
pub mod persist;

pub use dispatch::{Dispatcher, Request, Response, Verb};
pub use persist::{
    Actor, Clock, InMemoryObjectStore, LocalFsObjectStore, ObjectStore, PersistConfig, Role,
    SegmentedLog, SimulatedClock, SnapshotStore, SystemClock, TaskRecord, TaskStore, TokenVerifier,
};
