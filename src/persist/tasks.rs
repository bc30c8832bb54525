//! Task Lifecycle Store
//!
//! Two whole-document JSON collections: *deferred* (snoozed tasks that
//! self-expire) and *deleted* (a permanent audit trail). Volume is
//! assumed bounded, so there is no segmentation; every mutation is a
//! whole-document read-modify-write guarded by the store's version
//! token.
//!
//! Expiry is lazy: expired snoozes are detected and swept on the next
//! read, never by a background timer. The sweep is a read-triggered
//! write and is idempotent.
//!
//! `restore` intentionally reports one ambiguous outcome for both
//! "id does not exist" and "caller lacks permission", so unauthorized
//! actors cannot probe for record existence.

use crate::persist::actor::{owns_task, Actor};
use crate::persist::clock::Clock;
use crate::persist::config::TaskConfig;
use crate::persist::object_store::{ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Read-modify-write retries before a task mutation gives up
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Kind of lifecycle record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Deferred until `snooze_until`; expires lazily
    Snooze,
    /// Soft-deleted; retained indefinitely as audit
    Delete,
}

/// One lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Record identifier
    pub id: String,
    /// Record kind
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Id of the underlying target this record defers/deletes
    pub target_id: String,
    /// Display name of the target
    #[serde(default)]
    pub target_name: String,
    /// Owner field used for surname matching
    #[serde(default)]
    pub owner: String,
    /// Author email, stamped server-side on create
    #[serde(default)]
    pub user: String,
    /// Free-text reason
    #[serde(default)]
    pub reason: String,
    /// Creation time, Unix ms
    #[serde(default)]
    pub timestamp: u64,
    /// Expiry time for snooze records, Unix ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<u64>,
}

impl TaskRecord {
    fn expired(&self, now_ms: u64) -> bool {
        matches!(self.snooze_until, Some(until) if now_ms > until)
    }
}

/// Which collection a restored record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCollection {
    /// The deferred (snoozed) collection
    Deferred,
    /// The deleted (audit) collection
    Deleted,
}

impl TaskCollection {
    /// Wire name for the collection
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCollection::Deferred => "deferred",
            TaskCollection::Deleted => "deleted",
        }
    }
}

/// Outcome of a restore attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Record removed; the caller re-activates the underlying target
    Restored {
        /// Collection the record was removed from
        collection: TaskCollection,
        /// The removed record
        record: TaskRecord,
    },
    /// Missing id and denied permission look identical on purpose
    NotFoundOrDenied,
}

/// Error type for task operations.
///
/// Any failure here surfaces to the caller as a server error; there is
/// no partial-success state for create/restore.
#[derive(Debug)]
pub enum TaskError {
    /// Object store failure
    Store(StoreError),
    /// Collection document failed to parse
    Json(serde_json::Error),
    /// Mutation lost every retry to concurrent writers
    RetriesExhausted(u32),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Store(e) => write!(f, "Store error: {}", e),
            TaskError::Json(e) => write!(f, "JSON error: {}", e),
            TaskError::RetriesExhausted(n) => {
                write!(f, "Task write retries exhausted after {} attempts", n)
            }
        }
    }
}

impl std::error::Error for TaskError {}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        TaskError::Store(e)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Json(e)
    }
}

struct LoadedCollection {
    records: Vec<TaskRecord>,
    /// id + version of the backing file, `None` when it does not exist yet
    file: Option<(String, String)>,
}

/// The two-collection task store
pub struct TaskStore<S: ObjectStore, C: Clock> {
    store: S,
    config: TaskConfig,
    clock: C,
}

impl<S: ObjectStore + Clone, C: Clock> Clone for TaskStore<S, C> {
    fn clone(&self) -> Self {
        TaskStore {
            store: self.store.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S: ObjectStore, C: Clock> TaskStore<S, C> {
    /// Create a task store over the given folder
    pub fn new(store: S, config: TaskConfig, clock: C) -> Self {
        TaskStore {
            store,
            config,
            clock,
        }
    }

    async fn load(&self, file_name: &str) -> Result<LoadedCollection, TaskError> {
        let handles = self.store.list(&self.config.folder).await?;
        let handle = handles.into_iter().find(|h| h.name == file_name);
        match handle {
            None => Ok(LoadedCollection {
                records: Vec::new(),
                file: None,
            }),
            Some(h) => {
                let content = self.store.read(&h.id).await?;
                let records = if content.data.is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_slice(&content.data)?
                };
                Ok(LoadedCollection {
                    records,
                    file: Some((h.id, content.version)),
                })
            }
        }
    }

    async fn persist(
        &self,
        file_name: &str,
        records: &[TaskRecord],
        file: Option<(String, String)>,
    ) -> Result<(), TaskError> {
        let bytes = serde_json::to_vec(records)?;
        match file {
            Some((id, version)) => {
                self.store.update(&id, &bytes, Some(&version)).await?;
            }
            None => {
                self.store
                    .create(&self.config.folder, file_name, &bytes)
                    .await?;
            }
        }
        Ok(())
    }

    /// Apply a mutation to one collection with bounded conflict retries.
    ///
    /// `mutate` returns `Some(result)` to persist the changed records, or
    /// `None` to leave the document untouched.
    async fn modify<R>(
        &self,
        file_name: &str,
        mut mutate: impl FnMut(&mut Vec<TaskRecord>) -> Option<R>,
    ) -> Result<Option<R>, TaskError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut loaded = self.load(file_name).await?;
            let result = match mutate(&mut loaded.records) {
                Some(result) => result,
                None => return Ok(None),
            };
            match self.persist(file_name, &loaded.records, loaded.file).await {
                Ok(()) => return Ok(Some(result)),
                Err(TaskError::Store(StoreError::Conflict { .. }))
                | Err(TaskError::Store(StoreError::AlreadyExists(_))) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(TaskError::RetriesExhausted(MAX_WRITE_ATTEMPTS))
    }

    /// Tasks visible to the actor: live snoozes plus the deleted audit
    /// trail, ownership-filtered for non-admins.
    ///
    /// Reading triggers the lazy sweep: expired snoozes are removed from
    /// the deferred document before the result is assembled. Re-running
    /// the sweep on an already-swept document is a no-op.
    pub async fn list_visible(&self, actor: &Actor) -> Result<Vec<TaskRecord>, TaskError> {
        let now = self.clock.now_ms();

        let deferred = self.load(&self.config.deferred_file).await?;
        let expired_count = deferred.records.iter().filter(|r| r.expired(now)).count();
        let active: Vec<TaskRecord> = deferred
            .records
            .into_iter()
            .filter(|r| !r.expired(now))
            .collect();

        if expired_count > 0 {
            info!(expired = expired_count, "sweeping expired snoozes");
            // Re-read inside the retry loop so a concurrent create
            // between our load and the sweep write is never lost
            self.modify(&self.config.deferred_file, |records| {
                let before = records.len();
                records.retain(|r| !r.expired(now));
                if records.len() == before {
                    None
                } else {
                    Some(())
                }
            })
            .await?;
        }

        let deleted = self.load(&self.config.deleted_file).await?;

        let mut all = active;
        all.extend(deleted.records);

        if !actor.is_admin() {
            all.retain(|r| owns_task(actor, &r.user, &r.owner));
        }
        Ok(all)
    }

    /// Create a record, stamping server-side attribution.
    ///
    /// Snooze records go to the deferred collection, delete records to
    /// the audit collection.
    pub async fn create(&self, actor: &Actor, mut record: TaskRecord) -> Result<(), TaskError> {
        record.user = actor.email.clone();
        let file_name = match record.kind {
            TaskKind::Snooze => self.config.deferred_file.clone(),
            TaskKind::Delete => self.config.deleted_file.clone(),
        };
        self.modify(&file_name, move |records| {
            records.push(record.clone());
            Some(())
        })
        .await?;
        Ok(())
    }

    /// Remove a record by id if the actor owns it, searching deferred
    /// first, then deleted. The underlying target's re-activation is the
    /// caller's concern.
    pub async fn restore(&self, actor: &Actor, task_id: &str) -> Result<RestoreOutcome, TaskError> {
        for (file_name, collection) in [
            (self.config.deferred_file.clone(), TaskCollection::Deferred),
            (self.config.deleted_file.clone(), TaskCollection::Deleted),
        ] {
            let removed = self
                .modify(&file_name, |records| {
                    let idx = records
                        .iter()
                        .position(|r| r.id == task_id && owns_task(actor, &r.user, &r.owner))?;
                    Some(records.remove(idx))
                })
                .await?;
            if let Some(record) = removed {
                return Ok(RestoreOutcome::Restored { collection, record });
            }
        }
        Ok(RestoreOutcome::NotFoundOrDenied)
    }
}
