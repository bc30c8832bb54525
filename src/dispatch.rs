//! Dispatch Façade
//!
//! Single entry point mapping an inbound `action` identifier plus HTTP
//! verb to exactly one operation on the persistence components, and
//! translating domain results into wire shapes. Transport-independent:
//! the hosting runtime owns sockets and request scheduling.
//!
//! Task-mutating actions authenticate a bearer token into an `Actor`
//! through the `TokenVerifier`; everything else is unauthenticated here
//! (auth for those surfaces is an external collaborator concern).

use crate::persist::actor::{Actor, TokenVerifier};
use crate::persist::clock::Clock;
use crate::persist::config::PersistConfig;
use crate::persist::object_store::ObjectStore;
use crate::persist::segment_log::{AppendOutcome, ContainerShape, LogError, SegmentedLog};
use crate::persist::snapshot::{SnapshotError, SnapshotStore};
use crate::persist::tasks::{RestoreOutcome, TaskError, TaskRecord, TaskStore};
use serde_json::{json, Value};
use tracing::warn;

/// HTTP verb of the inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read actions
    Get,
    /// Mutating actions
    Post,
}

/// Transport-independent inbound request
#[derive(Debug, Clone)]
pub struct Request {
    /// Action identifier, e.g. `save-delta`
    pub action: String,
    /// HTTP verb
    pub verb: Verb,
    /// JSON body, if any
    pub body: Option<Value>,
    /// Bearer token, if supplied
    pub bearer: Option<String>,
}

/// Transport-independent response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP-style status code
    pub status: u16,
    /// JSON body
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Response { status: 200, body }
    }
}

/// Request-level failure, carrying its wire status and error kind
#[derive(Debug)]
enum ApiError {
    /// Missing or invalid bearer token on a task action
    Unauthorized,
    /// Missing or malformed required field
    Validation(String),
    /// No such action
    UnknownAction(String),
    /// Action exists but not under this verb
    MethodNotAllowed,
    /// Backing store failure on a single-document operation
    Upstream(String),
}

impl ApiError {
    fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized => 401,
            ApiError::Validation(_) => 400,
            ApiError::UnknownAction(_) => 404,
            ApiError::MethodNotAllowed => 405,
            ApiError::Upstream(_) => 502,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Validation(_) => "validation_error",
            ApiError::UnknownAction(_) => "unknown_action",
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::Upstream(_) => "upstream_io_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized => "missing or invalid bearer token".to_string(),
            ApiError::Validation(msg) => msg.clone(),
            ApiError::UnknownAction(action) => format!("unknown action: {}", action),
            ApiError::MethodNotAllowed => "action not supported under this verb".to_string(),
            ApiError::Upstream(msg) => msg.clone(),
        }
    }

    fn into_response(self) -> Response {
        Response {
            status: self.status(),
            body: json!({ "error": self.kind(), "message": self.message() }),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(e: LogError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl From<SnapshotError> for ApiError {
    fn from(e: SnapshotError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

/// The façade over all persistence components
pub struct Dispatcher<S: ObjectStore + Clone, V: TokenVerifier, C: Clock> {
    deltas: SegmentedLog<S>,
    interest: SegmentedLog<S>,
    snapshot: SnapshotStore<S>,
    tasks: TaskStore<S, C>,
    verifier: V,
}

impl<S: ObjectStore + Clone, V: TokenVerifier, C: Clock> Dispatcher<S, V, C> {
    /// Wire up all components over one object store
    pub fn new(store: S, config: PersistConfig, verifier: V, clock: C) -> Self {
        Dispatcher {
            deltas: SegmentedLog::new(store.clone(), config.deltas, ContainerShape::Deltas),
            interest: SegmentedLog::new(store.clone(), config.interest, ContainerShape::Array),
            snapshot: SnapshotStore::new(store.clone(), config.snapshot),
            tasks: TaskStore::new(store, config.tasks, clock),
            verifier,
        }
    }

    /// Handle one request end to end
    pub async fn handle(&self, req: Request) -> Response {
        match self.route(req).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    async fn route(&self, req: Request) -> Result<Response, ApiError> {
        match (req.action.as_str(), req.verb) {
            ("save-delta", Verb::Post) => {
                let record = require_body(&req)?;
                let outcome = self.deltas.append(&record).await?;
                Ok(Response::ok(append_body(&outcome)))
            }
            ("get-deltas", Verb::Get) => {
                let records = self.deltas.read_all().await?;
                Ok(Response::ok(Value::Array(records)))
            }
            ("clear-deltas", Verb::Post) => {
                let count = self.deltas.clear_all().await?;
                Ok(Response::ok(
                    json!({ "status": "deltas_cleared", "count": count }),
                ))
            }
            ("save-interest-delta", Verb::Post) => {
                let actor = self.authenticate(&req)?;
                let mut record = require_body(&req)?;
                // Server-enforced attribution overwrites any client value
                match record.as_object_mut() {
                    Some(obj) => {
                        obj.insert("user".to_string(), Value::from(actor.email));
                    }
                    None => {
                        return Err(ApiError::Validation(
                            "interest record must be a JSON object".to_string(),
                        ))
                    }
                }
                let outcome = self.interest.append(&record).await?;
                Ok(Response::ok(append_body(&outcome)))
            }
            ("get-interest-deltas", Verb::Get) => {
                let records = self.interest.read_all().await?;
                Ok(Response::ok(Value::Array(records)))
            }
            ("save-chunk", Verb::Post) => {
                let body = require_body(&req)?;
                let chunk = body
                    .get("chunk")
                    .ok_or_else(|| ApiError::Validation("missing chunk payload".to_string()))?;
                let target_id = body.get("targetFileId").and_then(Value::as_str);
                let ordinal = body.get("chunkIndex").and_then(Value::as_u64);
                if target_id.is_none() && ordinal.is_none() {
                    return Err(ApiError::Validation(
                        "chunkIndex or targetFileId is required".to_string(),
                    ));
                }
                let bytes = serde_json::to_vec(chunk)
                    .map_err(|e| ApiError::Upstream(e.to_string()))?;
                let file_id = self
                    .snapshot
                    .write_chunk(ordinal.unwrap_or(0) as usize, &bytes, target_id)
                    .await?;
                Ok(Response::ok(
                    json!({ "status": "chunk_saved", "fileId": file_id }),
                ))
            }
            ("save-meta", Verb::Post) => {
                let meta = require_body(&req)?;
                if !meta.is_object() {
                    return Err(ApiError::Validation(
                        "snapshot meta must be a JSON object".to_string(),
                    ));
                }
                let bytes = serde_json::to_vec(&meta)
                    .map_err(|e| ApiError::Upstream(e.to_string()))?;
                let file_id = self.snapshot.write_meta(&bytes).await?;
                Ok(Response::ok(
                    json!({ "status": "meta_saved", "fileId": file_id }),
                ))
            }
            ("get-snapshot-meta", Verb::Get) => {
                // Never propagates an error: polling clients treat
                // "unknown" and "not yet created" uniformly
                match self.snapshot.read_meta().await {
                    Ok(meta) => Ok(Response::ok(meta)),
                    Err(e) => {
                        warn!(error = %e, "snapshot meta unavailable, degrading to sentinel");
                        Ok(Response::ok(json!({ "versionHash": "none" })))
                    }
                }
            }
            ("cleanup-chunks", Verb::Post) => {
                let body = require_body(&req)?;
                let keep_count = body
                    .get("keepCount")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ApiError::Validation("missing keepCount".to_string()))?;
                let deleted = self.snapshot.cleanup(keep_count as usize).await?;
                Ok(Response::ok(
                    json!({ "status": "chunks_cleaned", "deleted": deleted }),
                ))
            }
            ("get-tasks", Verb::Get) => {
                let actor = self.authenticate(&req)?;
                let tasks = self.tasks.list_visible(&actor).await?;
                let tasks = serde_json::to_value(tasks)
                    .map_err(|e| ApiError::Upstream(e.to_string()))?;
                Ok(Response::ok(json!({ "tasks": tasks })))
            }
            ("save-task", Verb::Post) => {
                let actor = self.authenticate(&req)?;
                let body = require_body(&req)?;
                let record: TaskRecord = serde_json::from_value(body)
                    .map_err(|e| ApiError::Validation(format!("invalid task record: {}", e)))?;
                self.tasks.create(&actor, record).await?;
                Ok(Response::ok(json!({ "success": true })))
            }
            ("restore-task", Verb::Post) => {
                let actor = self.authenticate(&req)?;
                let body = require_body(&req)?;
                let task_id = body
                    .get("taskId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::Validation("missing taskId".to_string()))?;
                match self.tasks.restore(&actor, task_id).await? {
                    RestoreOutcome::Restored { collection, .. } => Ok(Response::ok(
                        json!({ "success": true, "restored": collection.as_str() }),
                    )),
                    RestoreOutcome::NotFoundOrDenied => Ok(Response {
                        status: 404,
                        body: json!({ "success": false, "error": "not_found_or_denied" }),
                    }),
                }
            }
            // Known action under the wrong verb
            (
                "save-delta" | "clear-deltas" | "save-interest-delta" | "save-chunk"
                | "save-meta" | "cleanup-chunks" | "save-task" | "restore-task",
                Verb::Get,
            )
            | (
                "get-deltas" | "get-interest-deltas" | "get-snapshot-meta" | "get-tasks",
                Verb::Post,
            ) => Err(ApiError::MethodNotAllowed),
            (action, _) => Err(ApiError::UnknownAction(action.to_string())),
        }
    }

    fn authenticate(&self, req: &Request) -> Result<Actor, ApiError> {
        let token = req.bearer.as_deref().ok_or(ApiError::Unauthorized)?;
        self.verifier.verify(token).ok_or(ApiError::Unauthorized)
    }
}

fn require_body(req: &Request) -> Result<Value, ApiError> {
    match &req.body {
        Some(body) if !body.is_null() => Ok(body.clone()),
        _ => Err(ApiError::Validation("missing request body".to_string())),
    }
}

fn append_body(outcome: &AppendOutcome) -> Value {
    json!({ "status": outcome.status.as_str(), "file": outcome.file_name })
}
