//! End-to-End Persistence Scenarios
//!
//! Drives the full stack (dispatch façade over the in-memory object
//! store) through the contract scenarios: segment rotation under the
//! delta log's threshold, merged reads across segments, snapshot meta
//! degradation, and the task queue's lazy expiry and ambiguous restore.

use analytics_store::persist::{
    Actor, Clock, PersistConfig, Role, SimulatedClock, TaskRecord, TokenVerifier,
};
use analytics_store::{Dispatcher, InMemoryObjectStore, Request, Response, Verb};
use serde_json::{json, Value};
use std::collections::HashMap;

struct StaticVerifier {
    actors: HashMap<String, Actor>,
}

impl StaticVerifier {
    fn new() -> Self {
        let mut actors = HashMap::new();
        actors.insert(
            "token-ana".to_string(),
            Actor {
                email: "ana@example.com".to_string(),
                surname: "Vega".to_string(),
                role: Role::Member,
            },
        );
        actors.insert(
            "token-eve".to_string(),
            Actor {
                email: "eve@example.com".to_string(),
                surname: "Quist".to_string(),
                role: Role::Member,
            },
        );
        actors.insert(
            "token-admin".to_string(),
            Actor {
                email: "root@example.com".to_string(),
                surname: "Root".to_string(),
                role: Role::Admin,
            },
        );
        StaticVerifier { actors }
    }
}

impl TokenVerifier for StaticVerifier {
    fn verify(&self, token: &str) -> Option<Actor> {
        self.actors.get(token).cloned()
    }
}

struct Harness {
    store: InMemoryObjectStore,
    clock: SimulatedClock,
    dispatcher: Dispatcher<InMemoryObjectStore, StaticVerifier, SimulatedClock>,
}

impl Harness {
    fn new() -> Self {
        // One subscriber per test binary; later calls are no-ops
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();

        let store = InMemoryObjectStore::new();
        let clock = SimulatedClock::new(1_000_000);
        let dispatcher = Dispatcher::new(
            store.clone(),
            PersistConfig::default(),
            StaticVerifier::new(),
            clock.clone(),
        );
        Harness {
            store,
            clock,
            dispatcher,
        }
    }

    async fn post(&self, action: &str, body: Value) -> Response {
        self.dispatcher
            .handle(Request {
                action: action.to_string(),
                verb: Verb::Post,
                body: Some(body),
                bearer: None,
            })
            .await
    }

    async fn post_as(&self, action: &str, body: Value, token: &str) -> Response {
        self.dispatcher
            .handle(Request {
                action: action.to_string(),
                verb: Verb::Post,
                body: Some(body),
                bearer: Some(token.to_string()),
            })
            .await
    }

    async fn get(&self, action: &str) -> Response {
        self.dispatcher
            .handle(Request {
                action: action.to_string(),
                verb: Verb::Get,
                body: None,
                bearer: None,
            })
            .await
    }

    async fn get_as(&self, action: &str, token: &str) -> Response {
        self.dispatcher
            .handle(Request {
                action: action.to_string(),
                verb: Verb::Get,
                body: None,
                bearer: Some(token.to_string()),
            })
            .await
    }
}

// =============================================================================
// Delta log scenarios
// =============================================================================

#[tokio::test]
async fn test_delta_rotation_scenario() {
    let h = Harness::new();

    // Three small records land in the first segment
    for i in 1..=3 {
        let resp = h.post("save-delta", json!({"n": i, "v": "xxxxxxxxxx"})).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["file"], "savepoints1.json");
    }

    // Inflate savepoints1.json past the 250_000-byte threshold
    let inflated = format!(
        "{{\"deltas\": [{}]}}",
        (0..100_000).map(|_| "{}").collect::<Vec<_>>().join(",")
    );
    assert!(inflated.len() > 250_000);
    h.store
        .put_raw("analytics_deltas/savepoints1.json", inflated.into_bytes());
    let kept = h.post("save-delta", json!({"n": 4})).await;
    assert_eq!(kept.body["status"], "created");
    assert_eq!(kept.body["file"], "savepoints2.json");

    // The merged read spans both segments
    let resp = h.get("get-deltas").await;
    let records = resp.body.as_array().unwrap();
    let fours: Vec<_> = records.iter().filter(|r| r["n"] == 4).collect();
    assert_eq!(fours.len(), 1);

    // Clear removes every segment
    let resp = h.post("clear-deltas", json!({})).await;
    assert_eq!(resp.body["status"], "deltas_cleared");
    assert_eq!(resp.body["count"], 2);
    let resp = h.get("get-deltas").await;
    assert!(resp.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_segment_does_not_blank_read() {
    let h = Harness::new();

    h.post("save-delta", json!({"n": 1})).await;
    // A corrupt sibling segment contributes nothing, aborts nothing
    h.store
        .put_raw("analytics_deltas/savepoints7.json", b"%%%".to_vec());

    let resp = h.get("get-deltas").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_array().unwrap().len(), 1);
}

// =============================================================================
// Snapshot scenarios
// =============================================================================

#[tokio::test]
async fn test_snapshot_meta_lifecycle() {
    let h = Harness::new();

    // Nothing written yet: sentinel, never an error
    let resp = h.get("get-snapshot-meta").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["versionHash"], "none");

    let resp = h.post("save-meta", json!({"versionHash": "abc123"})).await;
    assert_eq!(resp.body["status"], "meta_saved");

    for i in 0..3 {
        let resp = h
            .post("save-chunk", json!({"chunkIndex": i, "chunk": {"rows": [i]}}))
            .await;
        assert_eq!(resp.status, 200);
    }

    let resp = h.get("get-snapshot-meta").await;
    assert_eq!(resp.body["versionHash"], "abc123");
    assert_eq!(resp.body["chunkCount"], 3);

    // Retention drops chunks at or above keepCount, keeps the meta
    let resp = h.post("cleanup-chunks", json!({"keepCount": 1})).await;
    assert_eq!(resp.body["deleted"], 2);
    let resp = h.get("get-snapshot-meta").await;
    assert_eq!(resp.body["chunkCount"], 1);
}

#[tokio::test]
async fn test_corrupt_meta_degrades_to_sentinel() {
    let h = Harness::new();

    // Valid JSON but not an object: the read fails and the façade
    // answers with the sentinel instead of an error
    h.store.put_raw(
        "analytics_snapshot/system_analytics_snapshot_meta.json",
        b"[1, 2]".to_vec(),
    );

    let resp = h.get("get-snapshot-meta").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, json!({"versionHash": "none"}));
}

// =============================================================================
// Task queue scenarios
// =============================================================================

fn snooze_body(id: &str, owner: &str, until: u64) -> Value {
    json!({
        "id": id,
        "type": "snooze",
        "targetId": format!("acct-{}", id),
        "targetName": "Account",
        "owner": owner,
        "reason": "revisit next quarter",
        "timestamp": 1_000_000,
        "snoozeUntil": until,
    })
}

#[tokio::test]
async fn test_expired_snooze_scenario() {
    let h = Harness::new();
    let now = h.clock.now_ms();

    // snoozeUntil in the past: created, then swept on the next read
    let resp = h
        .post_as("save-task", snooze_body("t1", "Vega", now - 1_000), "token-ana")
        .await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["success"], true);

    let resp = h.get_as("get-tasks", "token-ana").await;
    assert!(resp.body["tasks"].as_array().unwrap().is_empty());

    // Direct inspection: the deferred document no longer holds it
    let raw = h.store.raw("analytics_tasks/snoozed_tasks.json").unwrap();
    let stored: Vec<TaskRecord> = serde_json::from_slice(&raw).unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_task_visibility_and_restore_over_the_wire() {
    let h = Harness::new();
    let later = h.clock.now_ms() + 60_000;

    h.post_as("save-task", snooze_body("a1", "Cartera Vega", later), "token-ana")
        .await;
    h.post_as("save-task", snooze_body("e1", "Cartera Quist", later), "token-eve")
        .await;

    // Members see only their own or owner-matched tasks
    let resp = h.get_as("get-tasks", "token-ana").await;
    let tasks = resp.body["tasks"].as_array().unwrap().clone();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["id"], "a1");

    // Admin sees the union
    let resp = h.get_as("get-tasks", "token-admin").await;
    assert_eq!(resp.body["tasks"].as_array().unwrap().len(), 2);

    // Restore denied and restore of a missing id are indistinguishable
    let denied = h
        .post_as("restore-task", json!({"taskId": "a1"}), "token-eve")
        .await;
    let missing = h
        .post_as("restore-task", json!({"taskId": "nope"}), "token-eve")
        .await;
    assert_eq!(denied, missing);
    assert_eq!(denied.body["success"], false);
    assert_eq!(denied.body["error"], "not_found_or_denied");

    // The owner restores for real
    let resp = h
        .post_as("restore-task", json!({"taskId": "a1"}), "token-ana")
        .await;
    assert_eq!(resp.body["success"], true);
    assert_eq!(resp.body["restored"], "deferred");

    let resp = h.get_as("get-tasks", "token-ana").await;
    assert!(resp.body["tasks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_task_audit_trail_and_restore() {
    let h = Harness::new();

    let body = json!({
        "id": "d1",
        "type": "delete",
        "targetId": "acct-d1",
        "targetName": "Account",
        "owner": "Cartera Vega",
        "reason": "duplicate entry",
        "timestamp": 1_000_000,
    });
    h.post_as("save-task", body, "token-ana").await;

    // Advancing time never expires delete records
    h.clock.advance_ms(10_000_000);
    let resp = h.get_as("get-tasks", "token-ana").await;
    assert_eq!(resp.body["tasks"].as_array().unwrap().len(), 1);

    let resp = h
        .post_as("restore-task", json!({"taskId": "d1"}), "token-admin")
        .await;
    assert_eq!(resp.body["restored"], "deleted");
}
