//! End-to-end tests for the arena HTTP API.
//!
//! These drive whole battles through the gateway router, from battle creation
//! through scored iterations to a declared winner, with a scripted model.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arena_core::completion::{Completion, CompletionClient, CompletionRequest, Usage};
use arena_core::error::ProviderError;
use arena_core::store::BattleStore;
use arena_core::task::TaskCatalog;
use arena_engine::{CompletionSettings, Orchestrator};
use arena_gateway::{GatewayState, build_router};
use arena_store::{InMemoryStore, SqliteStore};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

// ── Scripted model ───────────────────────────────────────────────────────

const NO_CODE: &str = "I would start by sketching the user model.";
const PARTIAL: &str = "const endpoints = []; // proper status handling next";
const SUCCESS: &str = "```js\nconst app = express(); // endpoints, status codes, validation\n```";

/// Answers by agent and iteration number, read from the session id.
struct ScriptedModel {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn script(agent: &str, iteration: u32) -> &'static str {
        match (agent, iteration) {
            ("traditional", 1) => NO_CODE,
            ("traditional", 2) => PARTIAL,
            ("ralph", 1) => PARTIAL,
            _ => SUCCESS,
        }
    }

    fn request_for(&self, agent: &str, iteration: u32) -> CompletionRequest {
        let suffix = format!("_{agent}_{iteration}");
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.session_id.ends_with(&suffix))
            .cloned()
            .unwrap_or_else(|| panic!("no request for {agent} #{iteration}"))
    }
}

#[async_trait::async_trait]
impl CompletionClient for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut parts = request.session_id.rsplitn(3, '_');
        let iteration: u32 = parts.next().and_then(|n| n.parse().ok()).unwrap();
        let agent = parts.next().unwrap().to_string();
        let text = Self::script(&agent, iteration);

        self.requests.lock().unwrap().push(request.clone());
        Ok(Completion {
            text: text.into(),
            usage: Some(Usage {
                input_tokens: 100,
                output_tokens: 20,
            }),
            model: request.model,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn app_with(store: Arc<dyn BattleStore>, model: Arc<ScriptedModel>) -> Router {
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        model,
        Arc::new(TaskCatalog::builtin()),
        CompletionSettings::default(),
    ));
    let state = Arc::new(GatewayState {
        orchestrator,
        rate_limiter: None,
        heartbeat_interval: Duration::from_secs(15),
    });
    build_router(state, &["*".to_string()])
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            req = req.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn new_battle(app: &Router, task_id: &str) -> String {
    let (status, battle) = call(
        app,
        "POST",
        "/api/battles",
        Some(serde_json::json!({ "task_id": task_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    battle["id"].as_str().unwrap().to_string()
}

async fn iterate(app: &Router, id: &str, agent: &str) -> Value {
    let (status, outcome) = call(app, "POST", &format!("/api/battles/{id}/iterate/{agent}"), None).await;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    outcome
}

/// Read an SSE body into `(event, data)` pairs, skipping comments.
fn sse_events(body: &str) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    for block in body.split("\n\n") {
        let mut name = None;
        let mut data = String::new();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                name = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data.push_str(rest.trim_start());
            }
        }
        if let Some(name) = name {
            events.push((name, serde_json::from_str(&data).unwrap_or(Value::Null)));
        }
    }
    events
}

// ── E2E: Full battles ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_full_battle_ralph_wins() {
    let model = Arc::new(ScriptedModel::new());
    let app = app_with(Arc::new(InMemoryStore::new()), model.clone());
    let id = new_battle(&app, "rest-api").await;

    let (_, started) = call(&app, "POST", &format!("/api/battles/{id}/start"), None).await;
    assert_eq!(started["message"], "Battle started");

    let t1 = iterate(&app, &id, "traditional").await;
    assert_eq!(t1["iteration"]["status"], "failure");
    assert_eq!(t1["iteration"]["tokens_used"], 120);
    assert_eq!(t1["iteration"]["token_source"], "provider");

    let r1 = iterate(&app, &id, "ralph").await;
    assert_eq!(r1["iteration"]["status"], "partial");

    let t2 = iterate(&app, &id, "traditional").await;
    assert_eq!(t2["iteration"]["status"], "partial");

    let r2 = iterate(&app, &id, "ralph").await;
    assert_eq!(r2["iteration"]["status"], "success");
    assert_eq!(r2["agent_state"]["status"], "completed");
    assert_eq!(r2["winner"], "ralph");
    assert_eq!(r2["battle_status"], "running");

    let t3 = iterate(&app, &id, "traditional").await;
    assert_eq!(t3["iteration"]["status"], "success");
    assert_eq!(t3["winner"], "ralph");
    assert_eq!(t3["battle_status"], "completed");

    let (_, battle) = call(&app, "GET", &format!("/api/battles/{id}"), None).await;
    assert_eq!(battle["status"], "completed");
    assert_eq!(battle["winner"], "ralph");
    assert_eq!(battle["traditional_agent"]["success_count"], 1.5);
    assert_eq!(battle["traditional_agent"]["failure_count"], 1);
    assert_eq!(battle["traditional_agent"]["total_tokens"], 360);
    assert_eq!(battle["ralph_agent"]["success_count"], 1.5);
    assert_eq!(battle["ralph_agent"]["iterations"].as_array().unwrap().len(), 2);

    // Traditional replays every attempt; ralph sees one fresh message
    let trad = model.request_for("traditional", 3);
    assert_eq!(trad.messages.len(), 5);
    assert_eq!(trad.messages[1].content, NO_CODE);
    assert_eq!(trad.messages[3].content, PARTIAL);

    let ralph = model.request_for("ralph", 2);
    assert_eq!(ralph.messages.len(), 1);
    assert!(ralph.messages[0].content.contains("CURRENT STATE"));
    assert!(ralph.messages[0].content.contains("Iteration 1 completed."));
    assert!(ralph.messages[0].content.contains("Status: partial"));
    assert!(ralph.system.contains("Ralph Loop"));

    let sizes: Vec<u64> = battle["traditional_agent"]["iterations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["context_size"].as_u64().unwrap())
        .collect();
    assert!(sizes.windows(2).all(|w| w[0] < w[1]), "{sizes:?}");
}

#[tokio::test]
async fn e2e_streamed_battle() {
    let model = Arc::new(ScriptedModel::new());
    let app = app_with(Arc::new(InMemoryStore::new()), model);
    let id = new_battle(&app, "rest-api").await;

    for expected in [1, 2] {
        let req = Request::builder()
            .uri(format!("/api/battles/{id}/iterate/ralph/stream"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let events = sse_events(&String::from_utf8_lossy(&bytes));

        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.first(), Some(&"start"));
        assert_eq!(names.last(), Some(&"complete"));
        assert_eq!(events[0].1["iteration_number"], expected);
        assert_eq!(events[0].1["agent_type"], "ralph");

        let streamed: String = events
            .iter()
            .filter(|(n, _)| n == "chunk")
            .map(|(_, d)| d["content"].as_str().unwrap())
            .collect();
        let complete = &events.last().unwrap().1;
        assert_eq!(
            complete["iteration"]["message"].as_str().unwrap(),
            streamed,
            "chunks concatenate to the recorded response"
        );
    }

    let (_, battle) = call(&app, "GET", &format!("/api/battles/{id}"), None).await;
    assert_eq!(battle["winner"], "ralph");
    assert_eq!(battle["ralph_agent"]["status"], "completed");
    assert_eq!(battle["traditional_agent"]["iterations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn e2e_reset_then_replay() {
    let model = Arc::new(ScriptedModel::new());
    let app = app_with(Arc::new(InMemoryStore::new()), model.clone());
    let id = new_battle(&app, "rest-api").await;

    iterate(&app, &id, "ralph").await;
    iterate(&app, &id, "ralph").await;

    let (status, battle) = call(&app, "POST", &format!("/api/battles/{id}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(battle["status"], "idle");
    assert!(battle["winner"].is_null());

    // Numbering and context start over
    let r1 = iterate(&app, &id, "ralph").await;
    assert_eq!(r1["iteration"]["iteration_number"], 1);
    let request = model.request_for("ralph", 1);
    assert!(!request.messages[0].content.contains("CURRENT STATE"));
}

#[tokio::test]
async fn e2e_battles_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arena.db");
    let path = path.to_str().unwrap();
    let model = Arc::new(ScriptedModel::new());

    let id = {
        let app = app_with(Arc::new(SqliteStore::new(path).await.unwrap()), model.clone());
        let id = new_battle(&app, "rest-api").await;
        iterate(&app, &id, "traditional").await;
        iterate(&app, &id, "ralph").await;
        id
    };

    let app = app_with(Arc::new(SqliteStore::new(path).await.unwrap()), model.clone());
    let (status, battle) = call(&app, "GET", &format!("/api/battles/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(battle["traditional_agent"]["iterations"].as_array().unwrap().len(), 1);

    let (_, listed) = call(&app, "GET", "/api/battles", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Working state came back too
    let t2 = iterate(&app, &id, "traditional").await;
    assert_eq!(t2["iteration"]["iteration_number"], 2);
    assert_eq!(model.request_for("traditional", 2).messages.len(), 3);

    iterate(&app, &id, "ralph").await;
    let ralph = model.request_for("ralph", 2);
    assert!(ralph.messages[0].content.contains("Iteration 1 completed."));
}

#[tokio::test]
async fn e2e_unknown_routes_and_inputs() {
    let app = app_with(Arc::new(InMemoryStore::new()), Arc::new(ScriptedModel::new()));

    let (status, body) = call(
        &app,
        "POST",
        "/api/battles",
        Some(serde_json::json!({ "task_id": "does-not-exist" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Task not found");

    let (status, _) = call(&app, "POST", "/api/battles/nope/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "POST", "/api/battles/nope/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, tasks) = call(&app, "GET", "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = tasks
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        ["rest-api", "todo-component", "data-processor", "unit-tests", "auth-middleware"]
    );
}
