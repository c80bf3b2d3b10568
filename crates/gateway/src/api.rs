//! The `/api` routes: tasks, battles and iterations.

use std::convert::Infallible;

use arena_core::battle::Battle;
use arena_core::error::Error;
use arena_core::store::RECENT_BATTLES_LIMIT;
use arena_core::task::Task;
use arena_engine::{IterationOutcome, StreamEvent, StreamFrame};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::SharedState;
use crate::rate_limit::rate_limit_middleware;

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// An arena error on its way to the client.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::BattleNotFound(_) | Error::TaskNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidAgent(_) => StatusCode::BAD_REQUEST,
            Error::Superseded { .. } => StatusCode::CONFLICT,
            Error::Provider(_) | Error::Store(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> String {
        match &self.0 {
            Error::BattleNotFound(_) => "Battle not found".into(),
            Error::TaskNotFound(_) => "Task not found".into(),
            Error::InvalidAgent(_) => "Invalid agent type".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorBody { detail: self.detail() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the `/api` router. The iterate routes sit behind the rate limiter
/// when one is configured.
pub fn api_router(state: SharedState) -> Router {
    let mut iterate = Router::new()
        .route("/battles/{battle_id}/iterate/{agent_type}", post(iterate_handler))
        .route(
            "/battles/{battle_id}/iterate/{agent_type}/stream",
            get(iterate_stream_handler),
        );
    if let Some(limiter) = state.rate_limiter.clone() {
        iterate = iterate.route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    Router::new()
        .route("/", get(root_handler))
        .route("/tasks", get(list_tasks_handler))
        .route("/tasks/{task_id}", get(get_task_handler))
        .route("/battles", get(list_battles_handler).post(create_battle_handler))
        .route("/battles/{battle_id}", get(get_battle_handler))
        .route("/battles/{battle_id}/start", post(start_battle_handler))
        .route("/battles/{battle_id}/reset", post(reset_battle_handler))
        .merge(iterate)
        .with_state(state)
}

// ── Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBattleRequest {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartBattleResponse {
    pub message: String,
    pub battle_id: String,
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Ralph Loop Arena API".into(),
    })
}

async fn list_tasks_handler(State(state): State<SharedState>) -> Json<Vec<Task>> {
    Json(state.orchestrator.catalog().list().to_vec())
}

async fn get_task_handler(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Task>> {
    state
        .orchestrator
        .catalog()
        .get(&task_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Error::TaskNotFound(task_id).into())
}

async fn create_battle_handler(
    State(state): State<SharedState>,
    Json(payload): Json<CreateBattleRequest>,
) -> ApiResult<Json<Battle>> {
    let battle = state.orchestrator.create_battle(&payload.task_id).await?;
    Ok(Json(battle))
}

async fn list_battles_handler(State(state): State<SharedState>) -> ApiResult<Json<Vec<Battle>>> {
    let battles = state.orchestrator.list_recent(RECENT_BATTLES_LIMIT).await?;
    Ok(Json(battles))
}

async fn get_battle_handler(
    State(state): State<SharedState>,
    Path(battle_id): Path<String>,
) -> ApiResult<Json<Battle>> {
    Ok(Json(state.orchestrator.get_battle(&battle_id).await?))
}

async fn start_battle_handler(
    State(state): State<SharedState>,
    Path(battle_id): Path<String>,
) -> ApiResult<Json<StartBattleResponse>> {
    state.orchestrator.start_battle(&battle_id).await?;
    Ok(Json(StartBattleResponse {
        message: "Battle started".into(),
        battle_id,
    }))
}

async fn reset_battle_handler(
    State(state): State<SharedState>,
    Path(battle_id): Path<String>,
) -> ApiResult<Json<Battle>> {
    Ok(Json(state.orchestrator.reset_battle(&battle_id).await?))
}

async fn iterate_handler(
    State(state): State<SharedState>,
    Path((battle_id, agent_type)): Path<(String, String)>,
) -> ApiResult<Json<IterationOutcome>> {
    info!(battle_id = %battle_id, agent = %agent_type, "Iterate request");
    let outcome = state.orchestrator.iterate(&battle_id, &agent_type).await?;
    Ok(Json(outcome))
}

/// SSE view of one iteration. Admission errors are returned as plain HTTP
/// errors before the stream opens.
async fn iterate_stream_handler(
    State(state): State<SharedState>,
    Path((battle_id, agent_type)): Path<(String, String)>,
) -> ApiResult<Response> {
    info!(battle_id = %battle_id, agent = %agent_type, "Iterate stream request");
    let pending = state.orchestrator.begin(&battle_id, &agent_type).await?;

    let frames = state
        .orchestrator
        .stream_iteration(pending, state.heartbeat_interval);

    let events = frames.map(|frame| {
        let event = match frame {
            StreamFrame::Heartbeat => SseEvent::default().comment("keep-alive"),
            StreamFrame::Event(event) => to_sse(&event),
        };
        Ok::<_, Infallible>(event)
    });

    Ok((
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events),
    )
        .into_response())
}

fn to_sse(event: &StreamEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().event(event.event_type()).data(data)
}
