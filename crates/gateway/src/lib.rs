//! HTTP API gateway for Ralph Arena.
//!
//! Serves the `/api` battle routes plus `/health`. Iterations are available
//! both as a single JSON response and as a server-sent event stream with
//! keep-alive comments.

pub mod api;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arena_config::{AppConfig, StorageConfig};
use arena_core::store::BattleStore;
use arena_core::task::TaskCatalog;
use arena_engine::{CompletionSettings, Orchestrator};
use arena_store::InMemoryStore;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::rate_limit::RateLimiter;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub heartbeat_interval: Duration,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &AppConfig) -> Self {
        let rate_limiter = config.rate_limit.enabled.then(|| {
            Arc::new(RateLimiter::new(
                config.rate_limit.requests_per_hour,
                Duration::from_secs(config.rate_limit.window_secs),
            ))
        });
        Self {
            orchestrator,
            rate_limiter,
            heartbeat_interval: Duration::from_secs(config.stream.heartbeat_interval_secs),
        }
    }
}

/// Build the full router: `/api` routes, `/health`, CORS and trace logging.
pub fn build_router(state: SharedState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state))
        .layer(cors_layer(cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// `*` anywhere in the list allows every origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Open the configured battle store.
pub async fn open_store(
    storage: &StorageConfig,
) -> Result<Arc<dyn BattleStore>, Box<dyn std::error::Error>> {
    match storage.backend.as_str() {
        "sqlite" => {
            let path = storage.resolved_path();
            if let Some(parent) = std::path::Path::new(&path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = arena_store::SqliteStore::new(&path).await?;
            info!(path = %path, "Using SQLite battle store");
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("Using in-memory battle store; battles will not survive a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        other => Err(format!("unknown storage backend '{other}'").into()),
    }
}

/// Wire the orchestrator from configuration.
pub async fn build_orchestrator(
    config: &AppConfig,
) -> Result<Arc<Orchestrator>, Box<dyn std::error::Error>> {
    let store = open_store(&config.storage).await?;
    let client = arena_providers::build_from_config(config)?;
    let settings = CompletionSettings {
        model: config.default_model.clone(),
        temperature: config.default_temperature,
        max_tokens: Some(config.default_max_tokens),
    };
    Ok(Arc::new(Orchestrator::new(
        store,
        client,
        Arc::new(TaskCatalog::builtin()),
        settings,
    )))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    if !config.has_api_key() {
        warn!("No API key configured; iterations will fail until one is set");
    }

    let orchestrator = build_orchestrator(&config).await?;
    let state = Arc::new(GatewayState::new(orchestrator, &config));
    match &state.rate_limiter {
        Some(limiter) => info!(
            limit = limiter.capacity(),
            window_secs = config.rate_limit.window_secs,
            "Rate limiting enabled on iterate endpoints"
        ),
        None => warn!("Rate limiting disabled"),
    }

    let app = build_router(state, &config.gateway.cors_origins);

    info!(addr = %addr, model = %config.default_model, "Arena gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Arena gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state(config: &AppConfig) -> SharedState {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(arena_providers::AnthropicClient::new(String::new())),
            Arc::new(TaskCatalog::builtin()),
            CompletionSettings::default(),
        ));
        Arc::new(GatewayState::new(orchestrator, config))
    }

    #[test]
    fn state_follows_config() {
        let mut config = AppConfig::default();
        let s = state(&config);
        assert_eq!(s.rate_limiter.as_ref().map(|l| l.capacity()), Some(10));
        assert_eq!(s.heartbeat_interval, Duration::from_secs(15));

        config.rate_limit.enabled = false;
        assert!(state(&config).rate_limiter.is_none());
    }

    #[tokio::test]
    async fn cors_preflight_for_listed_origin() {
        let config = AppConfig::default();
        let app = build_router(state(&config), &["http://localhost:3000".to_string()]);

        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/tasks")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn wildcard_cors_allows_any_origin() {
        let config = AppConfig::default();
        let app = build_router(state(&config), &config.gateway.cors_origins);

        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://example.org")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn memory_store_opens() {
        let storage = StorageConfig {
            backend: "memory".into(),
            path: None,
        };
        let store = open_store(&storage).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let bogus = StorageConfig {
            backend: "redis".into(),
            path: None,
        };
        assert!(open_store(&bogus).await.is_err());
    }
}
