//! HTTP surface of the daemon: health, Prometheus metrics, engine status

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use oscillate_core::{GuildId, MetricsSnapshot};
use oscillate_player::{AudioManager, PlayerStatus};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AudioManager>,
    /// Absent when no Prometheus recorder was installed
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(manager: Arc<AudioManager>, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            manager,
            prometheus,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(prometheus_metrics))
        .route("/status", get(engine_status))
        .route("/guilds/{guild_id}", get(guild_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub running: bool,
    pub active_guilds: Vec<GuildId>,
    pub total_tracks_queued: usize,
    pub active_streams: u64,
    pub bitrate: u32,
    pub metrics: Option<MetricsSnapshot>,
}

async fn prometheus_metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let handle = state.prometheus.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Prometheus exporter is not installed".to_string())
    })?;

    Ok((
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
        .into_response())
}

async fn engine_status(State(state): State<AppState>) -> Json<EngineStatus> {
    let manager = &state.manager;
    Json(EngineStatus {
        version: oscillate_core::VERSION,
        running: manager.is_running(),
        active_guilds: manager.active_guilds(),
        total_tracks_queued: manager.total_tracks_queued(),
        active_streams: manager.active_streams(),
        bitrate: manager.bitrate(),
        metrics: manager.metrics_snapshot(),
    })
}

async fn guild_status(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
) -> Result<Json<PlayerStatus>, ApiError> {
    let guild_id: GuildId = guild_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid guild id: {}", guild_id)))?;

    let player = state
        .manager
        .get_player(guild_id)
        .ok_or_else(|| ApiError::NotFound(format!("No player for guild {}", guild_id)))?;

    Ok(Json(player.status()))
}

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 404 Not Found
    NotFound(String),
    /// 503 Service Unavailable
    ServiceUnavailable(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        if status.is_server_error() {
            tracing::error!(error = error_type, %message, "API error");
        } else {
            tracing::debug!(error = error_type, %message, "API client error");
        }

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
