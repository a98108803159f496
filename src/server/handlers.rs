//! HTTP handlers for the queue API.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use super::AppState;
use crate::models::{QueueEnvelope, QueuePayload};
use crate::queue::{QueueDepth, QueueError, REQUESTS_QUEUE, RESULTS_QUEUE};
use crate::utils::utc_now_iso;
use crate::worker::WorkerStatsSnapshot;

/// Default number of messages handed out by one lease call.
pub const DEFAULT_LEASE_LIMIT: i64 = 10;

/// Upper bound on one lease call.
pub const MAX_LEASE_LIMIT: i64 = 100;

/// Errors returned by API handlers as `{"detail": ...}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::UnknownQueue(_) => StatusCode::NOT_FOUND,
            ApiError::Queue(QueueError::InvalidQueueName(_) | QueueError::InvalidPayload(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Queue(e) => {
                tracing::error!("Queue operation failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Map a path segment to one of the two service queues.
fn service_queue(name: &str) -> Result<&'static str, ApiError> {
    match name {
        REQUESTS_QUEUE => Ok(REQUESTS_QUEUE),
        RESULTS_QUEUE => Ok(RESULTS_QUEUE),
        other => Err(ApiError::UnknownQueue(other.to_string())),
    }
}

/// Reject queue API calls without the configured bearer token.
///
/// With no token configured every call is let through.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.settings.token.as_deref() {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        let authorized = presented
            .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
            .unwrap_or(false);
        if !authorized {
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[derive(Debug, Serialize)]
pub struct QueueDepths {
    pub requests: QueueDepth,
    pub results: QueueDepth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub worker_enabled: bool,
    pub worker_concurrency: usize,
    pub queue_db_path: String,
    pub output_dir: String,
    pub ts: String,
    pub queues: QueueDepths,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerStatsSnapshot>,
}

/// Service health with queue depths. Never requires the token.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let queues = QueueDepths {
        requests: state.store.depth(REQUESTS_QUEUE).await?,
        results: state.store.depth(RESULTS_QUEUE).await?,
    };

    Ok(Json(HealthResponse {
        status: "ok",
        worker_enabled: state.settings.worker_enabled,
        worker_concurrency: state.settings.worker.concurrency,
        queue_db_path: state.settings.queue_path.display().to_string(),
        output_dir: state.settings.output_dir.display().to_string(),
        ts: utc_now_iso(),
        queues,
        worker: state.worker_stats.as_ref().map(|stats| stats.snapshot()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub messages: Vec<QueuePayload>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub accepted: usize,
}

/// `POST /v1/queue/:queue`
pub async fn publish(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let queue = service_queue(&queue)?;
    let accepted = state.store.publish(queue, body.messages).await?;
    Ok(Json(PublishResponse { accepted }))
}

#[derive(Debug, Deserialize)]
pub struct LeaseRequest {
    #[serde(default = "default_lease_limit")]
    pub limit: i64,
}

fn default_lease_limit() -> i64 {
    DEFAULT_LEASE_LIMIT
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub messages: Vec<QueueEnvelope>,
}

/// `POST /v1/queue/:queue/lease`
pub async fn lease(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(body): Json<LeaseRequest>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let queue = service_queue(&queue)?;
    let limit = body.limit.clamp(1, MAX_LEASE_LIMIT) as usize;
    let messages = state
        .store
        .lease(queue, limit, state.settings.worker.lease_seconds)
        .await?;
    Ok(Json(LeaseResponse { messages }))
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub acked: usize,
}

/// `POST /v1/queue/:queue/ack`
pub async fn ack(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Json(body): Json<AckRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let queue = service_queue(&queue)?;
    let acked = state.store.ack(queue, body.ids).await?;
    Ok(Json(AckResponse { acked }))
}
