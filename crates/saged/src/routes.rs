//! API routes for saged

use crate::orchestrator::RunHandle;
use crate::server::AppState;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use sage_shared::{AnswerRequest, ReplayCommand};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

type AppStateArc = Arc<AppState>;

/// Header carrying the caller identity, set by the fronting proxy
pub const USER_ID_HEADER: &str = "x-user-id";

/// Response header carrying the run id of a stream
pub const RUN_ID_HEADER: &str = "x-run-id";

// ============================================================================
// Answer Routes
// ============================================================================

pub fn answer_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/answer/stream", post(answer_stream))
        .route("/answer/replay", post(answer_replay))
}

fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// One SSE event per envelope: event name is the stage, data the envelope.
fn sse_response(handle: RunHandle) -> impl IntoResponse {
    let events = handle
        .events
        .map(|envelope| Event::default().event(envelope.stage.clone()).json_data(&envelope));
    (
        [(RUN_ID_HEADER, handle.run_id)],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

async fn answer_stream(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Json(req): Json<AnswerRequest>,
) -> impl IntoResponse {
    let handle = state.orchestrator.start(req, user_id(&headers));
    info!("  Streaming run {}", handle.run_id);
    sse_response(handle)
}

async fn answer_replay(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    Json(cmd): Json<ReplayCommand>,
) -> impl IntoResponse {
    let handle = state.orchestrator.replay(cmd, user_id(&headers));
    info!("  Streaming replay {}", handle.run_id);
    sse_response(handle)
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
    pub uptime_seconds: u64,
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: sage_shared::VERSION.to_string(),
        protocol_version: sage_shared::PROTOCOL_VERSION,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
