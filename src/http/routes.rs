//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::peer::PeerStatus;
use crate::transport::ParticipantId;
use crate::util::time::uptime_secs;

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/peers", get(peers_handler))
        .route("/peers/:label", get(peer_handler))
        .route("/rooms/:name", get(room_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: String,
    room: String,
    room_capacity: usize,
    peers: usize,
    connected_peers: usize,
    active_rooms: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        version: state.config.game_version.clone(),
        room: state.config.room_name.clone(),
        room_capacity: state.config.room_capacity,
        peers: state.peers.len(),
        connected_peers: state.hub.connected_peers(),
        active_rooms: state.hub.active_rooms(),
    })
}

// ============================================================================
// Peer endpoints
// ============================================================================

async fn peers_handler(State(state): State<AppState>) -> Json<Vec<PeerStatus>> {
    Json(state.peer_statuses())
}

async fn peer_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Json<PeerStatus>, AppError> {
    state
        .peer_status(&label)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("peer {}", label)))
}

// ============================================================================
// Room endpoint
// ============================================================================

#[derive(Serialize)]
struct RoomResponse {
    name: String,
    members: Vec<ParticipantId>,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RoomResponse>, AppError> {
    let members = state
        .hub
        .room_members(&name)
        .ok_or_else(|| AppError::NotFound(format!("room {}", name)))?;
    Ok(Json(RoomResponse { name, members }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
