//! Liveness and readiness probes.

use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// "sqlite", "memory" or "none".
    pub store: &'static str,
    pub games: Vec<&'static str>,
    pub websockets: usize,
    pub rooms: RoomCounts,
}

#[derive(Debug, Serialize)]
pub struct RoomCounts {
    pub active: usize,
    pub players: usize,
    /// Live rooms whose host is currently away.
    pub hosts_away: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let rooms = {
        let mgr = state.rooms.read().await;
        let (active, players) = mgr.stats();
        RoomCounts {
            active,
            players,
            hosts_away: mgr.rooms().filter(|r| r.host_disconnected).count(),
        }
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store_backend,
        games: state
            .game_registry
            .game_types()
            .into_iter()
            .map(|g| g.as_str())
            .collect(),
        websockets: state.ws_connection_count.load(Ordering::Relaxed),
        rooms,
    })
}

/// GET /ready: a server without any playable game is not ready. A missing
/// store is not a readiness failure; rooms then live in memory only.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    if state.game_registry.available_games() == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                reason: Some("no games registered"),
            }),
        );
    }
    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            reason: None,
        }),
    )
}
