use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use partyline_core::net::messages::LeaderboardEntry;
use partyline_core::room::normalize_room_code;

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HostTokenResponse {
    pub room_code: String,
    pub host_token: String,
}

#[derive(Debug, Serialize)]
pub struct RoomActivityResponse {
    pub room_code: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardResponse {
    pub room_code: String,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize)]
pub struct RoomSummary {
    pub code: String,
    pub players: usize,
    pub host_disconnected: bool,
    pub current_game: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub store: &'static str,
    pub games: usize,
    pub rooms: Vec<RoomSummary>,
}

fn require_account(headers: &HeaderMap) -> Result<String, AppError> {
    auth::account_id(headers).ok_or_else(|| {
        AppError::Unauthorized(format!("missing {} header", auth::ACCOUNT_HEADER))
    })
}

/// POST /api/v1/rooms/{code}/host-token — replace the room's host token.
pub async fn regenerate_host_token(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<HostTokenResponse>, AppError> {
    let account = require_account(&headers)?;
    let code = normalize_room_code(&code);
    let host_token = state.service.regenerate_host_token(&code, &account).await?;
    Ok(Json(HostTokenResponse {
        room_code: code,
        host_token,
    }))
}

/// POST /api/v1/rooms/{code}/reactivate
pub async fn reactivate_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomActivityResponse>, AppError> {
    let account = require_account(&headers)?;
    let code = normalize_room_code(&code);
    let expires_at = state.service.reactivate_room(&code, &account).await?;
    Ok(Json(RoomActivityResponse {
        room_code: code,
        active: true,
        expires_at: Some(expires_at),
    }))
}

/// POST /api/v1/rooms/{code}/deactivate
pub async fn deactivate_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RoomActivityResponse>, AppError> {
    let account = require_account(&headers)?;
    let code = normalize_room_code(&code);
    state.service.deactivate_room(&code, &account).await?;
    Ok(Json(RoomActivityResponse {
        room_code: code,
        active: false,
        expires_at: None,
    }))
}

/// GET /api/v1/rooms/{code}/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let code = normalize_room_code(&code);
    let rooms = state.rooms.read().await;
    if !rooms.room_exists(&code) {
        return Err(AppError::NotFound(format!("room {code} is not live")));
    }
    let entries = rooms.get_session_leaderboard(&code);
    Ok(Json(LeaderboardResponse {
        room_code: code,
        entries,
    }))
}

/// GET /api/v1/status — live rooms at a glance.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let rooms = state.rooms.read().await;
    let mut summaries: Vec<RoomSummary> = rooms
        .rooms()
        .map(|room| RoomSummary {
            code: room.code.clone(),
            players: room.connected_count(),
            host_disconnected: room.host_disconnected,
            current_game: room.current_game.map(|g| g.as_str().to_string()),
            expires_at: room.expires_at,
        })
        .collect();
    summaries.sort_by(|a, b| a.code.cmp(&b.code));

    Json(StatusResponse {
        store: state.store_backend,
        games: state.game_registry.available_games(),
        rooms: summaries,
    })
}
