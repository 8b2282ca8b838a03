use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use partyline_core::game_registry::GameType;

/// Failure of a room, player, host or game operation. Sent to clients as
/// `ServerMessage::Error { kind, reason }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room has expired")]
    RoomExpired,
    #[error("Room is full")]
    RoomFull,
    #[error("That name is already in use in this room")]
    NameTaken,
    #[error("Names must be 1-32 characters without control characters")]
    InvalidName,
    #[error("Reconnection token is invalid or has been replaced")]
    TokenInvalid,
    #[error("Account does not own this room")]
    Unauthorized,
    #[error("Durable store is not available")]
    StoreUnavailable,
    #[error("Could not create a {} game", .0.as_str())]
    EngineConstructionFailed(GameType),
    #[error("Only the host can do that")]
    NotHost,
    #[error("No game is running")]
    NoActiveGame,
}

impl RoomError {
    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "room_not_found",
            Self::RoomExpired => "room_expired",
            Self::RoomFull => "room_full",
            Self::NameTaken => "name_taken",
            Self::InvalidName => "invalid_name",
            Self::TokenInvalid => "token_invalid",
            Self::Unauthorized => "unauthorized",
            Self::StoreUnavailable => "store_unavailable",
            Self::EngineConstructionFailed(_) => "engine_construction_failed",
            Self::NotHost => "not_host",
            Self::NoActiveGame => "no_active_game",
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Unavailable(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::Unavailable(m) => write!(f, "{m}"),
        }
    }
}

impl From<RoomError> for AppError {
    fn from(e: RoomError) -> Self {
        let message = e.to_string();
        match e {
            RoomError::RoomNotFound | RoomError::RoomExpired => Self::NotFound(message),
            RoomError::Unauthorized => Self::Forbidden(message),
            RoomError::StoreUnavailable => Self::Unavailable(message),
            _ => Self::BadRequest(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Self::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            Self::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
