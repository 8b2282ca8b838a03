use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game_registry::GameType;
use crate::game_trait::EngineSnapshot;
use crate::player::{ConnectionId, Player, PlayerStatus};
use crate::room::{CoarseState, JukeboxSettings, Room, RoomSettings};

/// Network message type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server: session
    CreateRoom = 0x01,
    ReconnectHost = 0x02,
    JoinRoom = 0x03,
    ReconnectPlayer = 0x04,
    LeaveRoom = 0x05,

    // Client -> Server: host controls
    StartGame = 0x06,
    EndGame = 0x07,
    PauseGame = 0x08,
    ResumeGame = 0x09,
    EndRoom = 0x0A,
    UpdateSettings = 0x0B,
    SetJukebox = 0x0C,

    // Client -> Server: gameplay
    GameInput = 0x0D,

    // Server -> Client
    RoomCreated = 0x10,
    Joined = 0x11,
    Ack = 0x12,
    Error = 0x13,
    RoomUpdate = 0x14,
    GameState = 0x15,
    Leaderboard = 0x16,
    RoomClosed = 0x17,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::CreateRoom),
            0x02 => Some(Self::ReconnectHost),
            0x03 => Some(Self::JoinRoom),
            0x04 => Some(Self::ReconnectPlayer),
            0x05 => Some(Self::LeaveRoom),
            0x06 => Some(Self::StartGame),
            0x07 => Some(Self::EndGame),
            0x08 => Some(Self::PauseGame),
            0x09 => Some(Self::ResumeGame),
            0x0A => Some(Self::EndRoom),
            0x0B => Some(Self::UpdateSettings),
            0x0C => Some(Self::SetJukebox),
            0x0D => Some(Self::GameInput),
            0x10 => Some(Self::RoomCreated),
            0x11 => Some(Self::Joined),
            0x12 => Some(Self::Ack),
            0x13 => Some(Self::Error),
            0x14 => Some(Self::RoomUpdate),
            0x15 => Some(Self::GameState),
            0x16 => Some(Self::Leaderboard),
            0x17 => Some(Self::RoomClosed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomMsg {
    pub host_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectHostMsg {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomMsg {
    pub room_code: String,
    pub player_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPlayerMsg {
    pub room_code: String,
    pub token: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGameMsg {
    pub game_type: GameType,
    /// Content rows supplied by the host; `None` loads stored content.
    #[serde(default)]
    pub content: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInputMsg {
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSettingsMsg {
    pub settings: RoomSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetJukeboxMsg {
    pub jukebox: JukeboxSettings,
}

/// Messages sent by hosts and players.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    CreateRoom(CreateRoomMsg),
    ReconnectHost(ReconnectHostMsg),
    JoinRoom(JoinRoomMsg),
    ReconnectPlayer(ReconnectPlayerMsg),
    LeaveRoom,
    StartGame(StartGameMsg),
    EndGame,
    PauseGame,
    ResumeGame,
    EndRoom,
    UpdateSettings(UpdateSettingsMsg),
    SetJukebox(SetJukeboxMsg),
    GameInput(GameInputMsg),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::CreateRoom(_) => MessageType::CreateRoom,
            Self::ReconnectHost(_) => MessageType::ReconnectHost,
            Self::JoinRoom(_) => MessageType::JoinRoom,
            Self::ReconnectPlayer(_) => MessageType::ReconnectPlayer,
            Self::LeaveRoom => MessageType::LeaveRoom,
            Self::StartGame(_) => MessageType::StartGame,
            Self::EndGame => MessageType::EndGame,
            Self::PauseGame => MessageType::PauseGame,
            Self::ResumeGame => MessageType::ResumeGame,
            Self::EndRoom => MessageType::EndRoom,
            Self::UpdateSettings(_) => MessageType::UpdateSettings,
            Self::SetJukebox(_) => MessageType::SetJukebox,
            Self::GameInput(_) => MessageType::GameInput,
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Client-facing view of a player. Connection ids other than the
/// recipient's own are not exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub status: PlayerStatus,
    pub score: i64,
    pub avatar: String,
}

impl From<&Player> for PlayerView {
    fn from(p: &Player) -> Self {
        Self {
            name: p.name.clone(),
            status: p.status,
            score: p.score,
            avatar: p.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub code: String,
    pub host_name: String,
    pub coarse_state: CoarseState,
    pub current_game: Option<GameType>,
    pub settings: RoomSettings,
    pub players: Vec<PlayerView>,
    pub host_disconnected: bool,
    pub expires_at: DateTime<Utc>,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            code: room.code.clone(),
            host_name: room.host_name.clone(),
            coarse_state: room.coarse_state,
            current_game: room.current_game,
            settings: room.settings.clone(),
            players: room.players.to_sorted_vec().iter().map(PlayerView::from).collect(),
            host_disconnected: room.host_disconnected,
            expires_at: room.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomCreatedMsg {
    pub host_token: String,
    pub room: RoomView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedMsg {
    pub player_id: ConnectionId,
    pub player_token: String,
    /// True when an existing record was rebound to this connection.
    pub reconnected: bool,
    /// Cumulative session score restored for this player.
    pub session_score: i64,
    pub room: RoomView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMsg {
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    /// Stable machine-readable error kind, e.g. `room_full`.
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateMsg {
    pub room_code: String,
    pub snapshot: EngineSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_name: String,
    pub total_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardMsg {
    pub room_code: String,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomClosedMsg {
    pub room_code: String,
    pub reason: String,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    RoomCreated(Box<RoomCreatedMsg>),
    Joined(Box<JoinedMsg>),
    Ack(AckMsg),
    Error(ErrorMsg),
    RoomUpdate(Box<RoomView>),
    GameState(Box<GameStateMsg>),
    Leaderboard(LeaderboardMsg),
    RoomClosed(RoomClosedMsg),
}

impl ServerMessage {
    pub fn ack(action: &str) -> Self {
        Self::Ack(AckMsg {
            action: action.to_string(),
        })
    }

    pub fn error(kind: &str, reason: impl Into<String>) -> Self {
        Self::Error(ErrorMsg {
            kind: kind.to_string(),
            reason: reason.into(),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::RoomCreated(_) => MessageType::RoomCreated,
            Self::Joined(_) => MessageType::Joined,
            Self::Ack(_) => MessageType::Ack,
            Self::Error(_) => MessageType::Error,
            Self::RoomUpdate(_) => MessageType::RoomUpdate,
            Self::GameState(_) => MessageType::GameState,
            Self::Leaderboard(_) => MessageType::Leaderboard,
            Self::RoomClosed(_) => MessageType::RoomClosed,
        }
    }
}
