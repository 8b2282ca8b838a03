use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game_registry::GameType;
use crate::game_trait::EnginePhase;
use crate::player::{ConnectionId, Roster};

/// Length of a room code as typed by players.
pub const ROOM_CODE_LEN: usize = 4;

/// Room code alphabet. Omits I, O, 0 and 1 so codes read cleanly off a TV.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const MAX_ROOM_NAME_LEN: usize = 60;
pub const MAX_DESCRIPTION_LEN: usize = 280;
pub const MAX_PLAYERS_LIMIT: u8 = 100;
pub const DEFAULT_MAX_PLAYERS: u8 = 10;

pub const AVATAR_STYLES: &[&str] = &["bottts", "adventurer", "pixel-art", "fun-emoji", "thumbs"];
pub const THEMES: &[&str] = &["classic", "neon", "pastel", "midnight"];

/// Generate a random room code. Uniqueness against live rooms is the
/// registry's job.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-typed room code.
pub fn normalize_room_code(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}

/// Room-level game state label. A lagging mirror of the live engine's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoarseState {
    Lobby,
    Starting,
    Playing,
    RoundEnd,
    Paused,
    GameEnd,
}

impl From<EnginePhase> for CoarseState {
    fn from(phase: EnginePhase) -> Self {
        match phase {
            EnginePhase::Starting => Self::Starting,
            EnginePhase::Playing => Self::Playing,
            EnginePhase::RoundEnd => Self::RoundEnd,
            EnginePhase::Paused => Self::Paused,
            EnginePhase::Finished => Self::GameEnd,
        }
    }
}

/// Host-editable room configuration. Always schema-valid once stored on a
/// room: use [`RoomSettings::from_json`] for untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub name: String,
    pub description: String,
    pub max_players: u8,
    pub avatar_style: String,
    pub theme: String,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            max_players: DEFAULT_MAX_PLAYERS,
            avatar_style: AVATAR_STYLES[0].to_string(),
            theme: THEMES[0].to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    NameTooLong(usize),
    DescriptionTooLong(usize),
    MaxPlayersOutOfRange(u8),
    UnknownAvatarStyle(String),
    UnknownTheme(String),
    Malformed(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTooLong(n) => {
                write!(f, "room name is {n} chars (max {MAX_ROOM_NAME_LEN})")
            },
            Self::DescriptionTooLong(n) => {
                write!(f, "description is {n} chars (max {MAX_DESCRIPTION_LEN})")
            },
            Self::MaxPlayersOutOfRange(n) => {
                write!(f, "max_players {n} outside 1..={MAX_PLAYERS_LIMIT}")
            },
            Self::UnknownAvatarStyle(s) => write!(f, "unknown avatar style: {s}"),
            Self::UnknownTheme(s) => write!(f, "unknown theme: {s}"),
            Self::Malformed(e) => write!(f, "malformed settings: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl RoomSettings {
    /// Defaults with the room named after its host.
    pub fn for_host(host_name: &str) -> Self {
        let name: String = format!("{host_name}'s room")
            .chars()
            .take(MAX_ROOM_NAME_LEN)
            .collect();
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let name_len = self.name.chars().count();
        if name_len > MAX_ROOM_NAME_LEN {
            return Err(SettingsError::NameTooLong(name_len));
        }
        let desc_len = self.description.chars().count();
        if desc_len > MAX_DESCRIPTION_LEN {
            return Err(SettingsError::DescriptionTooLong(desc_len));
        }
        if self.max_players == 0 || self.max_players > MAX_PLAYERS_LIMIT {
            return Err(SettingsError::MaxPlayersOutOfRange(self.max_players));
        }
        if !AVATAR_STYLES.contains(&self.avatar_style.as_str()) {
            return Err(SettingsError::UnknownAvatarStyle(self.avatar_style.clone()));
        }
        if !THEMES.contains(&self.theme.as_str()) {
            return Err(SettingsError::UnknownTheme(self.theme.clone()));
        }
        Ok(())
    }

    /// Parse and validate a stored settings blob.
    pub fn parse(raw: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            serde_json::from_str(raw).map_err(|e| SettingsError::Malformed(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`RoomSettings::parse`], but never fails: invalid blobs fall back
    /// to defaults.
    pub fn from_json(raw: &str) -> Self {
        match Self::parse(raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid room settings, using defaults");
                Self::default()
            },
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Media playback settings the host can toggle from the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JukeboxSettings {
    pub enabled: bool,
    pub playlist: Option<String>,
    pub volume: u8,
    pub shuffle: bool,
}

impl Default for JukeboxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            playlist: None,
            volume: 50,
            shuffle: false,
        }
    }
}

impl JukeboxSettings {
    /// Clamp volume into 0..=100.
    pub fn normalized(mut self) -> Self {
        self.volume = self.volume.min(100);
        self
    }
}

/// A live party room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub code: String,
    pub host_id: ConnectionId,
    pub host_name: String,
    pub owner_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub current_game: Option<GameType>,
    pub coarse_state: CoarseState,
    pub players: Roster,
    pub settings: RoomSettings,
    pub host_disconnected: bool,
}

impl Room {
    pub fn new(
        code: String,
        host_id: ConnectionId,
        host_name: String,
        owner_account_id: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let settings = RoomSettings::for_host(&host_name);
        Self {
            code,
            host_id,
            host_name,
            owner_account_id,
            created_at: now,
            expires_at: now + ttl,
            last_accessed: now,
            current_game: None,
            coarse_state: CoarseState::Lobby,
            players: Roster::default(),
            settings,
            host_disconnected: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn connected_count(&self) -> usize {
        self.players.connected_count()
    }

    /// True when nobody, host included, is attached to the room.
    pub fn is_abandoned(&self) -> bool {
        self.host_disconnected && self.players.connected_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "Invalid room code: {code}");
        }
    }

    #[test]
    fn code_validation_rejects_ambiguous_chars() {
        assert!(is_valid_room_code("ABCD"));
        assert!(!is_valid_room_code("ABC"));
        assert!(!is_valid_room_code("ABCO"));
        assert!(!is_valid_room_code("AB1D"));
        assert!(!is_valid_room_code("abcd"));
        assert!(is_valid_room_code(&normalize_room_code(" abcd ")));
    }

    #[test]
    fn settings_fall_back_to_defaults_on_garbage() {
        assert_eq!(RoomSettings::from_json("not json"), RoomSettings::default());
        let too_many = r#"{"max_players": 0}"#;
        assert_eq!(RoomSettings::from_json(too_many), RoomSettings::default());
        let bad_theme = r#"{"theme": "vaporwave"}"#;
        assert!(matches!(
            RoomSettings::parse(bad_theme),
            Err(SettingsError::UnknownTheme(_))
        ));
    }

    #[test]
    fn settings_partial_blob_keeps_defaults() {
        let settings = RoomSettings::from_json(r#"{"name": "Friday quiz", "max_players": 4}"#);
        assert_eq!(settings.name, "Friday quiz");
        assert_eq!(settings.max_players, 4);
        assert_eq!(settings.theme, "classic");
        assert_eq!(RoomSettings::from_json(&settings.to_json()), settings);
    }

    #[test]
    fn host_room_name_is_truncated() {
        let long = "x".repeat(100);
        let settings = RoomSettings::for_host(&long);
        assert_eq!(settings.name.chars().count(), MAX_ROOM_NAME_LEN);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn coarse_state_mirrors_engine_phase() {
        assert_eq!(CoarseState::from(EnginePhase::Starting), CoarseState::Starting);
        assert_eq!(CoarseState::from(EnginePhase::Finished), CoarseState::GameEnd);
        let json = serde_json::to_string(&CoarseState::RoundEnd).unwrap();
        assert_eq!(json, "\"ROUND_END\"");
    }

    #[test]
    fn new_room_starts_in_lobby() {
        let now = Utc::now();
        let room = Room::new(
            "ABCD".into(),
            "host-1".into(),
            "Alice".into(),
            None,
            now,
            Duration::hours(24),
        );
        assert_eq!(room.coarse_state, CoarseState::Lobby);
        assert!(room.players.is_empty());
        assert_eq!(room.expires_at, now + Duration::hours(24));
        assert!(!room.is_expired_at(now));
        assert!(room.is_expired_at(now + Duration::hours(24)));
    }

    #[test]
    fn jukebox_volume_is_clamped() {
        let jb = JukeboxSettings {
            volume: 250,
            ..JukeboxSettings::default()
        }
        .normalized();
        assert_eq!(jb.volume, 100);
    }
}
