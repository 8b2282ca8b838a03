//! Durable backing store for rooms, player profiles, session scores and
//! game content.
//!
//! The in-memory registry is the source of truth for live play; the store is
//! the source of truth across restarts. Reads that decide an outcome (room
//! restore, host token lookup, content) are awaited by the room service.
//! Writes go through a [`StoreWriter`] and never block a registry operation.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use partyline_core::game_registry::GameType;
use partyline_core::room::{Room, RoomSettings};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for "relation does not exist" errors, which callers treat as an
    /// empty result.
    pub fn is_missing_table(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.message().contains("no such table"),
            _ => false,
        }
    }
}

/// Persisted form of a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub code: String,
    pub host_id: String,
    pub host_name: String,
    pub owner_account_id: Option<String>,
    pub host_token: Option<String>,
    pub settings: RoomSettings,
    pub current_game: Option<GameType>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub connected_players: u32,
    pub active: bool,
}

impl RoomRecord {
    pub fn from_room(room: &Room, host_token: Option<String>) -> Self {
        Self {
            code: room.code.clone(),
            host_id: room.host_id.clone(),
            host_name: room.host_name.clone(),
            owner_account_id: room.owner_account_id.clone(),
            host_token,
            settings: room.settings.clone(),
            current_game: room.current_game,
            created_at: room.created_at,
            expires_at: room.expires_at,
            last_accessed: room.last_accessed,
            connected_players: room.connected_count() as u32,
            active: true,
        }
    }

    /// Whether this record may be brought back into memory at `now`.
    pub fn is_restorable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.expires_at
    }
}

/// Per-room selection of content for one game type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSettingsRecord {
    pub room_code: String,
    pub game_type: GameType,
    pub content_set_id: Option<String>,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn upsert_room(&self, record: &RoomRecord) -> Result<(), StoreError>;

    async fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StoreError>;

    /// Mirror activity fields after a join, leave or reconnect.
    async fn touch_room(
        &self,
        code: &str,
        expires_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        connected_players: u32,
    ) -> Result<(), StoreError>;

    /// Set the active flag, optionally moving `expires_at`. Returns false
    /// when no such room exists.
    async fn set_room_active(
        &self,
        code: &str,
        active: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Returns false when no such room exists.
    async fn set_host_token(&self, code: &str, token: &str) -> Result<bool, StoreError>;

    async fn find_room_by_host_token(&self, token: &str)
    -> Result<Option<RoomRecord>, StoreError>;

    /// The most recently accessed active, unexpired room owned by `owner`.
    async fn latest_active_room_for_owner(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RoomRecord>, StoreError>;

    async fn load_profile_avatar(&self, player_name: &str) -> Result<Option<String>, StoreError>;

    async fn upsert_profile_avatar(&self, player_name: &str, avatar: &str)
    -> Result<(), StoreError>;

    async fn load_session_score(
        &self,
        room_code: &str,
        player_name: &str,
    ) -> Result<Option<i64>, StoreError>;

    async fn upsert_session_score(
        &self,
        room_code: &str,
        player_name: &str,
        total: i64,
    ) -> Result<(), StoreError>;

    async fn clear_session_scores(&self, room_code: &str) -> Result<(), StoreError>;

    async fn load_game_settings(
        &self,
        room_code: &str,
        game_type: GameType,
    ) -> Result<Option<GameSettingsRecord>, StoreError>;

    async fn load_content_set(
        &self,
        game_type: GameType,
        content_set_id: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError>;

    async fn load_default_content(
        &self,
        game_type: GameType,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, StoreError>;
}

pub type SharedStore = Arc<dyn RoomStore>;

/// A queued best-effort write.
#[derive(Debug)]
pub enum StoreWrite {
    UpsertRoom(Box<RoomRecord>),
    TouchRoom {
        code: String,
        expires_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        connected_players: u32,
    },
    DeactivateRoom(String),
    UpsertProfileAvatar {
        player_name: String,
        avatar: String,
    },
    UpsertSessionScore {
        room_code: String,
        player_name: String,
        total: i64,
    },
    ClearSessionScores(String),
    /// Resolves once every write queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

impl StoreWrite {
    fn label(&self) -> &'static str {
        match self {
            Self::UpsertRoom(_) => "upsert_room",
            Self::TouchRoom { .. } => "touch_room",
            Self::DeactivateRoom(_) => "deactivate_room",
            Self::UpsertProfileAvatar { .. } => "upsert_profile_avatar",
            Self::UpsertSessionScore { .. } => "upsert_session_score",
            Self::ClearSessionScores(_) => "clear_session_scores",
            Self::Flush(_) => "flush",
        }
    }
}

/// Fire-and-forget write path. Writes are applied in submission order by a
/// single background task; failures are logged and dropped.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreWrite>,
}

impl StoreWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(store: SharedStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreWrite>();
        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                let label = write.label();
                if let Err(e) = apply(store.as_ref(), write).await {
                    tracing::warn!(op = label, error = %e, "Store write failed");
                }
            }
            tracing::debug!("Store writer stopped");
        });
        Self { tx }
    }

    pub fn submit(&self, write: StoreWrite) {
        if self.tx.send(write).is_err() {
            tracing::warn!("Store writer is gone, dropping write");
        }
    }

    /// Wait until everything submitted so far has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(StoreWrite::Flush(done_tx));
        let _ = done_rx.await;
    }
}

async fn apply(store: &dyn RoomStore, write: StoreWrite) -> Result<(), StoreError> {
    match write {
        StoreWrite::UpsertRoom(record) => store.upsert_room(&record).await,
        StoreWrite::TouchRoom {
            code,
            expires_at,
            last_accessed,
            connected_players,
        } => {
            store
                .touch_room(&code, expires_at, last_accessed, connected_players)
                .await
        },
        StoreWrite::DeactivateRoom(code) => {
            store.set_room_active(&code, false, None).await.map(drop)
        },
        StoreWrite::UpsertProfileAvatar {
            player_name,
            avatar,
        } => store.upsert_profile_avatar(&player_name, &avatar).await,
        StoreWrite::UpsertSessionScore {
            room_code,
            player_name,
            total,
        } => {
            store
                .upsert_session_score(&room_code, &player_name, total)
                .await
        },
        StoreWrite::ClearSessionScores(code) => store.clear_session_scores(&code).await,
        StoreWrite::Flush(done) => {
            let _ = done.send(());
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_applies_in_order_and_survives_failures() {
        let store = Arc::new(MemoryStore::new());
        let writer = StoreWriter::spawn(Arc::clone(&store) as SharedStore);

        writer.submit(StoreWrite::UpsertSessionScore {
            room_code: "ABCD".into(),
            player_name: "bob".into(),
            total: 10,
        });
        store.set_failing(true);
        writer.flush().await;
        writer.submit(StoreWrite::UpsertSessionScore {
            room_code: "ABCD".into(),
            player_name: "bob".into(),
            total: 99,
        });
        writer.flush().await;
        store.set_failing(false);
        writer.submit(StoreWrite::UpsertSessionScore {
            room_code: "ABCD".into(),
            player_name: "bob".into(),
            total: 30,
        });
        writer.flush().await;

        assert_eq!(store.load_session_score("ABCD", "bob").await.unwrap(), Some(30));
    }
}
