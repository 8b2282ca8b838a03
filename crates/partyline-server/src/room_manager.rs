use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use partyline_core::game_trait::{GameEngine, RoundTiming};
use partyline_core::net::messages::{
    LeaderboardEntry, RoomClosedMsg, RoomView, ServerMessage,
};
use partyline_core::net::protocol::encode_server_message;
use partyline_core::player::{ConnectionId, Roster};
use partyline_core::room::{
    CoarseState, JukeboxSettings, Room, RoomSettings, SettingsError, generate_room_code,
};

use crate::config::ServerConfig;
use crate::game_session::ServerGameRegistry;
use crate::store::{RoomRecord, StoreWrite, StoreWriter};

/// Per-connection sender for outbound WebSocket binary messages.
/// Bounded so a slow client cannot exhaust memory.
pub type PlayerSender = mpsc::Sender<Bytes>;

/// Lifetime and game timing rules applied to every room.
#[derive(Debug, Clone, Copy)]
pub struct RoomPolicy {
    /// Expiry horizon while anyone is attached to the room.
    pub active_ttl: chrono::Duration,
    /// Expiry horizon once the host and every player are gone.
    pub abandoned_ttl: chrono::Duration,
    pub timing: RoundTiming,
    pub max_rounds: u32,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            active_ttl: chrono::Duration::hours(24),
            abandoned_ttl: chrono::Duration::minutes(30),
            timing: RoundTiming::default(),
            max_rounds: 0,
        }
    }
}

impl RoomPolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            active_ttl: config.rooms.active_ttl(),
            abandoned_ttl: config.rooms.abandoned_ttl(),
            timing: config.games.timing(),
            max_rounds: config.games.max_rounds,
        }
    }
}

/// The live engine of a room.
pub(crate) struct GameSession {
    pub(crate) engine: Box<dyn GameEngine>,
    pub(crate) instance_id: u64,
    /// Post-warm-up resync and state pump.
    pub(crate) resync: Option<JoinHandle<()>>,
}

impl GameSession {
    /// Cancel the resync task and release the engine.
    pub(crate) fn shutdown(mut self) {
        if let Some(handle) = self.resync.take() {
            handle.abort();
        }
        self.engine.destroy();
    }
}

pub(crate) struct RoomEntry {
    pub(crate) room: Room,
    pub(crate) jukebox: JukeboxSettings,
    /// Cumulative scores in first-scored order.
    pub(crate) leaderboard: Vec<LeaderboardEntry>,
    pub(crate) game: Option<GameSession>,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self {
            room,
            jukebox: JukeboxSettings::default(),
            leaderboard: Vec::new(),
            game: None,
        }
    }
}

/// What a player reconnection token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlayerTokenBinding {
    pub(crate) room_code: String,
    pub(crate) name_key: String,
    /// Connection the token was last issued to or re-associated with.
    pub(crate) conn: ConnectionId,
}

/// In-memory registry of rooms, players, hosts and live games.
///
/// Every method is synchronous; callers hold the [`SharedRoomManager`]
/// lock for the duration of a call and never across a store await.
///
/// [`SharedRoomManager`]: crate::state::SharedRoomManager
pub struct RoomManager {
    pub(crate) rooms: HashMap<String, RoomEntry>,
    /// Player connection -> room code. Disconnected players keep their entry
    /// until they are rebound or removed.
    pub(crate) player_rooms: HashMap<ConnectionId, String>,
    pub(crate) player_tokens: HashMap<String, PlayerTokenBinding>,
    /// (room code, name key) -> player token.
    pub(crate) player_token_index: HashMap<(String, String), String>,
    /// Host token -> room code.
    pub(crate) host_tokens: HashMap<String, String>,
    /// Room code -> host token.
    pub(crate) room_host_tokens: HashMap<String, String>,
    pub(crate) senders: HashMap<ConnectionId, PlayerSender>,
    /// Codes deleted in this process, with the deletion time. A restore
    /// from the store never brings a tombstoned code back.
    pub(crate) tombstones: HashMap<String, DateTime<Utc>>,
    pub(crate) next_instance_id: u64,
    pub(crate) writer: Option<StoreWriter>,
    pub(crate) registry: Arc<ServerGameRegistry>,
    pub(crate) policy: RoomPolicy,
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(Arc::new(ServerGameRegistry::new()), RoomPolicy::default(), None)
    }
}

impl RoomManager {
    pub fn new(
        registry: Arc<ServerGameRegistry>,
        policy: RoomPolicy,
        writer: Option<StoreWriter>,
    ) -> Self {
        Self {
            rooms: HashMap::new(),
            player_rooms: HashMap::new(),
            player_tokens: HashMap::new(),
            player_token_index: HashMap::new(),
            host_tokens: HashMap::new(),
            room_host_tokens: HashMap::new(),
            senders: HashMap::new(),
            tombstones: HashMap::new(),
            next_instance_id: 1,
            writer,
            registry,
            policy,
        }
    }

    pub fn registry(&self) -> &ServerGameRegistry {
        &self.registry
    }

    /// Queue a best-effort store write. No-op when running memory-only.
    pub(crate) fn persist(&self, write: StoreWrite) {
        if let Some(ref writer) = self.writer {
            writer.submit(write);
        }
    }

    /// Mirror the full room record to the store.
    pub(crate) fn persist_room(&self, code: &str) {
        if let Some(entry) = self.rooms.get(code) {
            let token = self.room_host_tokens.get(code).cloned();
            let record = RoomRecord::from_room(&entry.room, token);
            self.persist(StoreWrite::UpsertRoom(Box::new(record)));
        }
    }

    fn unique_code(&self) -> String {
        loop {
            let code = generate_room_code();
            if !self.rooms.contains_key(&code) && !self.tombstones.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a room hosted by `host_id` and issue its host token.
    pub fn create_room(&mut self, host_id: &str, host_name: &str, owner: Option<&str>) -> Room {
        let code = self.unique_code();
        let room = Room::new(
            code.clone(),
            host_id.to_string(),
            host_name.to_string(),
            owner.map(str::to_string),
            Utc::now(),
            self.policy.active_ttl,
        );
        self.rooms.insert(code.clone(), RoomEntry::new(room.clone()));
        self.issue_host_token(&code);
        self.persist_room(&code);
        tracing::info!(room = %code, host = %host_name, "Room created");
        room
    }

    /// In-memory half of create-or-get: a room this connection already
    /// hosts, else the owner's most recently accessed live room (rebound to
    /// this connection). `None` means the store should be consulted.
    pub fn find_existing_room(&mut self, host_id: &str, owner: Option<&str>) -> Option<Room> {
        if let Some(room) = self.get_room_by_host(host_id) {
            return Some(room.clone());
        }
        let owner = owner?;
        let now = Utc::now();
        let code = self
            .rooms
            .values()
            .filter(|e| {
                e.room.owner_account_id.as_deref() == Some(owner) && !e.room.is_expired_at(now)
            })
            .max_by_key(|e| e.room.last_accessed)
            .map(|e| e.room.code.clone())?;
        self.update_host_socket(&code, host_id);
        self.get_room(&code).cloned()
    }

    pub fn get_room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code).map(|e| &e.room)
    }

    /// Linear scan; the per-process room count is small.
    pub fn get_room_by_host(&self, host_id: &str) -> Option<&Room> {
        self.rooms
            .values()
            .map(|e| &e.room)
            .find(|r| r.host_id == host_id)
    }

    pub fn room_exists(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Bring a stored room back into memory.
    ///
    /// The live room wins if one exists. A code deleted in this process is
    /// never restored, which settles a store load racing a deletion.
    /// Restored rooms start in the lobby with an empty roster and the host
    /// marked disconnected.
    pub fn restore_room(&mut self, record: RoomRecord) -> Option<Room> {
        if let Some(entry) = self.rooms.get(&record.code) {
            return Some(entry.room.clone());
        }
        if self.tombstones.contains_key(&record.code) {
            tracing::info!(room = %record.code, "Discarding restore of a deleted room");
            return None;
        }
        if !record.is_restorable_at(Utc::now()) {
            return None;
        }

        let code = record.code.clone();
        let room = Room {
            code: record.code,
            host_id: record.host_id,
            host_name: record.host_name,
            owner_account_id: record.owner_account_id,
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_accessed: record.last_accessed,
            current_game: None,
            coarse_state: CoarseState::Lobby,
            players: Roster::default(),
            settings: record.settings,
            host_disconnected: true,
        };
        self.rooms.insert(code.clone(), RoomEntry::new(room.clone()));
        if let Some(token) = record.host_token {
            self.install_host_token(&code, token);
        }
        tracing::info!(room = %code, "Room restored from store");
        Some(room)
    }

    /// Allow a previously deleted code to be restored again.
    pub fn clear_tombstone(&mut self, code: &str) {
        self.tombstones.remove(code);
    }

    pub fn delete_room(&mut self, code: &str) -> bool {
        self.close_room(code, "deleted")
    }

    /// Tear down a room: notify its connections, drop every index that
    /// points at it, destroy the live engine, clear the leaderboard and
    /// deactivate the stored record.
    pub(crate) fn close_room(&mut self, code: &str, reason: &str) -> bool {
        self.tombstones.insert(code.to_string(), Utc::now());
        self.persist(StoreWrite::DeactivateRoom(code.to_string()));

        if !self.rooms.contains_key(code) {
            return false;
        }
        self.broadcast(
            code,
            &ServerMessage::RoomClosed(RoomClosedMsg {
                room_code: code.to_string(),
                reason: reason.to_string(),
            }),
        );

        let Some(mut entry) = self.rooms.remove(code) else {
            return false;
        };
        if let Some(session) = entry.game.take() {
            session.shutdown();
        }
        self.player_rooms.retain(|_, room| room != code);
        self.player_tokens.retain(|_, b| b.room_code != code);
        self.player_token_index.retain(|(room, _), _| room != code);
        if let Some(token) = self.room_host_tokens.remove(code) {
            self.host_tokens.remove(&token);
        }
        self.persist(StoreWrite::ClearSessionScores(code.to_string()));

        tracing::info!(room = %code, reason, "Room closed");
        true
    }

    /// Delete every room whose expiry has passed. Returns the number removed.
    pub fn cleanup_expired_rooms(&mut self) -> usize {
        self.cleanup_expired_rooms_at(Utc::now())
    }

    pub fn cleanup_expired_rooms_at(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .rooms
            .values()
            .filter(|e| e.room.is_expired_at(now))
            .map(|e| e.room.code.clone())
            .collect();
        for code in &expired {
            self.close_room(code, "expired");
        }
        let horizon = self.policy.active_ttl;
        self.tombstones.retain(|_, deleted_at| *deleted_at + horizon > now);
        expired.len()
    }

    /// Dual TTL: a room nobody is attached to gets the short abandoned
    /// horizon, anything else the full active one.
    pub fn update_room_expiry_on_activity(&mut self, code: &str) {
        let now = Utc::now();
        let abandoned_ttl = self.policy.abandoned_ttl;
        let active_ttl = self.policy.active_ttl;
        let Some(entry) = self.rooms.get_mut(code) else {
            return;
        };
        let ttl = if entry.room.is_abandoned() {
            abandoned_ttl
        } else {
            active_ttl
        };
        entry.room.expires_at = now + ttl;
        entry.room.last_accessed = now;
        let write = StoreWrite::TouchRoom {
            code: code.to_string(),
            expires_at: entry.room.expires_at,
            last_accessed: now,
            connected_players: entry.room.connected_count() as u32,
        };
        self.persist(write);
    }

    /// Replace the room settings. Invalid settings are rejected and the
    /// previous settings kept.
    pub fn update_settings(
        &mut self,
        code: &str,
        settings: RoomSettings,
    ) -> Result<bool, SettingsError> {
        settings.validate()?;
        let Some(entry) = self.rooms.get_mut(code) else {
            return Ok(false);
        };
        entry.room.settings = settings;
        self.persist_room(code);
        Ok(true)
    }

    pub fn set_jukebox(&mut self, code: &str, jukebox: JukeboxSettings) -> bool {
        match self.rooms.get_mut(code) {
            Some(entry) => {
                entry.jukebox = jukebox.normalized();
                true
            },
            None => false,
        }
    }

    pub fn jukebox(&self, code: &str) -> Option<&JukeboxSettings> {
        self.rooms.get(code).map(|e| &e.jukebox)
    }

    /// (live rooms, connected players across them)
    pub fn stats(&self) -> (usize, usize) {
        let players = self.rooms.values().map(|e| e.room.connected_count()).sum();
        (self.rooms.len(), players)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values().map(|e| &e.room)
    }

    // ----------------------------------------------------------------
    // Outbound messages
    // ----------------------------------------------------------------

    pub fn register_sender(&mut self, conn: &str, sender: PlayerSender) {
        self.senders.insert(conn.to_string(), sender);
    }

    pub fn unregister_sender(&mut self, conn: &str) {
        self.senders.remove(conn);
    }

    /// Connections currently attached to a room: the host (unless
    /// disconnected) and every connected player.
    fn room_connections(&self, code: &str) -> Vec<ConnectionId> {
        let Some(entry) = self.rooms.get(code) else {
            return Vec::new();
        };
        let room = &entry.room;
        let mut conns: Vec<ConnectionId> = room
            .players
            .iter()
            .filter(|p| p.is_connected())
            .map(|p| p.id.clone())
            .collect();
        if !room.host_disconnected {
            conns.push(room.host_id.clone());
        }
        conns
    }

    pub fn send_to(&self, conn: &str, msg: &ServerMessage) {
        let Some(sender) = self.senders.get(conn) else {
            return;
        };
        match encode_server_message(msg) {
            Ok(data) => {
                if let Err(e) = sender.try_send(Bytes::from(data)) {
                    tracing::debug!(
                        conn, error = %e,
                        "Failed to send to connection (slow or disconnected)"
                    );
                }
            },
            Err(e) => tracing::warn!(error = %e, "Failed to encode server message"),
        }
    }

    /// Send one message to everyone in the room.
    pub fn broadcast(&self, code: &str, msg: &ServerMessage) {
        let data = match encode_server_message(msg) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                tracing::warn!(room = code, error = %e, "Failed to encode broadcast");
                return;
            },
        };
        for conn in self.room_connections(code) {
            if let Some(sender) = self.senders.get(&conn)
                && let Err(e) = sender.try_send(data.clone())
            {
                tracing::debug!(
                    conn = %conn, room = code, error = %e,
                    "Skipping broadcast to slow client"
                );
            }
        }
    }

    pub fn broadcast_room_update(&self, code: &str) {
        if let Some(room) = self.get_room(code) {
            let view = RoomView::from(room);
            self.broadcast(code, &ServerMessage::RoomUpdate(Box::new(view)));
        }
    }
}
