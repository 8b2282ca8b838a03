//! Store-aware orchestration over the room registry.
//!
//! Every method follows the same discipline: read memory under the lock,
//! release it, await the store, then re-acquire and re-validate. The lock is
//! never held across a store call.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use partyline_core::game_registry::GameType;
use partyline_core::game_trait::EngineSnapshot;
use partyline_core::player::Player;
use partyline_core::room::{Room, normalize_room_code};
use partyline_core::token::issue_token;

use crate::error::RoomError;
use crate::game_session::spawn_state_pump;
use crate::players::JoinRequest;
use crate::state::SharedRoomManager;
use crate::store::{RoomRecord, SharedStore, StoreWriter};

/// A room handed to its host, with the token that reattaches the host.
#[derive(Debug, Clone)]
pub struct HostedRoom {
    pub room: Room,
    pub host_token: String,
}

/// A player attached to a room.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub room: Room,
    pub player: Player,
    pub token: String,
    pub reconnected: bool,
    /// Cumulative session score, restored from memory or the store.
    pub session_score: i64,
}

#[derive(Clone)]
pub struct RoomService {
    rooms: SharedRoomManager,
    store: Option<SharedStore>,
    writer: Option<StoreWriter>,
    default_content_limit: u32,
    active_ttl: chrono::Duration,
}

impl RoomService {
    pub fn new(
        rooms: SharedRoomManager,
        store: Option<SharedStore>,
        writer: Option<StoreWriter>,
        default_content_limit: u32,
        active_ttl: chrono::Duration,
    ) -> Self {
        Self {
            rooms,
            store,
            writer,
            default_content_limit,
            active_ttl,
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Wait for every queued best-effort write to reach the store.
    pub async fn flush_writes(&self) {
        if let Some(ref writer) = self.writer {
            writer.flush().await;
        }
    }

    /// Resolve a room: memory first, then the store. Store failures are
    /// logged and read as "not found".
    pub async fn load_room_from_store(&self, code: &str) -> Option<Room> {
        if let Some(room) = self.rooms.read().await.get_room(code) {
            return Some(room.clone());
        }
        let store = self.store.as_ref()?;
        let record = match store.load_room(code).await {
            Ok(record) => record?,
            Err(e) => {
                tracing::warn!(room = code, error = %e, "Room lookup in store failed");
                return None;
            },
        };
        self.rooms.write().await.restore_room(record)
    }

    /// The room this host should be looking at: one it already hosts, the
    /// owner's latest live or stored room, or a new one.
    pub async fn create_or_get_room(
        &self,
        host_id: &str,
        host_name: &str,
        owner: Option<&str>,
    ) -> HostedRoom {
        {
            let mut mgr = self.rooms.write().await;
            if let Some(room) = mgr.find_existing_room(host_id, owner) {
                return hosted(&mut mgr, room);
            }
        }

        let stored = match (owner, self.store.as_ref()) {
            (Some(owner), Some(store)) => {
                match store.latest_active_room_for_owner(owner, Utc::now()).await {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!(owner, error = %e, "Owner room lookup failed");
                        None
                    },
                }
            },
            _ => None,
        };

        let mut mgr = self.rooms.write().await;
        if let Some(record) = stored {
            mgr.restore_room(record);
        }
        // Re-check: another request may have created or restored a room
        // for this owner while the store was being read.
        if let Some(room) = mgr.find_existing_room(host_id, owner) {
            return hosted(&mut mgr, room);
        }
        let room = mgr.create_room(host_id, host_name, owner);
        hosted(&mut mgr, room)
    }

    /// Join `code`, restoring the room from the store if needed. Issues the
    /// player's reconnection token.
    pub async fn join_room(
        &self,
        code: &str,
        conn: &str,
        mut request: JoinRequest,
    ) -> Result<PlayerSession, RoomError> {
        let code = normalize_room_code(code);
        if self.load_room_from_store(&code).await.is_none() {
            return Err(RoomError::RoomNotFound);
        }
        if request.avatar.is_none() {
            request.stored_avatar = self.stored_avatar(&request.name).await;
        }

        let (outcome, token) = {
            let mut mgr = self.rooms.write().await;
            let outcome = mgr.join_room(&code, conn, request)?;
            let token = mgr
                .issue_player_token(&code, conn, &outcome.player.name)
                .ok_or(RoomError::RoomNotFound)?;
            (outcome, token)
        };

        let session_score = if outcome.reconnected {
            self.reinstate_score(&code, conn, &outcome.player.name).await
        } else {
            self.restore_session_score(&code, &outcome.player.name).await
        };
        Ok(PlayerSession {
            room: outcome.room,
            player: outcome.player,
            token,
            reconnected: outcome.reconnected,
            session_score,
        })
    }

    /// Reattach a player by token after their connection was lost.
    pub async fn reconnect_player(
        &self,
        code: &str,
        token: &str,
        conn: &str,
        language: Option<String>,
    ) -> Result<PlayerSession, RoomError> {
        let code = normalize_room_code(code);
        if self.load_room_from_store(&code).await.is_none() {
            return Err(RoomError::RoomNotFound);
        }
        let (room, player) = {
            let mut mgr = self.rooms.write().await;
            let player = mgr
                .replace_player_socket_with_token(&code, token, conn, language)
                .ok_or(RoomError::TokenInvalid)?;
            let room = mgr.get_room(&code).cloned().ok_or(RoomError::RoomNotFound)?;
            (room, player)
        };
        let session_score = self.reinstate_score(&code, conn, &player.name).await;
        Ok(PlayerSession {
            room,
            player,
            token: token.to_string(),
            reconnected: true,
            session_score,
        })
    }

    /// Reattach a host by token: live rooms first, then the store.
    pub async fn reconnect_host(&self, token: &str, conn: &str) -> Result<Room, RoomError> {
        if let Some(room) = self.rooms.write().await.reconnect_host_local(token, conn) {
            return Ok(room);
        }
        let store = self.store.as_ref().ok_or(RoomError::TokenInvalid)?;
        let record = match store.find_room_by_host_token(token).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(RoomError::TokenInvalid),
            Err(e) => {
                tracing::warn!(error = %e, "Host token lookup in store failed");
                return Err(RoomError::TokenInvalid);
            },
        };

        let mut mgr = self.rooms.write().await;
        mgr.restore_room(record);
        // The live token decides: a room that stayed in memory may have had
        // its token regenerated in the meantime.
        mgr.reconnect_host_local(token, conn)
            .ok_or(RoomError::TokenInvalid)
    }

    /// Cumulative score for `player_name`: memory, else the store (cached
    /// back into memory), else 0.
    pub async fn restore_session_score(&self, code: &str, player_name: &str) -> i64 {
        if let Some(total) = self.rooms.read().await.session_score(code, player_name) {
            return total;
        }
        let Some(ref store) = self.store else {
            return 0;
        };
        match store.load_session_score(code, player_name).await {
            Ok(Some(total)) => self
                .rooms
                .write()
                .await
                .cache_session_score(code, player_name, total),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(
                    room = code,
                    player = player_name,
                    error = %e,
                    "Session score lookup failed"
                );
                0
            },
        }
    }

    /// Restore the session score of a returning player and hand it to the
    /// live engine, if any.
    async fn reinstate_score(&self, code: &str, conn: &str, player_name: &str) -> i64 {
        let total = self.restore_session_score(code, player_name).await;
        if total > 0 {
            let mut mgr = self.rooms.write().await;
            if mgr.game_instance(code).is_some() {
                mgr.sync_coarse_state(code);
                mgr.restore_player_score_in_game(code, conn, total);
            }
        }
        total
    }

    async fn stored_avatar(&self, player_name: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.load_profile_avatar(player_name).await {
            Ok(avatar) => avatar,
            Err(e) => {
                tracing::warn!(player = player_name, error = %e, "Profile lookup failed");
                None
            },
        }
    }

    /// Start a game, loading stored content unless `content` is given.
    pub async fn start_game(
        &self,
        code: &str,
        game_type: GameType,
        content: Option<Vec<serde_json::Value>>,
    ) -> Result<EngineSnapshot, RoomError> {
        {
            let mgr = self.rooms.read().await;
            if !mgr.room_exists(code) {
                return Err(RoomError::RoomNotFound);
            }
            if !mgr.registry().has(game_type) {
                return Err(RoomError::EngineConstructionFailed(game_type));
            }
        }
        let content = match content {
            Some(content) => content,
            None => self.load_content(code, game_type).await,
        };

        let mut mgr = self.rooms.write().await;
        let started = mgr.start_game(code, game_type, content)?;
        let pump = spawn_state_pump(
            Arc::clone(&self.rooms),
            code.to_string(),
            started.instance_id,
            started.warmup,
        );
        mgr.set_resync(code, started.instance_id, pump);
        Ok(started.snapshot)
    }

    /// The room's custom content set for `game_type`, else the default pool.
    /// Anything going wrong yields no content and the engine's built-ins.
    async fn load_content(&self, code: &str, game_type: GameType) -> Vec<serde_json::Value> {
        let Some(ref store) = self.store else {
            return Vec::new();
        };
        let set_id = match store.load_game_settings(code, game_type).await {
            Ok(settings) => settings.and_then(|s| s.content_set_id),
            Err(e) => {
                tracing::warn!(
                    room = code,
                    game = %game_type,
                    error = %e,
                    "Game settings lookup failed"
                );
                None
            },
        };
        let rows = match set_id {
            Some(ref set_id) => store.load_content_set(game_type, set_id).await,
            None => {
                store
                    .load_default_content(game_type, self.default_content_limit)
                    .await
            },
        };
        match rows {
            Ok(rows) => {
                tracing::debug!(
                    room = code,
                    game = %game_type,
                    rows = rows.len(),
                    "Loaded game content"
                );
                rows
            },
            Err(e) => {
                tracing::warn!(room = code, game = %game_type, error = %e, "Content lookup failed");
                Vec::new()
            },
        }
    }

    // ----------------------------------------------------------------
    // Administrative operations
    // ----------------------------------------------------------------

    /// Load the stored record of `code` and check that `account` owns it.
    /// Queued writes are flushed first so the record is current.
    async fn owned_record(
        &self,
        code: &str,
        account: &str,
    ) -> Result<(SharedStore, RoomRecord), RoomError> {
        let store = self.store.clone().ok_or(RoomError::StoreUnavailable)?;
        self.flush_writes().await;
        let record = store
            .load_room(code)
            .await
            .map_err(|e| {
                tracing::warn!(room = code, error = %e, "Admin room lookup failed");
                RoomError::StoreUnavailable
            })?
            .ok_or(RoomError::RoomNotFound)?;
        if record.owner_account_id.as_deref() != Some(account) {
            tracing::warn!(room = code, account, "Admin operation by non-owner rejected");
            return Err(RoomError::Unauthorized);
        }
        Ok((store, record))
    }

    /// Replace the room's host token. The previous token stops resolving.
    pub async fn regenerate_host_token(
        &self,
        code: &str,
        account: &str,
    ) -> Result<String, RoomError> {
        let code = normalize_room_code(code);
        let (store, _) = self.owned_record(&code, account).await?;
        let token = issue_token();
        {
            let mut mgr = self.rooms.write().await;
            if mgr.room_exists(&code) {
                mgr.install_host_token(&code, token.clone());
            }
        }
        self.flush_writes().await;
        match store.set_host_token(&code, &token).await {
            Ok(true) => {
                tracing::info!(room = %code, "Host token regenerated");
                Ok(token)
            },
            Ok(false) => Err(RoomError::RoomNotFound),
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "Storing host token failed");
                Err(RoomError::StoreUnavailable)
            },
        }
    }

    /// Mark the stored room active again with a fresh full TTL.
    pub async fn reactivate_room(
        &self,
        code: &str,
        account: &str,
    ) -> Result<DateTime<Utc>, RoomError> {
        let code = normalize_room_code(code);
        let (store, _) = self.owned_record(&code, account).await?;
        let expires_at = Utc::now() + self.active_ttl;
        self.rooms.write().await.clear_tombstone(&code);
        self.flush_writes().await;
        match store.set_room_active(&code, true, Some(expires_at)).await {
            Ok(true) => {
                tracing::info!(room = %code, "Room reactivated");
                Ok(expires_at)
            },
            Ok(false) => Err(RoomError::RoomNotFound),
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "Reactivating room failed");
                Err(RoomError::StoreUnavailable)
            },
        }
    }

    /// Mark the stored room inactive and close the live room, if any.
    pub async fn deactivate_room(&self, code: &str, account: &str) -> Result<(), RoomError> {
        let code = normalize_room_code(code);
        let (store, _) = self.owned_record(&code, account).await?;
        self.rooms.write().await.close_room(&code, "deactivated");
        self.flush_writes().await;
        match store.set_room_active(&code, false, None).await {
            Ok(true) => {
                tracing::info!(room = %code, "Room deactivated");
                Ok(())
            },
            Ok(false) => Err(RoomError::RoomNotFound),
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "Deactivating room failed");
                Err(RoomError::StoreUnavailable)
            },
        }
    }
}

fn hosted(mgr: &mut crate::room_manager::RoomManager, room: Room) -> HostedRoom {
    let host_token = match mgr.host_token(&room.code) {
        Some(token) => token.to_string(),
        None => {
            let token = mgr.issue_host_token(&room.code);
            mgr.persist_room(&room.code);
            token
        },
    };
    HostedRoom { room, host_token }
}
