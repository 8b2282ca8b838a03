use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use partyline_core::game_registry::GameType;
use partyline_core::player::name_key;

use super::{GameSettingsRecord, RoomRecord, RoomStore, StoreError};

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, RoomRecord>,
    profiles: HashMap<String, String>,
    session_scores: HashMap<(String, String), i64>,
    game_settings: HashMap<(String, GameType), Option<String>>,
    content: Vec<(GameType, Option<String>, serde_json::Value)>,
    room_read_delay: Option<Duration>,
}

/// In-process [`RoomStore`] with a failure switch, used by tests and by
/// deployments that want restart-free persistence semantics without SQLite.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold `load_room` results for `delay` after reading them.
    pub fn set_room_read_delay(&self, delay: Option<Duration>) {
        self.lock().room_read_delay = delay;
    }

    /// Current record for `code`, bypassing the failure switch.
    pub fn room(&self, code: &str) -> Option<RoomRecord> {
        self.lock().rooms.get(code).cloned()
    }

    pub fn insert_room(&self, record: RoomRecord) {
        self.lock().rooms.insert(record.code.clone(), record);
    }

    pub fn set_game_settings(&self, room_code: &str, game_type: GameType, set_id: Option<&str>) {
        self.lock().game_settings.insert(
            (room_code.to_string(), game_type),
            set_id.map(str::to_string),
        );
    }

    pub fn add_content(
        &self,
        game_type: GameType,
        set_id: Option<&str>,
        payload: serde_json::Value,
    ) {
        self.lock()
            .content
            .push((game_type, set_id.map(str::to_string), payload));
    }

    pub fn session_score(&self, room_code: &str, player_name: &str) -> Option<i64> {
        self.lock()
            .session_scores
            .get(&(room_code.to_string(), name_key(player_name)))
            .copied()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn upsert_room(&self, record: &RoomRecord) -> Result<(), StoreError> {
        self.check()?;
        self.insert_room(record.clone());
        Ok(())
    }

    async fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StoreError> {
        self.check()?;
        let (record, delay) = {
            let inner = self.lock();
            (inner.rooms.get(code).cloned(), inner.room_read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(record)
    }

    async fn touch_room(
        &self,
        code: &str,
        expires_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        connected_players: u32,
    ) -> Result<(), StoreError> {
        self.check()?;
        if let Some(room) = self.lock().rooms.get_mut(code) {
            room.expires_at = expires_at;
            room.last_accessed = last_accessed;
            room.connected_players = connected_players;
        }
        Ok(())
    }

    async fn set_room_active(
        &self,
        code: &str,
        active: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get_mut(code) else {
            return Ok(false);
        };
        room.active = active;
        if let Some(expires_at) = expires_at {
            room.expires_at = expires_at;
        }
        Ok(true)
    }

    async fn set_host_token(&self, code: &str, token: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.lock();
        let Some(room) = inner.rooms.get_mut(code) else {
            return Ok(false);
        };
        room.host_token = Some(token.to_string());
        Ok(true)
    }

    async fn find_room_by_host_token(
        &self,
        token: &str,
    ) -> Result<Option<RoomRecord>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .rooms
            .values()
            .find(|r| r.host_token.as_deref() == Some(token))
            .cloned())
    }

    async fn latest_active_room_for_owner(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RoomRecord>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .rooms
            .values()
            .filter(|r| r.owner_account_id.as_deref() == Some(owner) && r.is_restorable_at(now))
            .max_by_key(|r| r.last_accessed)
            .cloned())
    }

    async fn load_profile_avatar(&self, player_name: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.lock().profiles.get(&name_key(player_name)).cloned())
    }

    async fn upsert_profile_avatar(
        &self,
        player_name: &str,
        avatar: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .profiles
            .insert(name_key(player_name), avatar.to_string());
        Ok(())
    }

    async fn load_session_score(
        &self,
        room_code: &str,
        player_name: &str,
    ) -> Result<Option<i64>, StoreError> {
        self.check()?;
        Ok(self.session_score(room_code, player_name))
    }

    async fn upsert_session_score(
        &self,
        room_code: &str,
        player_name: &str,
        total: i64,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .session_scores
            .insert((room_code.to_string(), name_key(player_name)), total);
        Ok(())
    }

    async fn clear_session_scores(&self, room_code: &str) -> Result<(), StoreError> {
        self.check()?;
        self.lock()
            .session_scores
            .retain(|(code, _), _| code != room_code);
        Ok(())
    }

    async fn load_game_settings(
        &self,
        room_code: &str,
        game_type: GameType,
    ) -> Result<Option<GameSettingsRecord>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .game_settings
            .get(&(room_code.to_string(), game_type))
            .map(|set_id| GameSettingsRecord {
                room_code: room_code.to_string(),
                game_type,
                content_set_id: set_id.clone(),
            }))
    }

    async fn load_content_set(
        &self,
        game_type: GameType,
        content_set_id: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .content
            .iter()
            .filter(|(g, set, _)| *g == game_type && set.as_deref() == Some(content_set_id))
            .map(|(_, _, payload)| payload.clone())
            .collect())
    }

    async fn load_default_content(
        &self,
        game_type: GameType,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        self.check()?;
        Ok(self
            .lock()
            .content
            .iter()
            .filter(|(g, set, _)| *g == game_type && set.is_none())
            .take(limit as usize)
            .map(|(_, _, payload)| payload.clone())
            .collect())
    }
}
