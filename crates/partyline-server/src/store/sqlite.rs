use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use partyline_core::game_registry::GameType;
use partyline_core::player::name_key;
use partyline_core::room::RoomSettings;

use super::{GameSettingsRecord, RoomRecord, RoomStore, StoreError};

/// SQLite-backed [`RoomStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and create any missing tables.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// A private in-memory database. One connection, kept open for the
    /// lifetime of the pool so the data survives.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create all tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                code TEXT PRIMARY KEY,
                host_id TEXT NOT NULL,
                owner_account_id TEXT,
                host_token TEXT,
                host_name TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                settings TEXT NOT NULL DEFAULT '{}',
                current_game TEXT,
                expires_at INTEGER NOT NULL,
                last_accessed INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                connected_players INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS rooms_owner_idx
             ON rooms (owner_account_id, active, last_accessed)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS player_profiles (
                name TEXT PRIMARY KEY,
                avatar TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_scores (
                room_code TEXT NOT NULL,
                player_name TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (room_code, player_name)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS game_settings (
                room_code TEXT NOT NULL,
                game_type TEXT NOT NULL,
                content_set_id TEXT,
                PRIMARY KEY (room_code, game_type)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS content_items (
                id INTEGER PRIMARY KEY,
                game_type TEXT NOT NULL,
                content_set_id TEXT,
                payload TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_game_settings(
        &self,
        room_code: &str,
        game_type: GameType,
        content_set_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO game_settings (room_code, game_type, content_set_id)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(room_code, game_type) DO UPDATE SET content_set_id = ?3",
        )
        .bind(room_code)
        .bind(game_type.as_str())
        .bind(content_set_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_content(
        &self,
        game_type: GameType,
        content_set_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO content_items (game_type, content_set_id, payload) VALUES (?1, ?2, ?3)",
        )
        .bind(game_type.as_str())
        .bind(content_set_id)
        .bind(serde_json::to_string(payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Treat a missing table as an empty result.
fn or_empty<T: Default>(result: Result<T, sqlx::Error>) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) => {
            let e = StoreError::from(e);
            if e.is_missing_table() {
                tracing::debug!(error = %e, "Store table missing, treating as empty");
                Ok(T::default())
            } else {
                Err(e)
            }
        },
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn room_from_row(row: &SqliteRow) -> Result<RoomRecord, sqlx::Error> {
    let settings: String = row.try_get("settings")?;
    let current_game: Option<String> = row.try_get("current_game")?;
    let connected: i64 = row.try_get("connected_players")?;
    Ok(RoomRecord {
        code: row.try_get("code")?,
        host_id: row.try_get("host_id")?,
        host_name: row.try_get("host_name")?,
        owner_account_id: row.try_get("owner_account_id")?,
        host_token: row.try_get("host_token")?,
        settings: RoomSettings::from_json(&settings),
        current_game: current_game.as_deref().and_then(GameType::from_str_opt),
        created_at: from_millis(row.try_get("created_at")?),
        expires_at: from_millis(row.try_get("expires_at")?),
        last_accessed: from_millis(row.try_get("last_accessed")?),
        connected_players: u32::try_from(connected).unwrap_or(0),
        active: row.try_get("active")?,
    })
}

const ROOM_COLUMNS: &str = "code, host_id, owner_account_id, host_token, host_name, settings, \
     current_game, expires_at, last_accessed, created_at, connected_players, active";

fn payloads(rows: Vec<SqliteRow>) -> Vec<serde_json::Value> {
    rows.iter()
        .filter_map(|row| {
            let raw: String = row.try_get("payload").ok()?;
            match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed content row");
                    None
                },
            }
        })
        .collect()
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn upsert_room(&self, record: &RoomRecord) -> Result<(), StoreError> {
        let settings = serde_json::to_string(&record.settings)?;
        let result = sqlx::query(
            "INSERT INTO rooms (code, host_id, owner_account_id, host_token, host_name, name,
                description, settings, current_game, expires_at, last_accessed, created_at,
                connected_players, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(code) DO UPDATE SET
                host_id = ?2, owner_account_id = ?3, host_token = ?4, host_name = ?5,
                name = ?6, description = ?7, settings = ?8, current_game = ?9,
                expires_at = ?10, last_accessed = ?11, connected_players = ?13, active = ?14",
        )
        .bind(&record.code)
        .bind(&record.host_id)
        .bind(&record.owner_account_id)
        .bind(&record.host_token)
        .bind(&record.host_name)
        .bind(&record.settings.name)
        .bind(&record.settings.description)
        .bind(settings)
        .bind(record.current_game.map(|g| g.as_str()))
        .bind(millis(record.expires_at))
        .bind(millis(record.last_accessed))
        .bind(millis(record.created_at))
        .bind(i64::from(record.connected_players))
        .bind(record.active)
        .execute(&self.pool)
        .await
        .map(drop);
        or_empty(result)
    }

    async fn load_room(&self, code: &str) -> Result<Option<RoomRecord>, StoreError> {
        let row = or_empty(
            sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE code = ?1"))
                .bind(code)
                .fetch_optional(&self.pool)
                .await,
        )?;
        Ok(row.as_ref().map(room_from_row).transpose()?)
    }

    async fn touch_room(
        &self,
        code: &str,
        expires_at: DateTime<Utc>,
        last_accessed: DateTime<Utc>,
        connected_players: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE rooms SET expires_at = ?2, last_accessed = ?3, connected_players = ?4
             WHERE code = ?1",
        )
        .bind(code)
        .bind(millis(expires_at))
        .bind(millis(last_accessed))
        .bind(i64::from(connected_players))
        .execute(&self.pool)
        .await
        .map(drop);
        or_empty(result)
    }

    async fn set_room_active(
        &self,
        code: &str,
        active: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE rooms SET active = ?2, expires_at = COALESCE(?3, expires_at) WHERE code = ?1",
        )
        .bind(code)
        .bind(active)
        .bind(expires_at.map(millis))
        .execute(&self.pool)
        .await
        .map(|done| done.rows_affected() > 0);
        or_empty(result)
    }

    async fn set_host_token(&self, code: &str, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE rooms SET host_token = ?2 WHERE code = ?1")
            .bind(code)
            .bind(token)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected() > 0);
        or_empty(result)
    }

    async fn find_room_by_host_token(
        &self,
        token: &str,
    ) -> Result<Option<RoomRecord>, StoreError> {
        let row = or_empty(
            sqlx::query(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms WHERE host_token = ?1 LIMIT 1"
            ))
            .bind(token)
            .fetch_optional(&self.pool)
            .await,
        )?;
        Ok(row.as_ref().map(room_from_row).transpose()?)
    }

    async fn latest_active_room_for_owner(
        &self,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RoomRecord>, StoreError> {
        let row = or_empty(
            sqlx::query(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms
                 WHERE owner_account_id = ?1 AND active = 1 AND expires_at > ?2
                 ORDER BY last_accessed DESC LIMIT 1"
            ))
            .bind(owner)
            .bind(millis(now))
            .fetch_optional(&self.pool)
            .await,
        )?;
        Ok(row.as_ref().map(room_from_row).transpose()?)
    }

    async fn load_profile_avatar(&self, player_name: &str) -> Result<Option<String>, StoreError> {
        let row = or_empty(
            sqlx::query("SELECT avatar FROM player_profiles WHERE name = ?1")
                .bind(name_key(player_name))
                .fetch_optional(&self.pool)
                .await,
        )?;
        Ok(row.map(|r| r.try_get::<String, _>("avatar")).transpose()?)
    }

    async fn upsert_profile_avatar(
        &self,
        player_name: &str,
        avatar: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO player_profiles (name, avatar) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET avatar = ?2",
        )
        .bind(name_key(player_name))
        .bind(avatar)
        .execute(&self.pool)
        .await
        .map(drop);
        or_empty(result)
    }

    async fn load_session_score(
        &self,
        room_code: &str,
        player_name: &str,
    ) -> Result<Option<i64>, StoreError> {
        let row = or_empty(
            sqlx::query(
                "SELECT total FROM session_scores WHERE room_code = ?1 AND player_name = ?2",
            )
            .bind(room_code)
            .bind(name_key(player_name))
            .fetch_optional(&self.pool)
            .await,
        )?;
        Ok(row.map(|r| r.try_get::<i64, _>("total")).transpose()?)
    }

    async fn upsert_session_score(
        &self,
        room_code: &str,
        player_name: &str,
        total: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO session_scores (room_code, player_name, total) VALUES (?1, ?2, ?3)
             ON CONFLICT(room_code, player_name) DO UPDATE SET total = ?3",
        )
        .bind(room_code)
        .bind(name_key(player_name))
        .bind(total)
        .execute(&self.pool)
        .await
        .map(drop);
        or_empty(result)
    }

    async fn clear_session_scores(&self, room_code: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM session_scores WHERE room_code = ?1")
            .bind(room_code)
            .execute(&self.pool)
            .await
            .map(drop);
        or_empty(result)
    }

    async fn load_game_settings(
        &self,
        room_code: &str,
        game_type: GameType,
    ) -> Result<Option<GameSettingsRecord>, StoreError> {
        let row = or_empty(
            sqlx::query(
                "SELECT content_set_id FROM game_settings WHERE room_code = ?1 AND game_type = ?2",
            )
            .bind(room_code)
            .bind(game_type.as_str())
            .fetch_optional(&self.pool)
            .await,
        )?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(GameSettingsRecord {
            room_code: room_code.to_string(),
            game_type,
            content_set_id: row.try_get("content_set_id")?,
        }))
    }

    async fn load_content_set(
        &self,
        game_type: GameType,
        content_set_id: &str,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let rows = or_empty(
            sqlx::query(
                "SELECT payload FROM content_items
                 WHERE game_type = ?1 AND content_set_id = ?2 ORDER BY id",
            )
            .bind(game_type.as_str())
            .bind(content_set_id)
            .fetch_all(&self.pool)
            .await,
        )?;
        Ok(payloads(rows))
    }

    async fn load_default_content(
        &self,
        game_type: GameType,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let rows = or_empty(
            sqlx::query(
                "SELECT payload FROM content_items
                 WHERE game_type = ?1 AND content_set_id IS NULL ORDER BY id LIMIT ?2",
            )
            .bind(game_type.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await,
        )?;
        Ok(payloads(rows))
    }
}
