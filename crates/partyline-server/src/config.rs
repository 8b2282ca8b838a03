use std::time::Duration;

use serde::Deserialize;

use partyline_core::game_trait::RoundTiming;

/// Top-level server configuration, loaded from `partyline.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub games: GamesConfig,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            games: GamesConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    /// Token bucket size for the per-connection rate limiter.
    pub ws_rate_limit_burst: f64,
    pub player_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 500,
            ws_rate_limit_per_sec: 20.0,
            ws_rate_limit_burst: 40.0,
            player_message_buffer: 256,
        }
    }
}

/// Longest room TTL accepted, in seconds (one year).
pub const MAX_ROOM_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Lifetime of a room someone is still attached to.
    pub active_ttl_secs: u64,
    /// Lifetime once the host and every player have disconnected.
    pub abandoned_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Cap on default content rows loaded for a game.
    pub default_content_limit: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            active_ttl_secs: 24 * 60 * 60,
            abandoned_ttl_secs: 30 * 60,
            sweep_interval_secs: 60,
            default_content_limit: 50,
        }
    }
}

impl RoomsConfig {
    pub fn active_ttl(&self) -> chrono::Duration {
        ttl(self.active_ttl_secs)
    }

    pub fn abandoned_ttl(&self) -> chrono::Duration {
        ttl(self.abandoned_ttl_secs)
    }
}

fn ttl(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_ROOM_TTL_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs)
}

/// Round timing handed to every engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GamesConfig {
    pub warmup_secs: u64,
    pub round_secs: u64,
    pub between_rounds_secs: u64,
    /// 0 plays one round per content item.
    pub max_rounds: u32,
}

impl Default for GamesConfig {
    fn default() -> Self {
        let timing = RoundTiming::default();
        Self {
            warmup_secs: timing.warmup.as_secs(),
            round_secs: timing.round.as_secs(),
            between_rounds_secs: timing.between_rounds.as_secs(),
            max_rounds: 0,
        }
    }
}

impl GamesConfig {
    pub fn timing(&self) -> RoundTiming {
        RoundTiming {
            warmup: Duration::from_secs(self.warmup_secs),
            round: Duration::from_secs(self.round_secs),
            between_rounds: Duration::from_secs(self.between_rounds_secs),
        }
    }
}

/// Durable store. With no `database_url` the server runs memory-only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// e.g. `sqlite://partyline.db?mode=rwc`
    pub database_url: Option<String>,
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    pub bearer_token: Option<String>,
}

impl ServerConfig {
    /// Validate configuration, exiting on values the server cannot run with.
    pub fn validate(&self) {
        if let Err(problem) = self.check() {
            tracing::error!("{problem}");
            std::process::exit(1);
        }

        // Secrets belong in the environment
        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file, use PARTYLINE_API_TOKEN env var in production"
            );
        }
        if self.rooms.abandoned_ttl_secs > self.rooms.active_ttl_secs {
            tracing::warn!(
                active = self.rooms.active_ttl_secs,
                abandoned = self.rooms.abandoned_ttl_secs,
                "Abandoned-room TTL exceeds the active TTL"
            );
        }
    }

    /// The checks behind [`ServerConfig::validate`], without exiting.
    pub fn check(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr is not a valid socket address: {}",
                self.listen_addr
            ));
        }
        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".into());
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be > 0".into());
        }
        if self.limits.ws_rate_limit_burst < 1.0 {
            return Err("limits.ws_rate_limit_burst must be >= 1".into());
        }
        if self.limits.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".into());
        }
        if self.rooms.active_ttl_secs == 0 || self.rooms.abandoned_ttl_secs == 0 {
            return Err("rooms TTLs must be > 0".into());
        }
        if self.rooms.active_ttl_secs > MAX_ROOM_TTL_SECS
            || self.rooms.abandoned_ttl_secs > MAX_ROOM_TTL_SECS
        {
            return Err(format!("rooms TTLs must be <= {MAX_ROOM_TTL_SECS} seconds"));
        }
        if self.rooms.sweep_interval_secs == 0 {
            return Err("rooms.sweep_interval_secs must be > 0".into());
        }
        if self.games.round_secs == 0 {
            return Err("games.round_secs must be > 0".into());
        }
        Ok(())
    }

    /// Load config from `partyline.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("partyline.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from partyline.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse partyline.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No partyline.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `PARTYLINE_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = var("PARTYLINE_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(token) = var("PARTYLINE_API_TOKEN") {
            self.auth.bearer_token = Some(token);
        }
        if let Some(url) = var("PARTYLINE_DATABASE_URL") {
            self.store.database_url = Some(url);
        }
        if let Some(val) = var("PARTYLINE_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("PARTYLINE_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(val) = var("PARTYLINE_ROOM_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.active_ttl_secs = n;
        }
        if let Some(val) = var("PARTYLINE_ABANDONED_TTL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.abandoned_ttl_secs = n;
        }
        if let Some(val) = var("PARTYLINE_SWEEP_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.rooms.sweep_interval_secs = n;
        }
    }
}
