use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::auth::AuthConfig;
use crate::config::ServerConfig;
use crate::game_session::ServerGameRegistry;
use crate::room_manager::{RoomManager, RoomPolicy};
use crate::service::RoomService;
use crate::store::{SharedStore, StoreWriter};

pub type SharedRoomManager = Arc<RwLock<RoomManager>>;

#[derive(Clone)]
pub struct AppState {
    pub rooms: SharedRoomManager,
    pub service: RoomService,
    pub auth: AuthConfig,
    pub game_registry: Arc<ServerGameRegistry>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    /// "sqlite", "memory" or "none", for the status endpoints.
    pub store_backend: &'static str,
}

impl AppState {
    /// Build the state. Must be called inside a tokio runtime when a store is
    /// given, since the store writer task is spawned here.
    pub fn new(
        config: ServerConfig,
        store: Option<SharedStore>,
        store_backend: &'static str,
    ) -> Self {
        Self::with_registry(config, store, store_backend, ServerGameRegistry::new())
    }

    pub fn with_registry(
        config: ServerConfig,
        store: Option<SharedStore>,
        store_backend: &'static str,
        registry: ServerGameRegistry,
    ) -> Self {
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let game_registry = Arc::new(registry);
        let writer = store.as_ref().map(|s| StoreWriter::spawn(Arc::clone(s)));
        let policy = RoomPolicy::from_config(&config);
        let rooms: SharedRoomManager = Arc::new(RwLock::new(RoomManager::new(
            Arc::clone(&game_registry),
            policy,
            writer.clone(),
        )));
        let service = RoomService::new(
            Arc::clone(&rooms),
            store,
            writer,
            config.rooms.default_content_limit,
            policy.active_ttl,
        );
        Self {
            rooms,
            service,
            auth,
            game_registry,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            store_backend,
        }
    }
}

/// Counts a live WebSocket connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
