pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod game_session;
pub mod health;
pub mod host;
pub mod leaderboard;
pub mod players;
pub mod room_manager;
pub mod service;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::{ServerConfig, StoreConfig};
use state::AppState;
use store::{SharedStore, SqliteStore};

/// Build the Axum router and application state from a config.
///
/// Must be called inside a tokio runtime when a store is given.
pub fn build_app(
    config: ServerConfig,
    store: Option<SharedStore>,
    store_backend: &'static str,
) -> (Router<()>, AppState) {
    let state = AppState::new(config, store, store_backend);
    (build_router(state.clone()), state)
}

/// Router over an already-built state.
pub fn build_router(state: AppState) -> Router<()> {
    // API routes (behind bearer auth middleware)
    let api_routes = Router::new()
        .route("/rooms/{code}/host-token", post(api::regenerate_host_token))
        .route("/rooms/{code}/reactivate", post(api::reactivate_room))
        .route("/rooms/{code}/deactivate", post(api::deactivate_room))
        .route("/rooms/{code}/leaderboard", get(api::get_leaderboard))
        .route("/status", get(api::get_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Open the configured store. Without a URL, or when the database cannot be
/// opened, the server runs memory-only.
pub async fn open_store(config: &StoreConfig) -> (Option<SharedStore>, &'static str) {
    let Some(ref url) = config.database_url else {
        tracing::info!("No database configured, running memory-only");
        return (None, "none");
    };
    match SqliteStore::connect(url).await {
        Ok(store) => {
            tracing::info!("Connected to SQLite store");
            (Some(Arc::new(store) as SharedStore), "sqlite")
        },
        Err(e) => {
            tracing::warn!(error = %e, "Could not open store, running memory-only");
            (None, "none")
        },
    }
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request.headers().clone(), request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_store_is_memory_only() {
        let (store, backend) = open_store(&StoreConfig::default()).await;
        assert!(store.is_none());
        assert_eq!(backend, "none");
    }

    #[tokio::test]
    async fn unreachable_store_falls_back() {
        let config = StoreConfig {
            database_url: Some("sqlite:///nonexistent-dir/partyline.db".into()),
        };
        let (store, backend) = open_store(&config).await;
        assert!(store.is_none());
        assert_eq!(backend, "none");
    }

    #[tokio::test]
    async fn in_memory_sqlite_opens() {
        let config = StoreConfig {
            database_url: Some("sqlite::memory:".into()),
        };
        let (store, backend) = open_store(&config).await;
        assert!(store.is_some());
        assert_eq!(backend, "sqlite");
    }
}
