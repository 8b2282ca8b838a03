use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use partyline_server::config::ServerConfig;
use partyline_server::sweeper::spawn_expiry_sweeper;

#[tokio::main]
async fn main() {
    let json_logs = std::env::var("PARTYLINE_LOG_JSON").is_ok_and(|v| v == "1");
    let subscriber = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Partyline server starting");

    let config = ServerConfig::load();
    config.validate();

    let (store, store_backend) = partyline_server::open_store(&config.store).await;
    let listen_addr = config.listen_addr.clone();
    let sweep_every = Duration::from_secs(config.rooms.sweep_interval_secs);
    let (app, state) = partyline_server::build_app(config, store, store_backend);
    let _sweeper = spawn_expiry_sweeper(Arc::clone(&state.rooms), sweep_every);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, store = store_backend, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }
    tracing::info!("Partyline server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
