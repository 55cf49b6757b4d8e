//! # rotur-server
//!
//! Backend of the rotur social platform.
//!
//! This binary provides:
//! - **State store**: every collection loaded into memory at startup and
//!   written back to its JSON file shortly after each change
//! - **REST API** (axum) for accounts, credits, posts, items, keys,
//!   followers, groups, per-user OFSF files and administration
//! - **Subscription engine** that bills recurring keys on a fixed interval
//!
//! On Ctrl+C every dirty collection is flushed before the process exits.

mod api;
mod config;
mod error;
mod key_cache;
mod subscriptions;

use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use rotur_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rotur_server=debug,rotur_store=debug")),
        )
        .init();

    info!("Starting rotur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(paths = ?config.paths, http_addr = %config.http_addr, "Loaded configuration");
    info!(
        admin_enabled = config.admin_token.is_some(),
        premium_key = config.premium_key.is_some(),
        users_watch = config.users_watch,
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Load the store and start its flushers
    // -----------------------------------------------------------------------
    let store = Store::open(&config.paths).await;
    let _background = store.spawn_background(&config.background_options());

    let http_addr = config.http_addr;
    let app_state = AppState::new(store.clone(), config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let _engine = app_state.engine.spawn();

    // Periodic key ownership cache cleanup (every 10 minutes)
    let cache = app_state.key_cache.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            cache.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let served = tokio::select! {
        result = api::serve(app_state, http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    if let Err(e) = store.flush_all().await {
        error!(error = %e, "Final flush failed");
    }

    if let Err(e) = served {
        error!(error = %e, "HTTP server failed");
        return Err(e);
    }
    Ok(())
}
