use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use streamkeeper::bot::{self, BotConfig};
use streamkeeper::config::Config;
use streamkeeper::crypto::CryptoEngine;
use streamkeeper::service::TokenRefreshCoordinator;
use streamkeeper::store::PgUserStore;
use streamkeeper::twitch::TwitchAuth;
use streamkeeper::web;
use streamkeeper::web::session::SessionManager;
use streamkeeper::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "streamkeeper=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("streamkeeper v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    // Initialize components
    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);
    let store = Arc::new(PgUserStore::new(&config.database_url, crypto.clone()).await?);
    store.migrate().await?;
    info!("Database connected and migrated ✓");

    let twitch = Arc::new(TwitchAuth::new(
        config.twitch_client_id.clone(),
        config.twitch_client_secret.clone(),
        config.twitch_redirect_uri.clone(),
    )?);

    // Start the token refresh coordinator
    let coordinator = Arc::new(TokenRefreshCoordinator::new(
        twitch.clone(),
        store.clone(),
        Duration::from_secs(config.refresh_threshold_hours * 3600),
    ));
    coordinator.clone().start(config.refresh_interval_minutes);

    // Start the chat client
    tokio::spawn(bot::run(BotConfig {
        username: config.bot_username.clone(),
        access_token: config.bot_access_token.clone(),
        channel: config.bot_channel.clone(),
    }));

    // Build shared state
    let sessions = SessionManager::new(Duration::from_secs(config.session_ttl_hours * 3600));
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        twitch,
        crypto,
        coordinator: coordinator.clone(),
        sessions,
    });

    // Build router
    let app = web::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dashboard ready ✓");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;

    info!("Shut down cleanly");
    Ok(())
}

/// Wait for ctrl-c, then stop the refresh coordinator so no further sweeps
/// are scheduled while connections drain.
async fn shutdown_signal(coordinator: Arc<TokenRefreshCoordinator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }

    info!("Shutdown signal received");
    coordinator.stop();
}
