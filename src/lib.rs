pub mod bot;
pub mod config;
pub mod crypto;
pub mod error;
pub mod service;
pub mod store;
pub mod twitch;
pub mod web;

pub use config::Config;
pub use error::BotError;

use std::sync::Arc;

/// Shared application state passed to all dashboard handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn store::UserStore>,
    pub twitch: Arc<twitch::TwitchAuth>,
    pub crypto: Arc<crypto::CryptoEngine>,
    pub coordinator: Arc<service::TokenRefreshCoordinator>,
    pub sessions: web::session::SessionManager,
}

pub type SharedState = Arc<AppState>;
