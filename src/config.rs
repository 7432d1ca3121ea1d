use anyhow::{Context, Result};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,

    // ── Database (PostgreSQL) ───────────────────────────────────────────
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM token encryption.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,

    // ── Twitch OAuth ────────────────────────────────────────────────────
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub twitch_redirect_uri: String,

    // ── Chat Bot ────────────────────────────────────────────────────────
    pub bot_username: String,
    pub bot_access_token: String,
    pub bot_channel: String,

    // ── Token Refresh ───────────────────────────────────────────────────
    /// Minutes between scheduled token sweeps.
    pub refresh_interval_minutes: u64,
    /// Remaining token lifetime (hours) below which a refresh is triggered.
    pub refresh_threshold_hours: u64,

    // ── Dashboard Sessions ──────────────────────────────────────────────
    pub session_ttl_hours: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,
            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,

            twitch_client_id: std::env::var("TWITCH_CLIENT_ID")
                .context("TWITCH_CLIENT_ID is required")?,
            twitch_client_secret: std::env::var("TWITCH_CLIENT_SECRET")
                .context("TWITCH_CLIENT_SECRET is required")?,
            twitch_redirect_uri: std::env::var("TWITCH_REDIRECT_URI")
                .unwrap_or_else(|_| format!("{base_url}/auth/callback")),

            bot_username: std::env::var("BOT_USERNAME").context("BOT_USERNAME is required")?,
            bot_access_token: std::env::var("BOT_ACCESS_TOKEN")
                .context("BOT_ACCESS_TOKEN is required (chat login token)")?,
            bot_channel: std::env::var("BOT_CHANNEL").context("BOT_CHANNEL is required")?,

            refresh_interval_minutes: std::env::var("REFRESH_INTERVAL_MINUTES")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .context("Invalid REFRESH_INTERVAL_MINUTES")?,
            refresh_threshold_hours: std::env::var("REFRESH_THRESHOLD_HOURS")
                .unwrap_or_else(|_| "1".into())
                .parse()
                .context("Invalid REFRESH_THRESHOLD_HOURS")?,

            session_ttl_hours: std::env::var("SESSION_TTL_HOURS")
                .unwrap_or_else(|_| "24".into())
                .parse()
                .context("Invalid SESSION_TTL_HOURS")?,

            base_url,
        })
    }
}
