//! User store — PostgreSQL persistence for Twitch accounts and their tokens.

mod db;

pub use db::PgUserStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BotError;

/// A stored Twitch account with its current token pair (decrypted).
///
/// Both token fields are always populated; no write path persists a partial
/// pair.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub twitch_id: String,
    pub username: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub last_login: DateTime<Utc>,
}

/// Fields written when a user completes the login flow.
#[derive(Debug)]
pub struct UserUpsert {
    pub twitch_id: String,
    pub username: String,
    pub display_name: String,
    pub access_token: String,
    pub refresh_token: String,
    pub scopes: Vec<String>,
}

/// Persistence operations for user records, keyed by Twitch user id.
///
/// `PgUserStore` is the production implementation; the refresh coordinator
/// only sees this trait, so tests can substitute a fake.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user or update an existing one after login.
    async fn upsert(&self, user: &UserUpsert) -> Result<UserRecord, BotError>;

    async fn find_by_twitch_id(&self, twitch_id: &str) -> Result<Option<UserRecord>, BotError>;

    /// Every stored user, in a stable order.
    async fn list_all(&self) -> Result<Vec<UserRecord>, BotError>;

    /// Replace the stored token pair after a successful refresh.
    ///
    /// Fails with `UserNotFound` when no record exists for `twitch_id`.
    async fn update_tokens(
        &self,
        twitch_id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<UserRecord, BotError>;

    async fn count(&self) -> Result<i64, BotError>;

    /// Returns whether a record was actually removed.
    async fn delete(&self, twitch_id: &str) -> Result<bool, BotError>;
}
