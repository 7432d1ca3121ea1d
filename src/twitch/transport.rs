use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// A token pair returned from the identity provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Vec<String>,
}

/// Result of validating an access token against the identity provider.
#[derive(Debug, Clone)]
pub struct Validation {
    pub user_id: String,
    pub login: String,
    pub scopes: Vec<String>,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

/// Network operations against the identity provider's token endpoints.
///
/// `TwitchAuth` is the production implementation; the refresh coordinator only
/// sees this trait, so tests can substitute a fake.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Check whether an access token is still accepted, and how long it has left.
    ///
    /// An authentication rejection surfaces as `BotError::TokenInvalid`; every
    /// other failure (network, rate limit, unexpected schema) as
    /// `BotError::TransportUnavailable`.
    async fn validate(&self, access_token: &str) -> Result<Validation, BotError>;

    /// Exchange a refresh token for a new token pair.
    ///
    /// Providers may omit refresh-token rotation; callers keep the prior
    /// refresh token when `refresh_token` comes back `None`.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, BotError>;

    /// Exchange an authorization code from the login callback for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, BotError>;
}
