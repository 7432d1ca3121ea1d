use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::scopes;
use super::transport::{TokenSet, TokenTransport, Validation};
use crate::error::BotError;

const AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";
const HELIX_USERS_URL: &str = "https://api.twitch.tv/helix/users";

/// Twitch OAuth 2.0 client.
///
/// Token lifetime: ~4 hours. Refresh: supported, and Twitch rotates the
/// refresh token on every exchange, so the returned pair must replace the
/// stored one atomically.
pub struct TwitchAuth {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

// Raw token response from the Twitch token endpoint
#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Vec<String>,
}

// Raw response from the validate endpoint
#[derive(Debug, Deserialize)]
struct ValidateResponse {
    user_id: String,
    login: String,
    #[serde(default)]
    scopes: Vec<String>,
    expires_in: u64,
}

/// Profile data fetched from the Helix users endpoint after login.
#[derive(Debug, Clone, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelixUsersResponse {
    data: Vec<HelixUser>,
}

impl TwitchAuth {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Result<Self, BotError> {
        // Bounded timeout so a hung identity-provider call can stall at most
        // one sweep, never the whole process.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| BotError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            http,
        })
    }

    /// Build the authorization URL the login route redirects to.
    ///
    /// `state` must already be HMAC-signed; the callback verifies it.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{AUTHORIZE_URL}?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}\
             &force_verify=true",
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(&self.redirect_uri),
            scope = urlencoding(&scopes::space_joined()),
            state = urlencoding(state),
        )
    }

    /// Fetch the logged-in user's profile from Helix.
    pub async fn user_info(&self, access_token: &str) -> Result<HelixUser, BotError> {
        let resp = self
            .http
            .get(HELIX_USERS_URL)
            .header("Client-Id", &self.client_id)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| BotError::TransportUnavailable(format!("User info request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::TransportUnavailable(format!(
                "User info fetch failed ({status}): {body}"
            )));
        }

        let users: HelixUsersResponse = resp
            .json()
            .await
            .map_err(|e| BotError::TransportUnavailable(format!("Failed to parse user info: {e}")))?;

        users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| BotError::Internal("Helix returned no user for token".into()))
    }
}

#[async_trait]
impl TokenTransport for TwitchAuth {
    async fn validate(&self, access_token: &str) -> Result<Validation, BotError> {
        let resp = self
            .http
            .get(VALIDATE_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                BotError::TransportUnavailable(format!("Validation request failed: {e}"))
            })?;

        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::TokenInvalid(format!(
                "Validation rejected the token: {body}"
            )));
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::TransportUnavailable(format!(
                "Validation failed ({status}): {body}"
            )));
        }

        let validation: ValidateResponse = resp.json().await.map_err(|e| {
            BotError::TransportUnavailable(format!("Failed to parse validation response: {e}"))
        })?;

        Ok(Validation {
            user_id: validation.user_id,
            login: validation.login,
            scopes: validation.scopes,
            expires_in: validation.expires_in,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, BotError> {
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| BotError::TransportUnavailable(format!("Refresh request failed: {e}")))?;

        let status = resp.status();

        // Twitch answers 400/401 when the refresh grant itself is no longer
        // good (revoked, rotated away, wrong client).
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::RefreshRejected(format!(
                "Twitch refused the refresh grant ({status}): {body}"
            )));
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::TransportUnavailable(format!(
                "Refresh failed ({status}): {body}"
            )));
        }

        let token_resp: TwitchTokenResponse = resp.json().await.map_err(|e| {
            BotError::TransportUnavailable(format!("Failed to parse refresh response: {e}"))
        })?;

        Ok(TokenSet {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            expires_in: token_resp.expires_in,
            scope: token_resp.scope,
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, BotError> {
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BotError::ExchangeFailed(format!("Token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::ExchangeFailed(format!(
                "Twitch token exchange failed ({status}): {body}"
            )));
        }

        let token_resp: TwitchTokenResponse = resp.json().await.map_err(|e| {
            BotError::ExchangeFailed(format!("Failed to parse token response: {e}"))
        })?;

        Ok(TokenSet {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            expires_in: token_resp.expires_in,
            scope: token_resp.scope,
        })
    }
}

/// Simple percent-encoding for URL parameters.
fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth() -> TwitchAuth {
        TwitchAuth::new(
            "client-abc".into(),
            "secret-xyz".into(),
            "http://localhost:3000/auth/callback".into(),
        )
        .unwrap()
    }

    #[test]
    fn authorize_url_carries_required_params() {
        let url = test_auth().authorize_url("signed-state");
        assert!(url.starts_with("https://id.twitch.tv/oauth2/authorize?"));
        assert!(url.contains("client_id=client-abc"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=signed-state"));
        assert!(url.contains("force_verify=true"));
        // Scopes are space-joined, so they must arrive percent-encoded
        assert!(url.contains("chat%3Aread"));
        assert!(!url.contains(' '));
    }

    #[test]
    fn authorize_url_encodes_redirect_uri() {
        let url = test_auth().authorize_url("s");
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback"));
    }

    #[test]
    fn token_response_parses_without_rotation() {
        let json = r#"{"access_token":"A2","expires_in":14400,"scope":["chat:read"],"token_type":"bearer"}"#;
        let parsed: TwitchTokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "A2");
        assert!(parsed.refresh_token.is_none());
        assert_eq!(parsed.expires_in, Some(14400));
    }

    #[test]
    fn validate_response_parses_helix_shape() {
        let json = r#"{"client_id":"c","login":"mecry","scopes":["chat:read","chat:edit"],"user_id":"42","expires_in":5520838}"#;
        let parsed: ValidateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.user_id, "42");
        assert_eq!(parsed.login, "mecry");
        assert_eq!(parsed.scopes.len(), 2);
    }
}
