//! In-memory dashboard sessions.
//!
//! Session ids are 32 random bytes, handed to the browser in an HttpOnly
//! cookie. Entries expire after a TTL and are dropped lazily on access.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use base64::Engine as _;
use parking_lot::RwLock;
use rand::RngCore;

pub const SESSION_COOKIE: &str = "sk_session";

/// Data kept for one logged-in dashboard user.
#[derive(Debug, Clone)]
pub struct Session {
    pub twitch_id: String,
    pub username: String,
    pub display_name: String,
    created_at: Instant,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a session and return the id to set as the cookie value.
    pub fn create(&self, twitch_id: &str, username: &str, display_name: &str) -> String {
        let mut id_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let id = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id_bytes);

        self.sessions.write().insert(
            id.clone(),
            Session {
                twitch_id: twitch_id.to_string(),
                username: username.to_string(),
                display_name: display_name.to_string(),
                created_at: Instant::now(),
            },
        );

        id
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        let expired = {
            let sessions = self.sessions.read();
            let session = sessions.get(id)?;
            if session.created_at.elapsed() <= self.ttl {
                return Some(session.clone());
            }
            true
        };

        if expired {
            self.sessions.write().remove(id);
        }
        None
    }

    pub fn remove(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Resolve the session attached to a request, if any.
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        self.get(&cookie_value(headers)?)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Pull the session cookie's value out of a request's Cookie header.
pub fn cookie_value(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(60))
    }

    #[test]
    fn create_then_get_roundtrip() {
        let sessions = manager();
        let id = sessions.create("42", "mecry", "Mecry");

        let session = sessions.get(&id).unwrap();
        assert_eq!(session.twitch_id, "42");
        assert_eq!(session.username, "mecry");
        assert_eq!(session.display_name, "Mecry");
    }

    #[test]
    fn expired_session_is_dropped() {
        let sessions = SessionManager::new(Duration::ZERO);
        let id = sessions.create("42", "mecry", "Mecry");

        assert!(sessions.get(&id).is_none());
        // Expired entries are also purged from the map
        assert!(sessions.sessions.read().is_empty());
    }

    #[test]
    fn removed_session_is_gone() {
        let sessions = manager();
        let id = sessions.create("42", "mecry", "Mecry");
        sessions.remove(&id);

        assert!(sessions.get(&id).is_none());
    }

    #[test]
    fn cookie_value_survives_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("theme=dark; {SESSION_COOKIE}=abc123; lang=de")
                .parse()
                .unwrap(),
        );

        assert_eq!(cookie_value(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn missing_cookie_yields_none() {
        assert!(cookie_value(&HeaderMap::new()).is_none());
    }
}
