//! Dashboard route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction. Pages are
//! deliberately small inline HTML; this layer is thin glue over the store,
//! the Twitch transport, and the refresh coordinator.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use crate::twitch::TokenTransport;
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::store::UserUpsert;
use crate::web::session::{self, Session, SESSION_COOKIE};
use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Pages ────────────────────────────────────────────────────────
        .route("/", get(index))
        .route("/dashboard", get(dashboard))
        .route("/tokens", get(tokens_page))
        // ── OAuth Login ──────────────────────────────────────────────────
        .route("/auth/login", get(auth_login))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", get(auth_logout))
        // ── Token Actions ────────────────────────────────────────────────
        .route("/tokens/check-all", post(tokens_check_all))
        .route("/tokens/refresh-mine", post(tokens_refresh_mine))
        .route("/tokens/start", post(tokens_start))
        .route("/tokens/stop", post(tokens_stop))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "streamkeeper",
        "version": env!("CARGO_PKG_VERSION"),
        "refresh": state.coordinator.status(),
    }))
}

// =============================================================================
// Pages
// =============================================================================

async fn index(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if state.sessions.from_headers(&headers).is_some() {
        return Redirect::to("/dashboard").into_response();
    }

    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>streamkeeper</title></head>
<body>
  <h1>streamkeeper</h1>
  <p>Chat bot dashboard. Log in with your Twitch account to manage your tokens.</p>
  <a href="/auth/login">Log in with Twitch</a>
</body>
</html>"#,
    )
    .into_response()
}

async fn dashboard(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let Some(session) = state.sessions.from_headers(&headers) else {
        warn!("Unauthenticated dashboard access, redirecting to login");
        return Redirect::to("/").into_response();
    };

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Dashboard</title></head>
<body>
  <h1>Hi, {display_name}!</h1>
  <p>Logged in as {username} (Twitch id {twitch_id}).</p>
  <ul>
    <li><a href="/tokens">Token management</a></li>
    <li><a href="/auth/logout">Log out</a></li>
  </ul>
</body>
</html>"#,
        display_name = session.display_name,
        username = session.username,
        twitch_id = session.twitch_id,
    ))
    .into_response()
}

async fn tokens_page(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, BotError> {
    let Some(_session) = state.sessions.from_headers(&headers) else {
        return Ok(Redirect::to("/").into_response());
    };

    let refresh = state.coordinator.status();
    let user_count = state.store.count().await?;

    let lifecycle_form = if refresh.running {
        r#"<form method="POST" action="/tokens/stop"><button type="submit">Stop refresh service</button></form>"#
    } else {
        r#"<form method="POST" action="/tokens/start"><button type="submit">Start refresh service</button></form>"#
    };

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>Token Management</title></head>
<body>
  <p><a href="/dashboard">&larr; Back to dashboard</a></p>
  <h1>Token Management</h1>
  <h2>Service status</h2>
  <ul>
    <li>Status: {running}</li>
    <li>Sweep interval: {interval} min</li>
    <li>Refresh threshold: {threshold}h</li>
    <li>Stored users: {user_count}</li>
  </ul>
  <h2>Actions</h2>
  <form method="POST" action="/tokens/check-all"><button type="submit">Check all tokens now</button></form>
  <form method="POST" action="/tokens/refresh-mine"><button type="submit">Refresh my token now</button></form>
  {lifecycle_form}
</body>
</html>"#,
        running = if refresh.running { "active" } else { "stopped" },
        interval = refresh.interval_minutes,
        threshold = refresh.refresh_threshold_hours,
    ))
    .into_response())
}

// =============================================================================
// OAuth Login
// =============================================================================

async fn auth_login(State(state): State<SharedState>) -> Result<Redirect, BotError> {
    // Random nonce, HMAC-signed so the callback can reject forged states.
    let mut nonce_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(nonce_bytes);

    let signed_state = state.crypto.sign_state(&nonce)?;
    Ok(Redirect::to(&state.twitch.authorize_url(&signed_state)))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn auth_callback(
    State(state): State<SharedState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, BotError> {
    if let Some(e) = &query.error {
        let description = query.error_description.as_deref().unwrap_or("");
        warn!("Twitch callback returned an error: {e} {description}");
        return Err(BotError::BadRequest(format!("Authorization failed: {e}")));
    }

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| BotError::BadRequest("Callback is missing the authorization code".into()))?;

    let signed_state = query
        .state
        .as_deref()
        .ok_or(BotError::InvalidState)?;
    state.crypto.verify_state(signed_state)?;

    info!("Exchanging authorization code for tokens");
    let tokens = state.twitch.exchange_code(code).await?;

    let refresh_token = tokens.refresh_token.ok_or_else(|| {
        BotError::ExchangeFailed("Twitch returned no refresh token for the grant".into())
    })?;

    let profile = state.twitch.user_info(&tokens.access_token).await?;

    let stored = state
        .store
        .upsert(&UserUpsert {
            twitch_id: profile.id.clone(),
            username: profile.login.clone(),
            display_name: profile.display_name.clone(),
            access_token: tokens.access_token,
            refresh_token,
            scopes: tokens.scope,
        })
        .await?;

    info!("Login complete for {} ({})", stored.username, stored.twitch_id);

    let session_id = state
        .sessions
        .create(&stored.twitch_id, &stored.username, &stored.display_name);
    let cookie = format!(
        "{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; Max-Age={}",
        state.sessions.ttl().as_secs()
    );

    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/dashboard")).into_response())
}

async fn auth_logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Some(id) = session::cookie_value(&headers) {
        state.sessions.remove(&id);
    }

    let cleared = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    ([(header::SET_COOKIE, cleared)], Redirect::to("/")).into_response()
}

// =============================================================================
// Token Actions
// =============================================================================

fn require_session(state: &SharedState, headers: &HeaderMap) -> Result<Session, BotError> {
    state
        .sessions
        .from_headers(headers)
        .ok_or(BotError::Unauthorized)
}

async fn tokens_check_all(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, BotError> {
    let session = require_session(&state, &headers)?;
    info!("Manual token sweep triggered by {}", session.username);

    // Fire-and-forget; the page reports completion via the next status load.
    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = coordinator.check_all_tokens().await {
            error!("Manually triggered token sweep failed: {e}");
        }
    });

    Ok(Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8"><title>Sweep started</title>
  <meta http-equiv="refresh" content="3;url=/tokens">
</head>
<body>
  <h1>Token sweep started</h1>
  <p>Checking all stored tokens in the background. Redirecting...</p>
</body>
</html>"#,
    )
    .into_response())
}

async fn tokens_refresh_mine(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, BotError> {
    let session = require_session(&state, &headers)?;
    info!("Token refresh requested by {}", session.username);

    let outcome = state
        .coordinator
        .refresh_token_for_user(&session.twitch_id)
        .await?;

    let message = if outcome.refreshed {
        "Your access token was renewed."
    } else {
        "Your access token is still healthy; nothing to do."
    };

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8"><title>Token checked</title>
  <meta http-equiv="refresh" content="3;url=/tokens">
</head>
<body>
  <h1>Token checked</h1>
  <p>{message}</p>
</body>
</html>"#,
    ))
    .into_response())
}

async fn tokens_start(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Redirect, BotError> {
    let session = require_session(&state, &headers)?;

    state
        .coordinator
        .clone()
        .start(state.config.refresh_interval_minutes);
    info!("Refresh service started by {}", session.username);

    Ok(Redirect::to("/tokens"))
}

async fn tokens_stop(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Redirect, BotError> {
    let session = require_session(&state, &headers)?;

    state.coordinator.stop();
    info!("Refresh service stopped by {}", session.username);

    Ok(Redirect::to("/tokens"))
}
