//! Background token refresh coordinator.
//!
//! Periodically validates every stored user's access token against Twitch,
//! refreshes pairs that are stale or rejected, persists the new pair, and
//! tallies each sweep's outcome. The dashboard shares the same entry points
//! for manual triggers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::BotError;
use crate::store::{UserRecord, UserStore};
use crate::twitch::TokenTransport;

pub const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 30;

/// Per-user outcome of one check-and-refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub valid: bool,
    pub refreshed: bool,
}

/// Tally of one full sweep over the user table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub valid: usize,
    pub refreshed: usize,
    pub errored: usize,
}

/// Read-only snapshot of the coordinator's scheduling state.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub running: bool,
    pub interval_minutes: u64,
    pub refresh_threshold_hours: u64,
}

struct Scheduler {
    running: bool,
    interval: Duration,
    timer: Option<JoinHandle<()>>,
}

/// Owns the sweep timer and the per-user check-and-refresh policy.
///
/// Constructed once at startup and shared via `Arc`; the dashboard handlers
/// and the shutdown hook hold clones of the same instance.
pub struct TokenRefreshCoordinator {
    transport: Arc<dyn TokenTransport>,
    store: Arc<dyn UserStore>,
    refresh_threshold: Duration,
    scheduler: Mutex<Scheduler>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        transport: Arc<dyn TokenTransport>,
        store: Arc<dyn UserStore>,
        refresh_threshold: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            refresh_threshold,
            scheduler: Mutex::new(Scheduler {
                running: false,
                interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_MINUTES * 60),
                timer: None,
            }),
        }
    }

    /// Start the sweep timer. The first sweep fires immediately, then one
    /// every `interval_minutes`. Calling `start` while already running is a
    /// logged no-op.
    pub fn start(self: Arc<Self>, interval_minutes: u64) {
        let interval_minutes = interval_minutes.max(1);

        let mut scheduler = self.scheduler.lock();
        if scheduler.running {
            warn!("Token refresh coordinator is already running");
            return;
        }

        scheduler.interval = Duration::from_secs(interval_minutes * 60);
        scheduler.running = true;

        let coordinator = Arc::clone(&self);
        let interval = scheduler.interval;
        scheduler.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                // Sweeps run detached so a slow sweep neither delays the
                // timer nor dies with it on stop().
                let sweep = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    if let Err(e) = sweep.check_all_tokens().await {
                        error!("Token sweep failed: {e}");
                    }
                });
            }
        }));

        info!("Token refresh coordinator started (interval: {interval_minutes}m)");
    }

    /// Cancel the sweep timer. Sweeps already in flight run to completion;
    /// only future wake-ups are dropped. Calling `stop` while stopped is a
    /// logged no-op.
    pub fn stop(&self) {
        let mut scheduler = self.scheduler.lock();
        if !scheduler.running {
            warn!("Token refresh coordinator is not running");
            return;
        }

        if let Some(timer) = scheduler.timer.take() {
            timer.abort();
        }
        scheduler.running = false;

        info!("Token refresh coordinator stopped");
    }

    pub fn status(&self) -> CoordinatorStatus {
        let scheduler = self.scheduler.lock();
        CoordinatorStatus {
            running: scheduler.running,
            interval_minutes: scheduler.interval.as_secs() / 60,
            refresh_threshold_hours: self.refresh_threshold.as_secs() / 3600,
        }
    }

    /// Check every stored user's token pair, refreshing where needed.
    ///
    /// Per-user failures are counted and logged but never abort the sweep;
    /// only a failure to list the users escapes.
    pub async fn check_all_tokens(&self) -> Result<SweepSummary, BotError> {
        let users = self.store.list_all().await?;

        if users.is_empty() {
            info!("No users stored, nothing to check");
            return Ok(SweepSummary::default());
        }

        info!("Checking tokens of {} user(s)", users.len());

        let mut summary = SweepSummary::default();
        for user in &users {
            match self.check_and_refresh(user).await {
                Ok(outcome) if outcome.refreshed => summary.refreshed += 1,
                Ok(_) => summary.valid += 1,
                Err(e) => {
                    summary.errored += 1;
                    error!("Token check failed for {}: {e}", user.username);
                }
            }
        }

        info!(
            valid = summary.valid,
            refreshed = summary.refreshed,
            errored = summary.errored,
            "Token sweep complete"
        );

        Ok(summary)
    }

    /// Validate one user's access token and refresh the pair when it is
    /// stale (expiring within the threshold) or rejected outright.
    pub async fn check_and_refresh(&self, user: &UserRecord) -> Result<RefreshOutcome, BotError> {
        match self.transport.validate(&user.access_token).await {
            Ok(validation) => {
                if Duration::from_secs(validation.expires_in) < self.refresh_threshold {
                    let hours_left = validation.expires_in as f64 / 3600.0;
                    info!(
                        "Token for {} expires soon ({hours_left:.2}h), refreshing",
                        user.username
                    );
                    self.refresh_user(user).await?;
                    return Ok(RefreshOutcome {
                        valid: false,
                        refreshed: true,
                    });
                }

                Ok(RefreshOutcome {
                    valid: true,
                    refreshed: false,
                })
            }
            Err(BotError::TokenInvalid(_)) => {
                warn!("Token for {} was rejected, attempting refresh", user.username);
                // A failed refresh surfaces as the refresh's own error, not
                // as the validation failure that led here.
                self.refresh_user(user).await?;
                Ok(RefreshOutcome {
                    valid: false,
                    refreshed: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_user(&self, user: &UserRecord) -> Result<(), BotError> {
        let tokens = self.transport.refresh(&user.refresh_token).await?;

        // Providers may omit rotation; keep the old refresh token then.
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .unwrap_or(&user.refresh_token);

        if let Err(e) = self
            .store
            .update_tokens(&user.twitch_id, &tokens.access_token, refresh_token)
            .await
        {
            // Twitch has already rotated the pair at this point; the store
            // keeps the superseded one until a later sweep succeeds.
            error!(
                "Failed to persist refreshed tokens for {} — stored pair is now out of date: {e}",
                user.username
            );
            return Err(e);
        }

        info!("Token refreshed for {}", user.username);
        Ok(())
    }

    /// Check and, if needed, refresh a single user's token pair.
    ///
    /// Shares the sweep's decision path. May overlap a sweep that reaches the
    /// same user, in which case both sides exchange the same refresh token;
    /// Twitch rotates refresh tokens on use, so the loser's exchange fails
    /// and the next sweep heals the pair.
    pub async fn refresh_token_for_user(
        &self,
        twitch_id: &str,
    ) -> Result<RefreshOutcome, BotError> {
        let user = self
            .store
            .find_by_twitch_id(twitch_id)
            .await?
            .ok_or_else(|| BotError::UserNotFound(twitch_id.to_string()))?;

        self.check_and_refresh(&user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UserUpsert;
    use crate::twitch::{TokenSet, Validation};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    const THRESHOLD: Duration = Duration::from_secs(3600);

    /// Transport fake: validation outcomes keyed by access token, refresh
    /// outcomes keyed by refresh token. Unknown access tokens are rejected
    /// as invalid, unknown refresh tokens as revoked grants.
    #[derive(Default)]
    struct FakeTransport {
        validations: HashMap<String, u64>,
        refreshes: HashMap<String, TokenSet>,
        down: bool,
        validate_calls: Mutex<Vec<String>>,
        refresh_calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn valid(mut self, access_token: &str, expires_in: u64) -> Self {
            self.validations.insert(access_token.to_string(), expires_in);
            self
        }

        fn refreshable(mut self, refresh_token: &str, new_access: &str, new_refresh: Option<&str>) -> Self {
            self.refreshes.insert(
                refresh_token.to_string(),
                TokenSet {
                    access_token: new_access.to_string(),
                    refresh_token: new_refresh.map(str::to_string),
                    expires_in: Some(14400),
                    scope: vec![],
                },
            );
            self
        }

        fn down(mut self) -> Self {
            self.down = true;
            self
        }
    }

    #[async_trait]
    impl TokenTransport for FakeTransport {
        async fn validate(&self, access_token: &str) -> Result<Validation, BotError> {
            self.validate_calls.lock().push(access_token.to_string());
            if self.down {
                return Err(BotError::TransportUnavailable("connection refused".into()));
            }
            match self.validations.get(access_token) {
                Some(expires_in) => Ok(Validation {
                    user_id: "0".into(),
                    login: "someone".into(),
                    scopes: vec![],
                    expires_in: *expires_in,
                }),
                None => Err(BotError::TokenInvalid("token expired".into())),
            }
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, BotError> {
            self.refresh_calls.lock().push(refresh_token.to_string());
            if self.down {
                return Err(BotError::TransportUnavailable("connection refused".into()));
            }
            match self.refreshes.get(refresh_token) {
                Some(tokens) => Ok(tokens.clone()),
                None => Err(BotError::RefreshRejected("grant revoked".into())),
            }
        }

        async fn exchange_code(&self, _code: &str) -> Result<TokenSet, BotError> {
            Err(BotError::ExchangeFailed("not exercised here".into()))
        }
    }

    /// Store fake: in-memory user list preserving insertion order.
    #[derive(Default)]
    struct FakeStore {
        users: Mutex<Vec<UserRecord>>,
        fail_updates: bool,
        list_calls: Mutex<usize>,
        update_calls: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeStore {
        fn with_users(users: Vec<UserRecord>) -> Self {
            Self {
                users: Mutex::new(users),
                ..Self::default()
            }
        }

        fn failing_updates(mut self) -> Self {
            self.fail_updates = true;
            self
        }
    }

    #[async_trait]
    impl UserStore for FakeStore {
        async fn upsert(&self, user: &UserUpsert) -> Result<UserRecord, BotError> {
            let record = UserRecord {
                twitch_id: user.twitch_id.clone(),
                username: user.username.clone(),
                display_name: user.display_name.clone(),
                access_token: user.access_token.clone(),
                refresh_token: user.refresh_token.clone(),
                scopes: user.scopes.clone(),
                last_login: Utc::now(),
            };
            let mut users = self.users.lock();
            users.retain(|u| u.twitch_id != user.twitch_id);
            users.push(record.clone());
            Ok(record)
        }

        async fn find_by_twitch_id(&self, twitch_id: &str) -> Result<Option<UserRecord>, BotError> {
            Ok(self
                .users
                .lock()
                .iter()
                .find(|u| u.twitch_id == twitch_id)
                .cloned())
        }

        async fn list_all(&self) -> Result<Vec<UserRecord>, BotError> {
            *self.list_calls.lock() += 1;
            Ok(self.users.lock().clone())
        }

        async fn update_tokens(
            &self,
            twitch_id: &str,
            access_token: &str,
            refresh_token: &str,
        ) -> Result<UserRecord, BotError> {
            self.update_calls.lock().push((
                twitch_id.to_string(),
                access_token.to_string(),
                refresh_token.to_string(),
            ));
            if self.fail_updates {
                return Err(BotError::Database("write failed".into()));
            }
            let mut users = self.users.lock();
            let user = users
                .iter_mut()
                .find(|u| u.twitch_id == twitch_id)
                .ok_or_else(|| BotError::UserNotFound(twitch_id.to_string()))?;
            user.access_token = access_token.to_string();
            user.refresh_token = refresh_token.to_string();
            Ok(user.clone())
        }

        async fn count(&self) -> Result<i64, BotError> {
            Ok(self.users.lock().len() as i64)
        }

        async fn delete(&self, twitch_id: &str) -> Result<bool, BotError> {
            let mut users = self.users.lock();
            let before = users.len();
            users.retain(|u| u.twitch_id != twitch_id);
            Ok(users.len() < before)
        }
    }

    fn user(twitch_id: &str, access: &str, refresh: &str) -> UserRecord {
        UserRecord {
            twitch_id: twitch_id.to_string(),
            username: format!("user{twitch_id}"),
            display_name: String::new(),
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            scopes: vec!["chat:read".into()],
            last_login: Utc::now(),
        }
    }

    fn coordinator(
        transport: FakeTransport,
        store: FakeStore,
    ) -> (Arc<TokenRefreshCoordinator>, Arc<FakeTransport>, Arc<FakeStore>) {
        let transport = Arc::new(transport);
        let store = Arc::new(store);
        let coordinator = Arc::new(TokenRefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            THRESHOLD,
        ));
        (coordinator, transport, store)
    }

    #[tokio::test]
    async fn healthy_token_is_left_alone() {
        let (coordinator, transport, store) = coordinator(
            FakeTransport::default().valid("A1", 7200),
            FakeStore::with_users(vec![user("7", "A1", "R1")]),
        );

        let outcome = coordinator
            .check_and_refresh(&user("7", "A1", "R1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome {
                valid: true,
                refreshed: false
            }
        );
        assert!(transport.refresh_calls.lock().is_empty());
        assert!(store.update_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_persisted() {
        let (coordinator, transport, store) = coordinator(
            FakeTransport::default()
                .valid("A1", 120)
                .refreshable("R1", "A2", Some("R2")),
            FakeStore::with_users(vec![user("42", "A1", "R1")]),
        );

        let outcome = coordinator
            .check_and_refresh(&user("42", "A1", "R1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome {
                valid: false,
                refreshed: true
            }
        );
        assert_eq!(*transport.refresh_calls.lock(), vec!["R1".to_string()]);

        let stored = store.find_by_twitch_id("42").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "A2");
        assert_eq!(stored.refresh_token, "R2");
    }

    #[tokio::test]
    async fn old_refresh_token_survives_when_provider_omits_rotation() {
        let (coordinator, _, store) = coordinator(
            FakeTransport::default()
                .valid("A1", 120)
                .refreshable("R1", "A2", None),
            FakeStore::with_users(vec![user("42", "A1", "R1")]),
        );

        coordinator
            .check_and_refresh(&user("42", "A1", "R1"))
            .await
            .unwrap();

        let stored = store.find_by_twitch_id("42").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "A2");
        assert_eq!(stored.refresh_token, "R1");
    }

    #[tokio::test]
    async fn rejected_token_triggers_refresh() {
        let (coordinator, transport, _) = coordinator(
            FakeTransport::default().refreshable("R1", "A2", Some("R2")),
            FakeStore::with_users(vec![user("9", "A1", "R1")]),
        );

        let outcome = coordinator
            .check_and_refresh(&user("9", "A1", "R1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome {
                valid: false,
                refreshed: true
            }
        );
        assert_eq!(transport.refresh_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_its_own_error() {
        // Validation rejects AND the refresh grant is gone: the caller must
        // see the refresh failure, not the earlier validation one.
        let (coordinator, _, _) = coordinator(
            FakeTransport::default(),
            FakeStore::with_users(vec![user("9", "A1", "R1")]),
        );

        let err = coordinator
            .check_and_refresh(&user("9", "A1", "R1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::RefreshRejected(_)));
    }

    #[tokio::test]
    async fn transport_outage_propagates_without_refresh_attempt() {
        let (coordinator, transport, _) = coordinator(
            FakeTransport::default().down(),
            FakeStore::with_users(vec![user("9", "A1", "R1")]),
        );

        let err = coordinator
            .check_and_refresh(&user("9", "A1", "R1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BotError::TransportUnavailable(_)));
        assert!(transport.refresh_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn sweep_over_empty_store_is_all_zeros() {
        let (coordinator, transport, _) =
            coordinator(FakeTransport::default(), FakeStore::default());

        let summary = coordinator.check_all_tokens().await.unwrap();

        assert_eq!(summary, SweepSummary::default());
        assert!(transport.validate_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn sweep_tallies_mixed_outcomes() {
        // Three healthy users, two rejected-but-refreshable, one whose
        // refresh grant is revoked.
        let users = vec![
            user("1", "A1", "R1"),
            user("2", "A2", "R2"),
            user("3", "A3", "R3"),
            user("4", "A4", "R4"),
            user("5", "A5", "R5"),
            user("6", "A6", "R6"),
        ];
        let (coordinator, _, store) = coordinator(
            FakeTransport::default()
                .valid("A1", 7200)
                .valid("A2", 7200)
                .valid("A3", 7200)
                .refreshable("R4", "A4b", Some("R4b"))
                .refreshable("R5", "A5b", Some("R5b")),
            FakeStore::with_users(users),
        );

        let summary = coordinator.check_all_tokens().await.unwrap();

        assert_eq!(summary.valid, 3);
        assert_eq!(summary.refreshed, 2);
        assert_eq!(summary.errored, 1);

        // The one errored user's pair stays untouched.
        let stored = store.find_by_twitch_id("6").await.unwrap().unwrap();
        assert_eq!(stored.access_token, "A6");
        assert_eq!(stored.refresh_token, "R6");
    }

    #[tokio::test]
    async fn sweep_counts_persistence_failure_as_errored() {
        let (coordinator, _, store) = coordinator(
            FakeTransport::default()
                .valid("A1", 120)
                .refreshable("R1", "A2", Some("R2")),
            FakeStore::with_users(vec![user("42", "A1", "R1")]).failing_updates(),
        );

        let summary = coordinator.check_all_tokens().await.unwrap();

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.refreshed, 0);
        assert_eq!(store.update_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn manual_refresh_for_unknown_user_touches_nothing() {
        let (coordinator, transport, _) = coordinator(
            FakeTransport::default().valid("A1", 7200),
            FakeStore::with_users(vec![user("7", "A1", "R1")]),
        );

        let err = coordinator.refresh_token_for_user("999").await.unwrap_err();

        assert!(matches!(err, BotError::UserNotFound(_)));
        assert!(transport.validate_calls.lock().is_empty());
        assert!(transport.refresh_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn manual_refresh_shares_the_sweep_policy() {
        let (coordinator, _, _) = coordinator(
            FakeTransport::default().valid("A1", 7200),
            FakeStore::with_users(vec![user("7", "A1", "R1")]),
        );

        let outcome = coordinator.refresh_token_for_user("7").await.unwrap();

        assert_eq!(
            outcome,
            RefreshOutcome {
                valid: true,
                refreshed: false
            }
        );
    }

    #[tokio::test]
    async fn start_is_idempotent_and_keeps_the_first_interval() {
        let (coordinator, _, _) = coordinator(FakeTransport::default(), FakeStore::default());

        coordinator.clone().start(30);
        coordinator.clone().start(5); // no-op, already running

        let status = coordinator.status();
        assert!(status.running);
        assert_eq!(status.interval_minutes, 30);

        coordinator.stop();
        assert!(!coordinator.status().running);
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_quiet_noop() {
        let (coordinator, _, _) = coordinator(FakeTransport::default(), FakeStore::default());

        coordinator.stop();
        coordinator.stop();

        assert!(!coordinator.status().running);
    }

    #[tokio::test]
    async fn start_fires_an_immediate_sweep() {
        let (coordinator, _, store) = coordinator(FakeTransport::default(), FakeStore::default());

        coordinator.clone().start(60);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*store.list_calls.lock(), 1);
        coordinator.stop();
    }

    #[tokio::test]
    async fn status_reports_the_threshold_in_hours() {
        let (coordinator, _, _) = coordinator(FakeTransport::default(), FakeStore::default());

        let status = coordinator.status();
        assert!(!status.running);
        assert_eq!(status.refresh_threshold_hours, 1);
        assert_eq!(status.interval_minutes, DEFAULT_SWEEP_INTERVAL_MINUTES);
    }
}
