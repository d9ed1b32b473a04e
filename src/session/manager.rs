//! The session façade.
//!
//! [`AuthSessionManager`] owns the authoritative session state. Every
//! transition happens under one mutex and publishes a fresh
//! [`SessionSnapshot`] before the lock is released. Network calls run outside
//! the lock; their results are applied only if the session generation they
//! started under is still current.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activity::ActivityTracker;
use super::monitor::{evaluate, MonitorAction, MonitorTick, SessionMonitor};
use super::policy::{offset, ExpiryPolicy};
use super::refresh::{RefreshCoordinator, RefreshOutcome};
use super::snapshot::{PromptState, SessionSnapshot, SessionStatus, Subscription};
use super::store::{StoredSession, TokenStore};
use super::token::{Credentials, TokenSet, User};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{SessionError, TransportError};
use crate::transport::AuthTransport;
use crate::util::timeout::with_timeout;

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
const PROMPT_TIMEOUT_MESSAGE: &str = "You were signed out after a period of inactivity.";
const LIFETIME_CAP_MESSAGE: &str = "Your session reached its maximum length. Please sign in again.";

/// Credentials for an authenticated request.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredentials {
    pub access_token: String,
    pub csrf_token: Option<String>,
}

impl fmt::Debug for AccessCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredentials")
            .field("access_token", &"<redacted>")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    UserLogout,
    Declined,
    PromptTimeout { generation: u64 },
    LifetimeCap { generation: u64 },
}

impl EndReason {
    fn message(self) -> Option<String> {
        match self {
            Self::UserLogout | Self::Declined => None,
            Self::PromptTimeout { .. } => Some(PROMPT_TIMEOUT_MESSAGE.to_string()),
            Self::LifetimeCap { .. } => Some(LIFETIME_CAP_MESSAGE.to_string()),
        }
    }

    /// Generation a timer-driven end was scheduled under.
    fn scheduled_generation(self) -> Option<u64> {
        match self {
            Self::PromptTimeout { generation } | Self::LifetimeCap { generation } => Some(generation),
            Self::UserLogout | Self::Declined => None,
        }
    }
}

/// A refresh started by the manager, resolved once its outcome is applied.
type PendingRefresh = Shared<BoxFuture<'static, Result<Arc<SessionSnapshot>, SessionError>>>;

struct SessionState {
    status: SessionStatus,
    tokens: Option<TokenSet>,
    user: Option<User>,
    prompt: Option<PromptState>,
    message: Option<String>,
    /// Bumped on login, refresh success, logout and terminal failure.
    generation: u64,
    version: u64,
    activity_persisted_at: Option<DateTime<Utc>>,
    /// Set only while `Refreshing`.
    pending_refresh: Option<PendingRefresh>,
    /// Background work is suspended until the next `start`.
    stopped: bool,
}

struct ArmedPrompt {
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    config: SessionConfig,
    policy: ExpiryPolicy,
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    activity: ActivityTracker,
    refresher: RefreshCoordinator,
    monitor: SessionMonitor,
    prompt_timer: Mutex<Option<ArmedPrompt>>,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<Arc<SessionSnapshot>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(armed) = self
            .prompt_timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            armed.cancel.cancel();
        }
    }
}

/// Coordinates login, refresh, expiry and logout for one session scope.
///
/// Cheap to clone; clones share the same session. Background work (the
/// monitor loop and the prompt timer) holds only a weak reference, so dropping
/// the last handle winds everything down.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use authsession::config::SessionConfig;
/// use authsession::session::{AuthSessionManager, Credentials, MemoryTokenStore};
/// use authsession::transport::HttpTransport;
///
/// # async fn run() -> Result<(), authsession::error::SessionError> {
/// let transport = Arc::new(HttpTransport::new("https://dashboard.example.com")?);
/// let manager = AuthSessionManager::new(
///     SessionConfig::default(),
///     transport,
///     Arc::new(MemoryTokenStore::new()),
/// );
/// manager.start().await;
/// manager.login(Credentials::new("ada", "correct horse")).await?;
/// manager.notify_activity();
/// manager.logout().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AuthSessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for AuthSessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.current_snapshot();
        f.debug_struct("AuthSessionManager")
            .field("status", &snapshot.status)
            .field("version", &snapshot.version)
            .finish()
    }
}

impl AuthSessionManager {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self::with_clock(config, transport, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SessionConfig,
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let refresher = RefreshCoordinator::new(
            transport.clone(),
            config.retry.clone(),
            config.request_timeout,
            clock.clone(),
        );
        let (snapshot_tx, _) = watch::channel(Arc::new(SessionSnapshot::initial()));
        let inner = Inner {
            policy: ExpiryPolicy::from(&config),
            monitor: SessionMonitor::new(config.check_interval),
            config,
            transport,
            store,
            clock,
            activity: ActivityTracker::new(),
            refresher,
            prompt_timer: Mutex::new(None),
            state: Mutex::new(SessionState {
                status: SessionStatus::Initializing,
                tokens: None,
                user: None,
                prompt: None,
                message: None,
                generation: 0,
                version: 0,
                activity_persisted_at: None,
                pending_refresh: None,
                stopped: false,
            }),
            snapshot_tx,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> &ExpiryPolicy {
        &self.inner.policy
    }

    pub fn current_snapshot(&self) -> Arc<SessionSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.current_snapshot().status
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Call `listener` with the current snapshot and then after every change.
    ///
    /// Listeners run on a background task. Rapid transitions may coalesce; a
    /// listener always sees the latest snapshot, never a partial one.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Arc<SessionSnapshot>) + Send + Sync + 'static,
    {
        let mut rx = self.watch();
        let task = tokio::spawn(async move {
            let current = rx.borrow_and_update().clone();
            listener(current);
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                listener(snapshot);
            }
        });
        Subscription::new(task)
    }

    /// Resolve the initial session from storage.
    ///
    /// Stored tokens that are still valid resume the session. Otherwise, when
    /// configured, one refresh is attempted with whatever the transport
    /// carries implicitly. Every other path ends `Unauthenticated`. Calling
    /// `start` again after it resolved resumes background work suspended by
    /// [`stop`](Self::stop) and returns the current snapshot.
    pub async fn start(&self) -> Arc<SessionSnapshot> {
        let generation = {
            let mut state = self.state();
            let resumed = std::mem::take(&mut state.stopped);
            if state.status != SessionStatus::Initializing {
                if resumed {
                    debug!(status = %state.status, "resuming background session work");
                    self.sync_timers(&state);
                }
                drop(state);
                return self.current_snapshot();
            }
            state.generation
        };

        let record = match self.inner.store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "session store unreadable; starting without a stored session");
                None
            }
        };
        if let Some(at) = record.as_ref().and_then(|r| r.last_activity_at) {
            self.inner.activity.record_activity(at);
        }
        let stored_tokens = record.as_ref().and_then(StoredSession::token_set);
        let stored_user = record.and_then(|r| r.user);
        let now = self.inner.clock.now();

        {
            let mut state = self.state();
            if state.generation != generation || state.status != SessionStatus::Initializing {
                return self.current_snapshot();
            }
            let capped = stored_tokens
                .as_ref()
                .is_some_and(|tokens| self.inner.policy.is_past_absolute_cap(tokens, now));
            if capped {
                info!("stored session is past its lifetime cap");
                self.clear_store();
                state.status = SessionStatus::Unauthenticated;
                self.publish(&mut state);
                drop(state);
                return self.current_snapshot();
            }
            if let (Some(tokens), Some(user)) = (&stored_tokens, &stored_user) {
                if !self.inner.policy.is_expired(tokens, now) {
                    debug!(user_id = %user.id, "restored session from storage");
                    self.inner.transport.resume_session(tokens);
                    state.tokens = Some(tokens.clone());
                    state.user = Some(user.clone());
                    state.status = SessionStatus::Authenticated;
                    state.activity_persisted_at = Some(now);
                    self.publish(&mut state);
                    drop(state);
                    return self.current_snapshot();
                }
            }
            if !self.inner.config.restore_via_refresh {
                if stored_tokens.is_some() {
                    self.clear_store();
                }
                state.status = SessionStatus::Unauthenticated;
                self.publish(&mut state);
                drop(state);
                return self.current_snapshot();
            }
            // Keep the stale pair so a refresh preserves the session start.
            if let Some(tokens) = &stored_tokens {
                self.inner.transport.resume_session(tokens);
            }
            state.tokens = stored_tokens;
        }

        debug!("attempting to restore session via refresh");
        let outcome = self.inner.refresher.refresh().await;
        if let Err(e) = self.apply_refresh_outcome(generation, outcome) {
            debug!(error = %e, "session restore did not complete");
        }
        self.current_snapshot()
    }

    /// Stop background work until the next [`start`](Self::start).
    ///
    /// Session state is left as it is. A refresh in flight is cancelled and
    /// the session returns to the status it had before the refresh.
    pub fn stop(&self) {
        self.state().stopped = true;
        self.inner.monitor.stop();
        self.disarm_prompt();
        self.inner.refresher.cancel();
    }

    /// Exchange credentials for a session.
    ///
    /// Only valid while `Unauthenticated`. A failure leaves the state
    /// untouched and is returned to the caller.
    pub async fn login(&self, credentials: Credentials) -> Result<Arc<SessionSnapshot>, SessionError> {
        let generation = {
            let state = self.state();
            if state.status != SessionStatus::Unauthenticated {
                return Err(SessionError::InvalidState(format!(
                    "cannot log in while {}",
                    state.status
                )));
            }
            state.generation
        };

        let transport = &self.inner.transport;
        let credentials = &credentials;
        let request_timeout = self.inner.config.request_timeout;
        let grant = self
            .inner
            .config
            .retry
            .execute(move |_| with_timeout(request_timeout, transport.execute_login(credentials)))
            .await
            .map_err(|e| {
                info!(error = %e, "login failed");
                SessionError::from(e)
            })?;

        let now = self.inner.clock.now();
        let mut state = self.state();
        if state.generation != generation || state.status != SessionStatus::Unauthenticated {
            return Err(SessionError::Superseded);
        }
        self.inner.activity.record_activity(now);
        info!(user_id = %grant.user.id, "login succeeded");
        state.tokens = Some(TokenSet::from_login(grant.tokens, now));
        state.user = Some(grant.user);
        state.prompt = None;
        state.message = None;
        state.status = SessionStatus::Authenticated;
        state.generation += 1;
        self.persist(&mut state, now);
        self.publish(&mut state);
        drop(state);
        Ok(self.current_snapshot())
    }

    /// End the session. Local state is cleared before the server-side revoke
    /// is attempted, and stays cleared whatever the revoke does. Idempotent.
    pub async fn logout(&self) {
        // A user logout is never rejected.
        let _ = self.end_session(EndReason::UserLogout).await;
    }

    /// Keep working after the expiry prompt: records activity and refreshes.
    ///
    /// This is the only way out of `AwaitingUserDecision` that keeps the
    /// session.
    pub async fn continue_session(&self) -> Result<Arc<SessionSnapshot>, SessionError> {
        let pending = {
            let mut state = self.state();
            if state.status != SessionStatus::AwaitingUserDecision {
                return Err(SessionError::InvalidState(format!(
                    "no expiry prompt is pending (status {})",
                    state.status
                )));
            }
            self.inner.activity.record_activity(self.inner.clock.now());
            self.begin_refresh(&mut state)
        };
        pending.await
    }

    /// Log out from the expiry prompt.
    pub async fn decline_session(&self) -> Result<(), SessionError> {
        self.end_session(EndReason::Declined).await
    }

    /// Record a meaningful user action. Never blocks on I/O other than an
    /// occasional local store write.
    pub fn notify_activity(&self) {
        let now = self.inner.clock.now();
        if !self.inner.activity.record_activity(now) {
            return;
        }
        let mut state = self.state();
        if state.tokens.is_none() || !state.status.has_session() {
            return;
        }
        let due = state
            .activity_persisted_at
            .map_or(true, |at| now >= offset(at, self.inner.config.activity_persist_interval));
        if due {
            self.persist(&mut state, now);
        }
    }

    /// Refresh the tokens now, joining a refresh already in progress.
    ///
    /// Valid while `Authenticated` or `Refreshing`. A joined refresh resolves
    /// only after its outcome has been applied, so callers never observe the
    /// tokens it replaced. While the expiry prompt is up only
    /// [`continue_session`](Self::continue_session) may refresh. A terminal
    /// failure ends the session and is returned as
    /// [`SessionError::TerminalAuthFailure`].
    pub async fn refresh_session(&self) -> Result<Arc<SessionSnapshot>, SessionError> {
        let pending = {
            let mut state = self.state();
            match state.status {
                SessionStatus::Authenticated => self.begin_refresh(&mut state),
                SessionStatus::Refreshing => match state.pending_refresh.clone() {
                    Some(pending) => {
                        debug!(generation = state.generation, "joining session refresh in progress");
                        pending
                    }
                    None => {
                        return Err(SessionError::InvalidState(
                            "refresh in progress cannot be joined".into(),
                        ))
                    }
                },
                other => {
                    return Err(SessionError::InvalidState(format!(
                        "cannot refresh while {other}"
                    )))
                }
            }
        };
        pending.await
    }

    /// Current credentials for an authenticated request.
    pub fn access_credentials(&self) -> Option<AccessCredentials> {
        let state = self.state();
        if !state.status.has_session() {
            return None;
        }
        state.tokens.as_ref().map(|tokens| AccessCredentials {
            access_token: tokens.access_token.clone(),
            csrf_token: tokens.csrf_token.clone(),
        })
    }

    /// Run `request` with the current credentials.
    ///
    /// If it fails with [`TransportError::Unauthorized`], the session is
    /// refreshed (sharing any refresh already in flight) and the request is
    /// retried once with the new credentials. While the expiry prompt is up
    /// the refresh is refused with [`SessionError::InvalidState`].
    pub async fn authenticated<F, Fut, T>(&self, mut request: F) -> Result<T, SessionError>
    where
        F: FnMut(AccessCredentials) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let credentials = self
            .access_credentials()
            .ok_or_else(|| SessionError::InvalidState("not authenticated".into()))?;
        let used_token = credentials.access_token.clone();
        match request(credentials).await {
            Err(TransportError::Unauthorized(reason)) => {
                debug!("request unauthorized; refreshing before retry");
                let stale = self
                    .access_credentials()
                    .map_or(true, |current| current.access_token == used_token);
                if stale {
                    self.refresh_session().await?;
                }
                let retry = self
                    .access_credentials()
                    .ok_or(SessionError::TerminalAuthFailure(reason))?;
                request(retry).await.map_err(SessionError::from)
            }
            other => other.map_err(SessionError::from),
        }
    }

    /// Attempts made by the refresh in flight; zero when idle.
    pub fn refresh_attempts(&self) -> u32 {
        self.inner.refresher.attempt_count()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.is_running()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Move to `Refreshing` and start the refresh that will resolve it.
    ///
    /// The returned future settles after the outcome has been applied; every
    /// caller arriving before then joins it instead of starting another.
    fn begin_refresh(&self, state: &mut SessionState) -> PendingRefresh {
        state.status = SessionStatus::Refreshing;
        state.prompt = None;
        self.publish(state);

        let generation = state.generation;
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let outcome = manager.inner.refresher.refresh().await;
            manager.apply_refresh_outcome(generation, outcome)
        });
        let pending = async move { task.await.unwrap_or(Err(SessionError::Superseded)) }
            .boxed()
            .shared();
        state.pending_refresh = Some(pending.clone());
        pending
    }

    /// Publish the state as a new snapshot and align the timers with it.
    /// Must be called with the state lock held.
    fn publish(&self, state: &mut SessionState) {
        if state.status != SessionStatus::Refreshing {
            state.pending_refresh = None;
        }
        state.version += 1;
        let snapshot = Arc::new(SessionSnapshot {
            user: state.user.clone(),
            status: state.status,
            session_expiry_prompt: state.prompt,
            message: state.message.clone(),
            version: state.version,
        });
        debug!(
            status = %state.status,
            generation = state.generation,
            version = state.version,
            "session transition"
        );
        self.inner.snapshot_tx.send_replace(snapshot);
        self.sync_timers(state);
    }

    fn sync_timers(&self, state: &SessionState) {
        if state.status == SessionStatus::Authenticated && !state.stopped {
            self.start_monitor();
        } else {
            self.inner.monitor.stop();
        }
        match (state.status, state.prompt) {
            (SessionStatus::AwaitingUserDecision, Some(prompt)) if !state.stopped => {
                self.arm_prompt(state.generation, prompt.auto_logout_at)
            }
            _ => self.disarm_prompt(),
        }
    }

    fn persist(&self, state: &mut SessionState, now: DateTime<Utc>) {
        let Some(tokens) = &state.tokens else {
            return;
        };
        let record = StoredSession::new(
            tokens,
            self.inner.activity.last_activity_at(),
            state.user.as_ref(),
        );
        if let Err(e) = self.inner.store.save(&record) {
            warn!(error = %e, "failed to persist session; continuing in memory");
        }
        state.activity_persisted_at = Some(now);
    }

    fn clear_store(&self) {
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "failed to clear stored session");
        }
    }

    fn apply_refresh_outcome(
        &self,
        generation: u64,
        outcome: RefreshOutcome,
    ) -> Result<Arc<SessionSnapshot>, SessionError> {
        let mut state = self.state();
        if state.generation != generation {
            // Another caller already applied this outcome, or the session ended.
            return match outcome {
                RefreshOutcome::Refreshed(_) if state.status.has_session() => {
                    drop(state);
                    Ok(self.current_snapshot())
                }
                RefreshOutcome::Rejected(reason) => Err(SessionError::TerminalAuthFailure(reason)),
                RefreshOutcome::Exhausted { last_error, .. } => {
                    Err(SessionError::TerminalAuthFailure(last_error))
                }
                _ => Err(SessionError::Superseded),
            };
        }

        let restoring = state.status == SessionStatus::Initializing;
        match outcome {
            RefreshOutcome::Refreshed(grant) => {
                let now = self.inner.clock.now();
                let tokens = match &state.tokens {
                    Some(previous) => previous.refreshed(grant.tokens, now),
                    None => TokenSet::from_login(grant.tokens, now),
                };
                if self.inner.policy.is_past_absolute_cap(&tokens, now) {
                    info!("refreshed session is past its lifetime cap");
                    let message = (!restoring).then(|| LIFETIME_CAP_MESSAGE.to_string());
                    self.terminate(&mut state, message);
                    return Err(SessionError::TerminalAuthFailure(LIFETIME_CAP_MESSAGE.into()));
                }
                debug!(user_id = %grant.user.id, "session refreshed");
                state.tokens = Some(tokens);
                state.user = Some(grant.user);
                state.prompt = None;
                state.message = None;
                state.status = SessionStatus::Authenticated;
                state.generation += 1;
                self.persist(&mut state, now);
                self.publish(&mut state);
                drop(state);
                Ok(self.current_snapshot())
            }
            RefreshOutcome::Cancelled => {
                // Nothing was learned about the tokens; undo the transition.
                if restoring {
                    state.tokens = None;
                    state.status = SessionStatus::Unauthenticated;
                } else {
                    state.status = SessionStatus::Authenticated;
                }
                debug!(status = %state.status, "session refresh cancelled");
                self.publish(&mut state);
                Err(SessionError::Superseded)
            }
            RefreshOutcome::Rejected(reason)
            | RefreshOutcome::Exhausted {
                last_error: reason, ..
            } => {
                info!(reason = %reason, "session refresh failed terminally");
                let message = (!restoring).then(|| SESSION_EXPIRED_MESSAGE.to_string());
                self.terminate(&mut state, message);
                Err(SessionError::TerminalAuthFailure(reason))
            }
        }
    }

    /// Drop straight to `Unauthenticated`; the server already refused the
    /// session, so there is nothing to revoke.
    fn terminate(&self, state: &mut SessionState, message: Option<String>) {
        state.tokens = None;
        state.user = None;
        state.prompt = None;
        state.message = message;
        state.status = SessionStatus::Unauthenticated;
        state.generation += 1;
        self.clear_store();
        self.publish(state);
    }

    async fn end_session(&self, reason: EndReason) -> Result<(), SessionError> {
        let mut rx = self.watch();
        let generation = {
            let mut state = self.state();
            if let Some(scheduled) = reason.scheduled_generation() {
                if scheduled != state.generation {
                    return Ok(());
                }
            }
            match (state.status, reason) {
                (SessionStatus::Unauthenticated, EndReason::Declined) => {
                    return Err(SessionError::InvalidState(
                        "no expiry prompt is pending (status unauthenticated)".into(),
                    ));
                }
                (SessionStatus::Unauthenticated, _) => return Ok(()),
                (SessionStatus::LoggingOut, _) => None,
                (status, EndReason::Declined | EndReason::PromptTimeout { .. })
                    if status != SessionStatus::AwaitingUserDecision =>
                {
                    return match reason {
                        EndReason::Declined => Err(SessionError::InvalidState(format!(
                            "no expiry prompt is pending (status {status})"
                        ))),
                        _ => Ok(()),
                    };
                }
                _ => {
                    info!(reason = ?reason, "ending session");
                    state.status = SessionStatus::LoggingOut;
                    state.tokens = None;
                    state.user = None;
                    state.prompt = None;
                    state.message = reason.message();
                    state.generation += 1;
                    self.inner.refresher.cancel();
                    self.clear_store();
                    self.publish(&mut state);
                    Some(state.generation)
                }
            }
        };

        let Some(generation) = generation else {
            // Another logout is already revoking; finish when it does.
            let _ = rx
                .wait_for(|snapshot| snapshot.status != SessionStatus::LoggingOut)
                .await;
            return Ok(());
        };

        let revoke = with_timeout(
            self.inner.config.request_timeout,
            self.inner.transport.execute_logout(),
        )
        .await;
        if let Err(e) = revoke {
            warn!(error = %e, "server-side logout failed; local session already cleared");
        }

        let mut state = self.state();
        if state.generation == generation && state.status == SessionStatus::LoggingOut {
            state.status = SessionStatus::Unauthenticated;
            self.publish(&mut state);
        }
        Ok(())
    }

    fn start_monitor(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.monitor.start(move || {
            let manager = Self::from_weak(&weak);
            async move {
                match manager {
                    Some(manager) => manager.monitor_tick().await,
                    None => MonitorTick::Stop,
                }
            }
        });
    }

    async fn monitor_tick(&self) -> MonitorTick {
        let (tokens, generation) = {
            let state = self.state();
            match (&state.tokens, state.status) {
                (Some(tokens), SessionStatus::Authenticated) => (tokens.clone(), state.generation),
                _ => return MonitorTick::Stop,
            }
        };
        let now = self.inner.clock.now();
        let last_activity = self
            .inner
            .activity
            .last_activity_at()
            .unwrap_or(tokens.session_started_at);

        match evaluate(&self.inner.policy, &tokens, last_activity, now) {
            MonitorAction::None => {
                let next = self.inner.policy.next_check_deadline(&tokens, last_activity, now);
                MonitorTick::Continue((next - now).to_std().unwrap_or(Duration::ZERO))
            }
            MonitorAction::Refresh => {
                debug!(generation, "proactive refresh due");
                if let Err(e) = self.refresh_session().await {
                    debug!(error = %e, "proactive refresh did not complete");
                }
                MonitorTick::Continue(self.inner.monitor.interval())
            }
            MonitorAction::PromptUser => {
                self.show_prompt(generation, now);
                MonitorTick::Stop
            }
            MonitorAction::ForceLogout => {
                let _ = self
                    .end_session(EndReason::LifetimeCap { generation })
                    .await;
                MonitorTick::Stop
            }
        }
    }

    fn show_prompt(&self, generation: u64, now: DateTime<Utc>) {
        let mut state = self.state();
        if state.generation != generation || state.status != SessionStatus::Authenticated {
            return;
        }
        let Some(tokens) = &state.tokens else {
            return;
        };
        let cap = self.inner.policy.absolute_deadline(tokens.session_started_at);
        let auto_logout_at = offset(now, self.inner.config.prompt_timeout).min(cap);
        info!(%auto_logout_at, "session idle; awaiting user decision");
        state.prompt = Some(PromptState {
            shown_at: now,
            auto_logout_at,
        });
        state.status = SessionStatus::AwaitingUserDecision;
        self.publish(&mut state);
    }

    fn arm_prompt(&self, generation: u64, auto_logout_at: DateTime<Utc>) {
        let mut slot = self
            .inner
            .prompt_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|armed| armed.generation == generation && !armed.cancel.is_cancelled())
        {
            return;
        }
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let delay = (auto_logout_at - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(manager) = Self::from_weak(&weak) {
                        debug!(generation, "expiry prompt timed out");
                        let _ = manager.end_session(EndReason::PromptTimeout { generation }).await;
                    }
                }
            }
        });
        *slot = Some(ArmedPrompt { generation, cancel });
    }

    fn disarm_prompt(&self) {
        let armed = self
            .inner
            .prompt_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(armed) = armed {
            armed.cancel.cancel();
        }
    }
}
