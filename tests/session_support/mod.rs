#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authsession::clock::TokioClock;
use authsession::config::SessionConfig;
use authsession::error::{SessionError, TransportError};
use authsession::session::{
    AuthGrant, AuthSessionManager, Credentials, SessionSnapshot, StoredSession, TokenGrant,
    TokenSet, TokenStore, User,
};
use authsession::transport::AuthTransport;
use chrono::Utc;
use tokio::sync::Notify;

pub fn user() -> User {
    User {
        id: "user-1".to_string(),
        email: Some("ada@example.com".to_string()),
        display_name: Some("Ada".to_string()),
        roles: vec!["project-manager".to_string()],
    }
}

pub fn grant(access_token: &str) -> AuthGrant {
    AuthGrant {
        tokens: TokenGrant {
            access_token: access_token.to_string(),
            refresh_token: format!("{access_token}-refresh"),
            csrf_token: Some(format!("{access_token}-csrf")),
            expires_at: None,
            expires_in: None,
        },
        user: user(),
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("ada", "correct horse")
}

type Scripted<T> = Mutex<VecDeque<Result<T, TransportError>>>;

/// Transport double with scripted answers, call counters and optional latency.
///
/// Unscripted logins and refreshes succeed with numbered tokens
/// (`login-1`, `refresh-1`, ...).
#[derive(Default)]
pub struct MockTransport {
    logins: Scripted<AuthGrant>,
    refreshes: Scripted<AuthGrant>,
    logouts: Scripted<()>,
    refresh_delay: Mutex<Duration>,
    logout_delay: Mutex<Duration>,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_returned: Notify,
    resumed: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_login(&self, result: Result<AuthGrant, TransportError>) {
        self.logins.lock().unwrap().push_back(result);
    }

    pub fn script_refresh(&self, result: Result<AuthGrant, TransportError>) {
        self.refreshes.lock().unwrap().push_back(result);
    }

    pub fn script_logout(&self, result: Result<(), TransportError>) {
        self.logouts.lock().unwrap().push_back(result);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn set_logout_delay(&self, delay: Duration) {
        *self.logout_delay.lock().unwrap() = delay;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// Resolves once a refresh call has produced its answer, before the
    /// caller has seen it.
    pub async fn refresh_returned(&self) {
        self.refresh_returned.notified().await;
    }

    /// Refresh tokens handed over from storage.
    pub fn resumed(&self) -> Vec<String> {
        self.resumed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthTransport for MockTransport {
    async fn execute_login(&self, _credentials: &Credentials) -> Result<AuthGrant, TransportError> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.logins.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(grant(&format!("login-{n}"))))
    }

    async fn execute_refresh(&self) -> Result<AuthGrant, TransportError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.refreshes.lock().unwrap().pop_front();
        self.refresh_returned.notify_one();
        scripted.unwrap_or_else(|| Ok(grant(&format!("refresh-{n}"))))
    }

    async fn execute_logout(&self) -> Result<(), TransportError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.logout_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.logouts.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }

    fn resume_session(&self, tokens: &TokenSet) {
        self.resumed.lock().unwrap().push(tokens.refresh_token.clone());
    }
}

/// A store whose backing medium is gone.
#[derive(Default)]
pub struct FailingStore;

impl TokenStore for FailingStore {
    fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        Err(SessionError::StorageUnavailable("disk unplugged".to_string()))
    }

    fn save(&self, _session: &StoredSession) -> Result<(), SessionError> {
        Err(SessionError::StorageUnavailable("disk unplugged".to_string()))
    }

    fn clear(&self) -> Result<(), SessionError> {
        Err(SessionError::StorageUnavailable("disk unplugged".to_string()))
    }
}

/// Short thresholds so paused-time tests cross them quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig::builder()
        .check_interval(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(60))
        .min_session_lifetime(Duration::from_secs(30))
        .prompt_timeout(Duration::from_secs(120))
        .request_timeout(Duration::from_secs(10))
        .restore_via_refresh(false)
        .build()
}

/// A manager whose clock follows tokio's (possibly paused) time.
pub fn manager_with(
    config: SessionConfig,
    transport: Arc<MockTransport>,
    store: Arc<dyn TokenStore>,
) -> AuthSessionManager {
    AuthSessionManager::with_clock(config, transport, store, Arc::new(TokioClock::new(Utc::now())))
}

/// Collects every snapshot a subscriber is handed.
#[derive(Clone, Default)]
pub struct SnapshotLog {
    seen: Arc<Mutex<Vec<Arc<SessionSnapshot>>>>,
}

impl SnapshotLog {
    pub fn listener(&self) -> impl Fn(Arc<SessionSnapshot>) + Send + Sync + 'static {
        let seen = self.seen.clone();
        move |snapshot| seen.lock().unwrap().push(snapshot)
    }

    pub fn snapshots(&self) -> Vec<Arc<SessionSnapshot>> {
        self.seen.lock().unwrap().clone()
    }
}

/// Let spawned tasks run without moving paused time meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
