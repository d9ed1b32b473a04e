//! Single-flight token refresh with bounded retry.
//!
//! At most one refresh runs at a time. Every caller arriving while one is in
//! flight awaits the same shared future, so N concurrent triggers cost one
//! network round trip and produce one outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::token::AuthGrant;
use crate::clock::Clock;
use crate::error::TransportError;
use crate::transport::AuthTransport;
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

/// Final result of a refresh, after any retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(AuthGrant),
    /// The server refused the refresh token. Never retried.
    Rejected(String),
    /// Transient failures persisted through every allowed attempt.
    Exhausted { attempts: u32, last_error: String },
    /// The refresh was cancelled before it resolved.
    Cancelled,
}

impl RefreshOutcome {
    /// Whether the session can no longer be refreshed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Exhausted { .. })
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
    abort: AbortHandle,
}

#[derive(Default)]
struct RefreshAttemptState {
    in_flight: Option<InFlight>,
    attempt_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_id: u64,
}

/// Performs token refreshes against the transport.
pub struct RefreshCoordinator {
    transport: Arc<dyn AuthTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<RefreshAttemptState>>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        retry: RetryPolicy,
        request_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            retry,
            request_timeout,
            clock,
            state: Arc::new(Mutex::new(RefreshAttemptState::default())),
        }
    }

    /// Refresh the session, joining an in-flight refresh if there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.join_or_start().await
    }

    /// Whether a refresh is currently in flight.
    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Attempts made by the in-flight refresh so far; zero when idle.
    pub fn attempt_count(&self) -> u32 {
        lock(&self.state).attempt_count
    }

    /// When the most recent attempt failed, until a refresh succeeds.
    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_failure_at
    }

    /// Abort the in-flight refresh. Callers awaiting it observe
    /// [`RefreshOutcome::Cancelled`].
    pub fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        state.attempt_count = 0;
        match state.in_flight.take() {
            Some(in_flight) => {
                debug!(refresh_id = in_flight.id, "cancelling in-flight refresh");
                in_flight.abort.abort();
                true
            }
            None => false,
        }
    }

    fn join_or_start(&self) -> SharedRefresh {
        let mut state = lock(&self.state);
        if let Some(in_flight) = &state.in_flight {
            debug!(refresh_id = in_flight.id, "joining in-flight refresh");
            return in_flight.future.clone();
        }

        let id = state.next_id;
        state.next_id += 1;
        let task = tokio::spawn(run_refresh(
            id,
            self.transport.clone(),
            self.retry.clone(),
            self.request_timeout,
            self.clock.clone(),
            self.state.clone(),
        ));
        let abort = task.abort_handle();
        let future = async move { task.await.unwrap_or(RefreshOutcome::Cancelled) }
            .boxed()
            .shared();
        state.in_flight = Some(InFlight {
            id,
            future: future.clone(),
            abort,
        });
        future
    }
}

async fn run_refresh(
    id: u64,
    transport: Arc<dyn AuthTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<RefreshAttemptState>>,
) -> RefreshOutcome {
    let result = retry
        .execute(|attempt| {
            let transport = transport.clone();
            let clock = clock.clone();
            let state = state.clone();
            async move {
                lock(&state).attempt_count = attempt + 1;
                debug!(refresh_id = id, attempt = attempt + 1, "refreshing session tokens");
                let result = with_timeout(request_timeout, transport.execute_refresh()).await;
                if result.is_err() {
                    lock(&state).last_failure_at = Some(clock.now());
                }
                result
            }
        })
        .await;

    let mut state = lock(&state);
    let attempts = state.attempt_count;
    if state.in_flight.as_ref().map(|f| f.id) == Some(id) {
        state.in_flight = None;
    }
    state.attempt_count = 0;

    match result {
        Ok(grant) => {
            state.last_failure_at = None;
            debug!(refresh_id = id, attempts, "refresh succeeded");
            RefreshOutcome::Refreshed(grant)
        }
        Err(error) if error.is_transient() => {
            warn!(refresh_id = id, attempts, error = %error, "refresh attempts exhausted");
            RefreshOutcome::Exhausted {
                attempts,
                last_error: error.to_string(),
            }
        }
        Err(error) => {
            info!(refresh_id = id, attempts, error = %error, "refresh rejected");
            RefreshOutcome::Rejected(rejection_message(error))
        }
    }
}

fn rejection_message(error: TransportError) -> String {
    match error {
        TransportError::Rejected(msg) | TransportError::Unauthorized(msg) => msg,
        other => other.to_string(),
    }
}

fn lock(state: &Mutex<RefreshAttemptState>) -> MutexGuard<'_, RefreshAttemptState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
