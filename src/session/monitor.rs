//! Background loop that keeps an authenticated session honest.
//!
//! The loop itself knows nothing about sessions: each iteration awaits a tick
//! callback that evaluates [`evaluate`] and acts on the result, then sleeps
//! until the tick's suggested deadline.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::policy::ExpiryPolicy;
use super::token::TokenSet;

/// Shortest sleep between ticks, so a deadline landing "now" cannot spin.
const MIN_TICK_DELAY: Duration = Duration::from_millis(50);

/// What the monitor wants done with the session right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    None,
    /// The access token is past its refresh threshold and the user is active.
    Refresh,
    /// The activity deadline passed; ask the user whether to continue.
    PromptUser,
    /// The absolute lifetime cap passed; no prompt, no refresh.
    ForceLogout,
}

/// Decide the monitor's action.
///
/// Rules apply in order: absolute cap, activity deadline, proactive refresh.
/// An idle session is prompted instead of silently extended.
pub fn evaluate(
    policy: &ExpiryPolicy,
    tokens: &TokenSet,
    last_activity_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MonitorAction {
    if policy.is_past_absolute_cap(tokens, now) {
        return MonitorAction::ForceLogout;
    }
    if now >= policy.session_deadline(tokens, last_activity_at) {
        return MonitorAction::PromptUser;
    }
    if ExpiryPolicy::should_proactively_refresh(
        tokens.issued_at,
        policy.access_expiry(tokens),
        now,
        policy.refresh_threshold,
    ) {
        return MonitorAction::Refresh;
    }
    MonitorAction::None
}

/// Returned by a tick to steer the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorTick {
    /// Sleep this long (clamped to the check interval) and tick again.
    Continue(Duration),
    Stop,
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorTask {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// Owner of at most one running monitor loop.
pub struct SessionMonitor {
    interval: Duration,
    slot: Mutex<Option<MonitorTask>>,
}

impl SessionMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the loop. The first tick runs immediately.
    ///
    /// Returns `false` without spawning when a loop is already running.
    pub fn start<F, Fut>(&self, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = MonitorTick> + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(MonitorTask::is_live) {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = self.interval;
        let min_delay = MIN_TICK_DELAY.min(interval);
        let handle = tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "session monitor started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                // A tick runs to completion even if the loop is stopped meanwhile;
                // its own side effects may be what stopped it.
                let delay = match tick().await {
                    MonitorTick::Continue(delay) => delay.clamp(min_delay, interval),
                    MonitorTick::Stop => break,
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            debug!("session monitor stopped");
        });

        *slot = Some(MonitorTask { cancel, handle });
        true
    }

    /// Stop the loop. Returns `true` if one was running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(task) => {
                let was_live = task.is_live();
                task.cancel.cancel();
                was_live
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(MonitorTask::is_live)
    }

    fn lock(&self) -> MutexGuard<'_, Option<MonitorTask>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.cancel.cancel();
        }
    }
}
