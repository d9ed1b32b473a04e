use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::task::JoinHandle;

use super::token::User;

/// Where the session is in its lifecycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session; the login screen is showing.
    Unauthenticated,
    /// Restoring from storage; nothing is known yet.
    Initializing,
    Authenticated,
    /// A refresh is in flight. Credentials stay usable.
    Refreshing,
    /// The expiry prompt is up, waiting for continue or decline.
    AwaitingUserDecision,
    /// Local state is cleared; the server-side revoke is in flight.
    LoggingOut,
}

impl SessionStatus {
    /// Whether the user holds a live session in this status.
    pub fn has_session(self) -> bool {
        matches!(
            self,
            Self::Authenticated | Self::Refreshing | Self::AwaitingUserDecision
        )
    }
}

/// The "your session is about to expire" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptState {
    pub shown_at: DateTime<Utc>,
    /// When the session ends if nobody answers.
    pub auto_logout_at: DateTime<Utc>,
}

/// Immutable view of the session handed to the UI layer.
///
/// Every transition publishes a new snapshot with a higher `version`; a
/// snapshot is never mutated after it is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub status: SessionStatus,
    pub session_expiry_prompt: Option<PromptState>,
    /// Why the session last ended, when the user should be told.
    pub message: Option<String>,
    pub version: u64,
}

impl SessionSnapshot {
    pub(crate) fn initial() -> Self {
        Self {
            user: None,
            status: SessionStatus::Initializing,
            session_expiry_prompt: None,
            message: None,
            version: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status.has_session()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.user.as_ref().is_some_and(|user| user.has_role(role))
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Stop delivering snapshots to the listener.
    pub fn unsubscribe(mut self) {
        self.abort();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}
