//! Expiry rules for the fixed-TTL and activity-extended models.
//!
//! Everything here is pure: callers pass `now` in.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::token::TokenSet;
use crate::config::SessionConfig;

/// Thresholds governing when a session expires, refreshes or gets capped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryPolicy {
    /// Access-token lifetime assumed when neither the backend nor the token says.
    pub access_token_ttl: Duration,
    pub idle_timeout: Duration,
    /// A session is never idled out before it is this old.
    pub min_session_lifetime: Duration,
    /// Hard ceiling measured from login; equals the refresh-token lifetime.
    pub max_session_lifetime: Duration,
    /// Fraction of the access-token lifetime after which a refresh is due.
    pub refresh_threshold: f64,
    pub check_interval: Duration,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for ExpiryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            access_token_ttl: config.access_token_ttl,
            idle_timeout: config.idle_timeout,
            min_session_lifetime: config.min_session_lifetime,
            max_session_lifetime: config.max_session_lifetime,
            refresh_threshold: config.refresh_threshold,
            check_interval: config.check_interval,
        }
    }
}

impl ExpiryPolicy {
    /// When the access token stops being usable.
    pub fn access_expiry(&self, tokens: &TokenSet) -> DateTime<Utc> {
        tokens
            .embedded_expiry()
            .unwrap_or_else(|| offset(tokens.issued_at, self.access_token_ttl))
    }

    /// Fixed-TTL model: expired iff `now >= expiry`.
    pub fn is_expired(&self, tokens: &TokenSet, now: DateTime<Utc>) -> bool {
        now >= self.access_expiry(tokens)
    }

    /// Instant after which the session may not continue, whatever the activity.
    pub fn absolute_deadline(&self, session_started_at: DateTime<Utc>) -> DateTime<Utc> {
        offset(session_started_at, self.max_session_lifetime)
    }

    pub fn is_past_absolute_cap(&self, tokens: &TokenSet, now: DateTime<Utc>) -> bool {
        now >= self.absolute_deadline(tokens.session_started_at)
    }

    /// Activity model deadline.
    ///
    /// The later of `issued_at + min_session_lifetime` and
    /// `last_activity_at + idle_timeout`, never beyond
    /// `issued_at + max_session_lifetime`. `issued_at` is the session start.
    pub fn activity_expiry_deadline(
        &self,
        issued_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
        idle_timeout: Duration,
    ) -> DateTime<Utc> {
        let floor = offset(issued_at, self.min_session_lifetime);
        let idle_deadline = offset(last_activity_at, idle_timeout);
        floor.max(idle_deadline).min(self.absolute_deadline(issued_at))
    }

    /// [`activity_expiry_deadline`](Self::activity_expiry_deadline) for a live token set.
    pub fn session_deadline(&self, tokens: &TokenSet, last_activity_at: DateTime<Utc>) -> DateTime<Utc> {
        self.activity_expiry_deadline(tokens.session_started_at, last_activity_at, self.idle_timeout)
    }

    /// True once `fraction` of the lifetime between `issued_at` and
    /// `expiry_deadline` has elapsed.
    pub fn should_proactively_refresh(
        issued_at: DateTime<Utc>,
        expiry_deadline: DateTime<Utc>,
        now: DateTime<Utc>,
        fraction: f64,
    ) -> bool {
        let lifetime = (expiry_deadline - issued_at).num_milliseconds();
        if lifetime <= 0 {
            return true;
        }
        let elapsed = (now - issued_at).num_milliseconds();
        elapsed as f64 >= lifetime as f64 * fraction.clamp(0.0, 1.0)
    }

    /// The access token's proactive refresh instant.
    pub fn refresh_due_at(&self, tokens: &TokenSet) -> DateTime<Utc> {
        let lifetime = (self.access_expiry(tokens) - tokens.issued_at).num_milliseconds().max(0);
        let due_ms = (lifetime as f64 * self.refresh_threshold.clamp(0.0, 1.0)) as u64;
        offset(tokens.issued_at, Duration::from_millis(due_ms))
    }

    /// Earliest instant a check could reach a different verdict, bounded by
    /// `now + check_interval`.
    pub fn next_check_deadline(
        &self,
        tokens: &TokenSet,
        last_activity_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        [
            self.refresh_due_at(tokens),
            self.session_deadline(tokens, last_activity_at),
            self.absolute_deadline(tokens.session_started_at),
        ]
        .into_iter()
        .filter(|at| *at > now)
        .fold(offset(now, self.check_interval), std::cmp::min)
    }
}

/// `at + by`, saturating at the far future.
pub(crate) fn offset(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
