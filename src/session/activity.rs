use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

const NEVER: i64 = i64::MIN;

/// Last meaningful user action.
///
/// Writes are monotonic: recording an instant earlier than the current one is
/// a no-op, so concurrent `record_activity` calls commute.
#[derive(Debug)]
pub struct ActivityTracker {
    last_activity_ms: AtomicI64,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last_activity_ms: AtomicI64::new(NEVER),
        }
    }

    /// Record activity at `now`. Returns `true` if the timestamp moved forward.
    pub fn record_activity(&self, now: DateTime<Utc>) -> bool {
        let at = now.timestamp_millis();
        self.last_activity_ms.fetch_max(at, Ordering::AcqRel) < at
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        match self.last_activity_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Time since the last activity; `Duration::MAX` if there never was any.
    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        match self.last_activity_at() {
            Some(at) => (now - at).to_std().unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    pub fn is_idle_beyond(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.idle_duration(now) > threshold
    }
}
