//! Configuration system (layered: defaults < TOML file < environment).
//!
//! Every threshold the session core uses lives here. Products disagree about
//! the right idle and refresh thresholds, so none of them are hard-coded
//! elsewhere.

use std::path::Path;
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::util::retry::RetryPolicy;

const ENV_PREFIX: &str = "AUTHSESSION_";

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_MIN_SESSION_LIFETIME: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_REFRESH_THRESHOLD: f64 = 0.5;
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ACTIVITY_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for the session lifecycle.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use authsession::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .idle_timeout(Duration::from_secs(60))
///     .prompt_timeout(Duration::from_secs(30))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the monitor evaluates the session.
    #[builder(default = DEFAULT_CHECK_INTERVAL)]
    #[serde(rename = "check_interval_secs", with = "duration_secs")]
    pub check_interval: Duration,
    /// Access-token lifetime assumed when no expiry is reported or embedded.
    #[builder(default = DEFAULT_ACCESS_TOKEN_TTL)]
    #[serde(rename = "access_token_ttl_secs", with = "duration_secs")]
    pub access_token_ttl: Duration,
    #[builder(default = DEFAULT_IDLE_TIMEOUT)]
    #[serde(rename = "idle_timeout_secs", with = "duration_secs")]
    pub idle_timeout: Duration,
    #[builder(default = DEFAULT_MIN_SESSION_LIFETIME)]
    #[serde(rename = "min_session_lifetime_secs", with = "duration_secs")]
    pub min_session_lifetime: Duration,
    /// Absolute ceiling from login; match the refresh-token lifetime.
    #[builder(default = DEFAULT_MAX_SESSION_LIFETIME)]
    #[serde(rename = "max_session_lifetime_secs", with = "duration_secs")]
    pub max_session_lifetime: Duration,
    /// Fraction of the access-token lifetime after which to refresh, in (0, 1].
    #[builder(default = DEFAULT_REFRESH_THRESHOLD)]
    pub refresh_threshold: f64,
    /// How long the expiry prompt waits for a decision before logging out.
    #[builder(default = DEFAULT_PROMPT_TIMEOUT)]
    #[serde(rename = "prompt_timeout_secs", with = "duration_secs")]
    pub prompt_timeout: Duration,
    /// Per-call timeout for login, refresh and logout.
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Minimum spacing between activity-only writes to the token store.
    #[builder(default = DEFAULT_ACTIVITY_PERSIST_INTERVAL)]
    #[serde(rename = "activity_persist_interval_secs", with = "duration_secs")]
    pub activity_persist_interval: Duration,
    /// On startup without usable stored tokens, try the (cookie-borne) refresh.
    #[builder(default = true)]
    pub restore_via_refresh: bool,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Defaults overlaid with `AUTHSESSION_*` environment variables.
    ///
    /// A `.env` file in the working directory is honoured.
    pub fn from_env() -> Result<Self, SessionError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, SessionError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| SessionError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then overlay the environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup`, keyed by the full variable name
    /// (e.g. `AUTHSESSION_IDLE_TIMEOUT_SECS`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let durations: [(&str, &mut Duration); 8] = [
            ("CHECK_INTERVAL_SECS", &mut self.check_interval),
            ("ACCESS_TOKEN_TTL_SECS", &mut self.access_token_ttl),
            ("IDLE_TIMEOUT_SECS", &mut self.idle_timeout),
            ("MIN_SESSION_LIFETIME_SECS", &mut self.min_session_lifetime),
            ("MAX_SESSION_LIFETIME_SECS", &mut self.max_session_lifetime),
            ("PROMPT_TIMEOUT_SECS", &mut self.prompt_timeout),
            ("REQUEST_TIMEOUT_SECS", &mut self.request_timeout),
            ("ACTIVITY_PERSIST_INTERVAL_SECS", &mut self.activity_persist_interval),
        ];
        for (suffix, slot) in durations {
            if let Some(secs) = read_env::<u64, _>(&lookup, suffix)? {
                *slot = Duration::from_secs(secs);
            }
        }
        if let Some(threshold) = read_env::<f64, _>(&lookup, "REFRESH_THRESHOLD")? {
            self.refresh_threshold = threshold;
        }
        if let Some(restore) = read_env::<bool, _>(&lookup, "RESTORE_VIA_REFRESH")? {
            self.restore_via_refresh = restore;
        }
        if let Some(attempts) = read_env::<u32, _>(&lookup, "REFRESH_MAX_ATTEMPTS")? {
            self.retry.max_attempts = attempts;
        }
        Ok(())
    }

    /// Reject combinations the session core cannot honour.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.check_interval.is_zero() {
            return Err(SessionError::Configuration(
                "check_interval must be greater than zero".into(),
            ));
        }
        if !(self.refresh_threshold > 0.0 && self.refresh_threshold <= 1.0) {
            return Err(SessionError::Configuration(format!(
                "refresh_threshold must be in (0, 1], got {}",
                self.refresh_threshold
            )));
        }
        if self.min_session_lifetime > self.max_session_lifetime {
            return Err(SessionError::Configuration(
                "min_session_lifetime exceeds max_session_lifetime".into(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "idle_timeout must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SessionError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn read_env<T, F>(lookup: &F, suffix: &str) -> Result<Option<T>, SessionError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match lookup(&key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SessionError::Configuration(format!("{key}: {e}"))),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
