//! Error types for session management.

use thiserror::Error;

/// Primary error type for session operations.
///
/// Background failures never surface through this type; they become status
/// transitions on the [`SessionSnapshot`](crate::session::SessionSnapshot).
/// Only the imperative calls (`login`, `continue_session`, ...) return it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Transient network failure: {0}")]
    TransientNetworkFailure(String),

    #[error("Session terminated: {0}")]
    TerminalAuthFailure(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Superseded by a newer session transition")]
    Superseded,

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// Whether the failure ends the session rather than a single attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalAuthFailure(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(error: toml::de::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl From<toml::ser::Error> for SessionError {
    fn from(error: toml::ser::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

/// Failure reported by an [`AuthTransport`](crate::transport::AuthTransport).
///
/// The transport classifies; the refresh coordinator and the manager decide
/// what each class means for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Login rejected the supplied credentials.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    /// The refresh token is invalid, expired or revoked.
    #[error("Refresh rejected: {0}")]
    Rejected(String),
    /// An authenticated request was rejected for its access token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout after {0}ms")]
    Timeout(u64),
    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Transient failures are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server { .. } | Self::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(0)
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::InvalidCredentials(msg) => Self::InvalidCredentials(msg),
            TransportError::Rejected(msg) | TransportError::Unauthorized(msg) => {
                Self::TerminalAuthFailure(msg)
            }
            TransportError::Timeout(ms) => Self::Timeout(ms),
            other => Self::TransientNetworkFailure(other.to_string()),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
