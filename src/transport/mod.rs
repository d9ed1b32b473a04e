//! Transport contract consumed by the session core.
//!
//! The core never speaks HTTP or GraphQL itself; it calls an [`AuthTransport`]
//! and reacts to the classified result.

pub mod http;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::session::{AuthGrant, Credentials, TokenSet};

pub use http::HttpTransport;

/// Login, refresh and logout against the auth backend.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Exchange credentials for a token grant.
    ///
    /// Rejected credentials must be reported as
    /// [`TransportError::InvalidCredentials`].
    async fn execute_login(&self, credentials: &Credentials) -> Result<AuthGrant, TransportError>;

    /// Obtain a fresh grant. The refresh token travels implicitly (e.g. as a
    /// secure cookie). A refresh token the server refuses must be reported as
    /// [`TransportError::Rejected`].
    async fn execute_refresh(&self) -> Result<AuthGrant, TransportError>;

    /// Revoke the session server-side. Best-effort: the caller clears local
    /// state regardless of the result.
    async fn execute_logout(&self) -> Result<(), TransportError>;

    /// Called with tokens loaded from storage before the manager relies on
    /// them. Transports that carry the refresh token implicitly use it to
    /// re-seed that state after a restart.
    fn resume_session(&self, _tokens: &TokenSet) {}
}
