//! REST transport over reqwest.
//!
//! The backend exposes `POST /auth/login`, `/auth/refresh` and `/auth/logout`.
//! The refresh token normally rides in an http-only cookie, kept in the
//! client's cookie jar; the last one seen in a response body is also sent
//! explicitly so a restarted process can resume from a stored token.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::AuthTransport;
use crate::error::{SessionError, TransportError};
use crate::session::{AccessCredentials, AuthGrant, Credentials, TokenGrant, TokenSet, User};

const DEFAULT_LOGIN_PATH: &str = "/auth/login";
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Default)]
struct RememberedTokens {
    refresh_token: Option<String>,
    csrf_token: Option<String>,
}

/// [`AuthTransport`] for the dashboard's REST auth endpoints.
///
/// # Example
/// ```no_run
/// use authsession::transport::HttpTransport;
///
/// let transport = HttpTransport::new("https://dashboard.example.com")?
///     .with_refresh_path("/api/session/refresh");
/// # Ok::<(), authsession::error::SessionError>(())
/// ```
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    login_path: String,
    refresh_path: String,
    logout_path: String,
    remembered: Mutex<RememberedTokens>,
}

impl HttpTransport {
    /// A transport with its own cookie-enabled client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| SessionError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a caller-built client; enable its cookie store for cookie-borne
    /// refresh tokens.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            remembered: Mutex::new(RememberedTokens::default()),
        }
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Seed the tokens sent on the next refresh, e.g. from a stored session.
    pub fn with_refresh_token(self, refresh_token: impl Into<String>, csrf_token: Option<String>) -> Self {
        {
            let mut remembered = self.remembered();
            remembered.refresh_token = Some(refresh_token.into());
            remembered.csrf_token = csrf_token;
        }
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn remembered(&self) -> MutexGuard<'_, RememberedTokens> {
        self.remembered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn csrf_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(csrf) = &self.remembered().csrf_token {
            if let Ok(value) = HeaderValue::from_str(csrf) {
                headers.insert(CSRF_HEADER, value);
            }
        }
        headers
    }

    async fn read_grant(&self, response: Response) -> Result<AuthGrant, TransportError> {
        let payload: GrantResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        let mut remembered = self.remembered();
        let refresh_token = payload
            .refresh_token
            .or_else(|| remembered.refresh_token.clone())
            .ok_or_else(|| TransportError::InvalidResponse("response carried no refresh token".into()))?;
        remembered.refresh_token = Some(refresh_token.clone());
        remembered.csrf_token = payload.csrf_token.clone();
        Ok(AuthGrant {
            tokens: TokenGrant {
                access_token: payload.access_token,
                refresh_token,
                csrf_token: payload.csrf_token,
                expires_at: None,
                expires_in: payload
                    .expires_in
                    .filter(|secs| *secs > 0)
                    .map(|secs| Duration::from_secs(secs.unsigned_abs())),
            },
            user: payload.user,
        })
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn execute_login(&self, credentials: &Credentials) -> Result<AuthGrant, TransportError> {
        debug!(username = %credentials.username, "POST login");
        let response = self
            .client
            .post(self.url(&self.login_path))
            .json(credentials)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => self.read_grant(response).await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Err(
                TransportError::InvalidCredentials(error_message(response).await),
            ),
            status => Err(status_to_error(status, response).await),
        }
    }

    async fn execute_refresh(&self) -> Result<AuthGrant, TransportError> {
        let body = match &self.remembered().refresh_token {
            Some(token) => serde_json::json!({ "refresh_token": token }),
            None => serde_json::json!({}),
        };
        let response = self
            .client
            .post(self.url(&self.refresh_path))
            .headers(self.csrf_headers())
            .json(&body)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => self.read_grant(response).await,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TransportError::Rejected(error_message(response).await))
            }
            status => Err(status_to_error(status, response).await),
        }
    }

    async fn execute_logout(&self) -> Result<(), TransportError> {
        let headers = self.csrf_headers();
        *self.remembered() = RememberedTokens::default();
        let response = self
            .client
            .post(self.url(&self.logout_path))
            .headers(headers)
            .send()
            .await?;
        match response.status() {
            // Already signed out server-side.
            status if status.is_success() || status == StatusCode::UNAUTHORIZED => Ok(()),
            status => Err(status_to_error(status, response).await),
        }
    }

    fn resume_session(&self, tokens: &TokenSet) {
        debug!("seeding refresh token from stored session");
        let mut remembered = self.remembered();
        remembered.refresh_token = Some(tokens.refresh_token.clone());
        remembered.csrf_token = tokens.csrf_token.clone();
    }
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    csrf_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: User,
}

/// Headers for an authenticated request: bearer token plus CSRF token.
pub fn auth_headers(credentials: &AccessCredentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", credentials.access_token)) {
        headers.insert(AUTHORIZATION, value);
    }
    if let Some(csrf) = &credentials.csrf_token {
        if let Ok(value) = HeaderValue::from_str(csrf) {
            headers.insert(CSRF_HEADER, value);
        }
    }
    headers
}

/// Classify a failed response from any endpoint.
///
/// 401 and 403 are [`TransportError::Unauthorized`], so
/// [`authenticated`](crate::session::AuthSessionManager::authenticated) knows
/// to refresh and retry.
pub async fn status_to_error(status: StatusCode, response: Response) -> TransportError {
    let retry_after_ms = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let message = error_message(response).await;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited { retry_after_ms },
        status if status.is_server_error() => TransportError::Server {
            status: status.as_u16(),
            message,
        },
        status => TransportError::InvalidResponse(format!("unexpected status {status}: {message}")),
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            }
        })
}
