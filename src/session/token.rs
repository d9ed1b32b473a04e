use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::policy::offset;

/// Authenticated principal as reported by the auth backend.
///
/// `roles` drive the dashboard's role-based access checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Username/password pair passed to the transport on login.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Tokens issued by a successful login or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: Option<String>,
    /// Absolute expiry reported alongside the token.
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative lifetime reported alongside the token, resolved against the
    /// session clock when the grant is applied.
    pub expires_in: Option<Duration>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Result of a successful login or refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub tokens: TokenGrant,
    pub user: User,
}

/// The current access/refresh pair.
///
/// Both tokens are always present together; a persisted record missing either
/// one never becomes a `TokenSet`.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: Option<String>,
    /// When the current access token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the session was established by login. Survives refreshes.
    pub session_started_at: DateTime<Utc>,
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Tokens for a brand new session.
    pub fn from_login(grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self::from_grant(grant, now, now)
    }

    /// Tokens replacing `self` after a refresh; the session start carries over.
    pub fn refreshed(&self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self::from_grant(grant, now, self.session_started_at)
    }

    fn from_grant(grant: TokenGrant, now: DateTime<Utc>, session_started_at: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            csrf_token: grant.csrf_token,
            issued_at: now,
            session_started_at,
            access_expires_at: grant
                .expires_at
                .or_else(|| grant.expires_in.map(|ttl| offset(now, ttl))),
        }
    }

    /// Expiry of the access token: the reported one, else the JWT `exp` claim.
    pub fn embedded_expiry(&self) -> Option<DateTime<Utc>> {
        self.access_expires_at
            .or_else(|| jwt_expiry(&self.access_token))
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "<redacted>"))
            .field("issued_at", &self.issued_at)
            .field("session_started_at", &self.session_started_at)
            .field("access_expires_at", &self.access_expires_at)
            .finish()
    }
}

/// Read the `exp` claim from a JWT without verifying it.
///
/// Opaque tokens and malformed payloads yield `None`.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    parts.next()?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = value.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn jwt_with(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    fn grant(access: &str) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
            csrf_token: Some("csrf".to_string()),
            expires_at: None,
            expires_in: None,
        }
    }

    #[test]
    fn jwt_expiry_reads_exp_claim() {
        let token = jwt_with(serde_json::json!({ "sub": "u1", "exp": 1_700_000_000 }));
        let exp = jwt_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn jwt_expiry_ignores_opaque_tokens() {
        assert!(jwt_expiry("opaque-token").is_none());
        assert!(jwt_expiry("a.b").is_none());
        assert!(jwt_expiry("a.!!!.c").is_none());
        let no_exp = jwt_with(serde_json::json!({ "sub": "u1" }));
        assert!(jwt_expiry(&no_exp).is_none());
    }

    #[test]
    fn reported_expiry_wins_over_claim() {
        let now = Utc::now();
        let token = jwt_with(serde_json::json!({ "exp": (now + Duration::hours(1)).timestamp() }));
        let mut g = grant(&token);
        let reported = now + Duration::minutes(5);
        g.expires_at = Some(reported);
        let set = TokenSet::from_login(g, now);
        assert_eq!(set.embedded_expiry(), Some(reported));
    }

    #[test]
    fn relative_expiry_resolves_against_issue_time() {
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut g = grant("a1");
        g.expires_in = Some(std::time::Duration::from_secs(900));
        let set = TokenSet::from_login(g, issued);
        assert_eq!(set.access_expires_at, Some(issued + Duration::minutes(15)));
    }

    #[test]
    fn refresh_keeps_session_start() {
        let start = Utc::now();
        let set = TokenSet::from_login(grant("a1"), start);
        let later = start + Duration::minutes(10);
        let refreshed = set.refreshed(grant("a2"), later);
        assert_eq!(refreshed.session_started_at, start);
        assert_eq!(refreshed.issued_at, later);
        assert_eq!(refreshed.access_token, "a2");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let set = TokenSet::from_login(grant("secret-access"), Utc::now());
        let rendered = format!("{set:?}");
        assert!(!rendered.contains("secret-access"));
        let creds = Credentials::new("ada", "hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn user_role_lookup() {
        let user = User {
            id: "u1".into(),
            email: None,
            display_name: None,
            roles: vec!["admin".into(), "member".into()],
        };
        assert!(user.has_role("admin"));
        assert!(!user.has_role("owner"));
    }
}
