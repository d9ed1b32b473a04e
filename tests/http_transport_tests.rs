use std::sync::Arc;
use std::time::Duration;

use authsession::clock::ManualClock;
use authsession::config::SessionConfig;
use authsession::error::{SessionError, TransportError};
use authsession::session::{
    AuthSessionManager, Credentials, MemoryTokenStore, SessionStatus, StoredSession, TokenSet,
    TokenStore,
};
use authsession::transport::{AuthTransport, HttpTransport};
use authsession::util::retry::RetryPolicy;
use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn grant_body(access_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "refresh_token": format!("{access_token}-refresh"),
        "csrf_token": format!("{access_token}-csrf"),
        "expires_in": 900,
        "user": {
            "id": "user-1",
            "email": "ada@example.com",
            "display_name": "Ada",
            "roles": ["admin"]
        }
    })
}

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(server.uri()).expect("client builds")
}

#[tokio::test]
async fn login_parses_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(json!({ "username": "ada", "password": "pw" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a1")))
        .expect(1)
        .mount(&server)
        .await;

    let grant = transport(&server)
        .execute_login(&Credentials::new("ada", "pw"))
        .await
        .expect("login succeeds");

    assert_eq!(grant.tokens.access_token, "a1");
    assert_eq!(grant.tokens.refresh_token, "a1-refresh");
    assert_eq!(grant.tokens.csrf_token.as_deref(), Some("a1-csrf"));
    assert_eq!(grant.tokens.expires_in, Some(Duration::from_secs(900)));
    assert!(grant.tokens.expires_at.is_none());
    assert_eq!(grant.user.id, "user-1");
    assert!(grant.user.has_role("admin"));
}

#[tokio::test]
async fn login_unauthorized_is_invalid_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "bad username or password" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = transport(&server)
        .execute_login(&Credentials::new("ada", "nope"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TransportError::InvalidCredentials("bad username or password".into())
    );
}

#[tokio::test]
async fn refresh_sends_remembered_token_and_csrf_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a1")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("x-csrf-token", "a1-csrf"))
        .and(body_partial_json(json!({ "refresh_token": "a1-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a2")))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server);
    transport
        .execute_login(&Credentials::new("ada", "pw"))
        .await
        .unwrap();
    let grant = transport.execute_refresh().await.expect("refresh succeeds");

    assert_eq!(grant.tokens.access_token, "a2");
}

#[tokio::test]
async fn refresh_falls_back_to_seeded_token_when_body_omits_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({ "refresh_token": "stored-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a3",
            "user": { "id": "user-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server).with_refresh_token("stored-refresh", None);
    let grant = transport.execute_refresh().await.unwrap();

    assert_eq!(grant.tokens.refresh_token, "stored-refresh");
    assert!(grant.tokens.expires_in.is_none());
    assert!(grant.user.roles.is_empty());
}

#[tokio::test]
async fn refresh_rejection_and_outage_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "revoked" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let transport = transport(&server);

    let rejected = transport.execute_refresh().await.unwrap_err();
    assert_eq!(rejected, TransportError::Rejected("revoked".into()));
    assert!(!rejected.is_transient());

    let outage = transport.execute_refresh().await.unwrap_err();
    assert_eq!(
        outage,
        TransportError::Server {
            status: 503,
            message: "maintenance".into()
        }
    );
    assert!(outage.is_transient());

    let limited = transport.execute_refresh().await.unwrap_err();
    assert_eq!(
        limited,
        TransportError::RateLimited {
            retry_after_ms: Some(7_000)
        }
    );
}

#[tokio::test]
async fn malformed_grant_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .mount(&server)
        .await;

    let err = transport(&server).execute_refresh().await.unwrap_err();

    assert!(matches!(err, TransportError::InvalidResponse(_)));
}

#[tokio::test]
async fn logout_treats_unauthorized_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server).execute_logout().await.expect("already logged out");
}

#[tokio::test]
async fn custom_paths_are_honoured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a1")))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server).with_login_path("/api/v2/session");
    transport
        .execute_login(&Credentials::new("ada", "pw"))
        .await
        .unwrap();
}

#[tokio::test]
async fn manager_drives_http_backend_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("x-csrf-token", "a1-csrf"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = SessionConfig::builder()
        .restore_via_refresh(false)
        .retry(RetryPolicy::no_retry())
        .build();
    let manager = AuthSessionManager::new(
        config,
        Arc::new(transport(&server)),
        Arc::new(MemoryTokenStore::new()),
    );
    manager.start().await;

    let snapshot = manager.login(Credentials::new("ada", "pw")).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert_eq!(manager.access_credentials().unwrap().access_token, "a1");

    manager.logout().await;
    assert_eq!(manager.status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn manager_surfaces_rejected_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(400).set_body_string("missing password"))
        .mount(&server)
        .await;

    let config = SessionConfig::builder().restore_via_refresh(false).build();
    let manager = AuthSessionManager::new(
        config,
        Arc::new(transport(&server)),
        Arc::new(MemoryTokenStore::new()),
    );
    manager.start().await;

    let err = manager.login(Credentials::new("ada", "")).await.unwrap_err();

    assert_eq!(err, SessionError::InvalidCredentials("missing password".into()));
    assert_eq!(manager.status(), SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn grant_expiry_follows_the_session_clock() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a1")))
        .mount(&server)
        .await;

    let origin = Utc.with_ymd_and_hms(2031, 6, 1, 8, 0, 0).unwrap();
    let store = Arc::new(MemoryTokenStore::new());
    let config = SessionConfig::builder().restore_via_refresh(false).build();
    let manager = AuthSessionManager::with_clock(
        config,
        Arc::new(transport(&server)),
        store.clone(),
        Arc::new(ManualClock::new(origin)),
    );
    manager.start().await;
    manager.login(Credentials::new("ada", "pw")).await.unwrap();

    let tokens = store.load().unwrap().unwrap().token_set().unwrap();
    assert_eq!(tokens.issued_at, origin);
    assert_eq!(
        tokens.access_expires_at,
        Some(origin + chrono::Duration::seconds(900))
    );
    manager.stop();
}

#[tokio::test]
async fn restart_restores_with_the_stored_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("x-csrf-token", "old-csrf"))
        .and(body_partial_json(json!({ "refresh_token": "old-refresh" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("a2")))
        .expect(1)
        .mount(&server)
        .await;

    let now = Utc::now();
    let expired = TokenSet {
        access_token: "old-access".to_string(),
        refresh_token: "old-refresh".to_string(),
        csrf_token: Some("old-csrf".to_string()),
        issued_at: now - chrono::Duration::hours(1),
        session_started_at: now - chrono::Duration::hours(2),
        access_expires_at: Some(now - chrono::Duration::minutes(45)),
    };
    let store = Arc::new(MemoryTokenStore::new());
    store
        .save(&StoredSession::new(&expired, Some(now), None))
        .unwrap();

    let manager = AuthSessionManager::new(
        SessionConfig::builder().retry(RetryPolicy::no_retry()).build(),
        Arc::new(transport(&server)),
        store.clone(),
    );
    let snapshot = manager.start().await;

    assert_eq!(snapshot.status, SessionStatus::Authenticated);
    assert_eq!(manager.access_credentials().unwrap().access_token, "a2");
    let restored = store.load().unwrap().unwrap().token_set().unwrap();
    assert_eq!(restored.refresh_token, "a2-refresh");
    manager.stop();
}
