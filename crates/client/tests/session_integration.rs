//! Session and token refresh behavior through the REST client.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tokio::task::JoinSet;
use tokio_test::assert_ok;

use common::Harness;
use farmtrack_client::api::FarmTrackApi;
use farmtrack_client::auth::{FileTokenStore, MemoryTokenStore, TokenStore};
use farmtrack_client::error::ClientError;
use farmtrack_client::rest::{RestClient, TOKEN_REFRESH_PATH};
use farmtrack_client::session::{SessionContext, SessionStatus};
use farmtrack_client::tracker::TrackerEvent;
use farmtrack_client::transport::{ApiResponse, Method, MockTransport};

fn jwt(username: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &json!({"token_type": "access", "exp": exp, "user_id": 7, "username": username}),
        &EncodingKey::from_secret(b"server-secret"),
    )
    .unwrap()
}

async fn session_with(access: &str) -> Arc<SessionContext> {
    let session = Arc::new(SessionContext::new(Arc::new(MemoryTokenStore::new()), 30));
    session
        .set_tokens(access, Some("refresh-1".to_string()))
        .await
        .unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let transport = MockTransport::new(|request| {
        if request.path == TOKEN_REFRESH_PATH {
            assert_eq!(request.body.as_ref().unwrap()["refresh"], "refresh-1");
            return Ok(ApiResponse::new(200, r#"{"access": "fresh"}"#));
        }
        match request.bearer.as_deref() {
            Some("fresh") => Ok(ApiResponse::new(200, "[]")),
            _ => Ok(ApiResponse::new(401, r#"{"detail": "Token expired"}"#)),
        }
    })
    .with_latency(Duration::from_millis(50));

    let session = session_with("stale").await;
    let api = FarmTrackApi::new(RestClient::new(
        Arc::new(transport.clone()),
        Arc::clone(&session),
    ));

    let mut calls = JoinSet::new();
    for _ in 0..8 {
        let api = api.clone();
        calls.spawn(async move { api.overview().await });
    }
    while let Some(joined) = calls.join_next().await {
        let entries = assert_ok!(joined.unwrap());
        assert!(entries.is_empty());
    }

    assert_eq!(transport.count(Method::Post, TOKEN_REFRESH_PATH), 1);
    assert_eq!(transport.count(Method::Get, "/status/overview/"), 16);
    assert_eq!(session.get_token().await.as_deref(), Some("fresh"));
    // The refresh response carried no new refresh token; the old one stays.
    assert_eq!(session.refresh_token().await.as_deref(), Some("refresh-1"));
    assert_eq!(session.status(), SessionStatus::Active);
}

#[tokio::test]
async fn test_failed_refresh_expires_session_once() {
    let transport = MockTransport::new(|request| {
        if request.path == TOKEN_REFRESH_PATH {
            Ok(ApiResponse::new(401, r#"{"detail": "Token is blacklisted"}"#))
        } else {
            Ok(ApiResponse::new(401, r#"{"detail": "Token expired"}"#))
        }
    });
    let session = session_with("stale").await;
    let mut status = session.subscribe();
    let api = FarmTrackApi::new(RestClient::new(
        Arc::new(transport.clone()),
        Arc::clone(&session),
    ));

    assert_eq!(api.alerts().await, Err(ClientError::SessionExpired));
    assert_ok!(status.changed().await);
    assert_eq!(*status.borrow(), SessionStatus::Expired);
    assert!(session.get_token().await.is_none());

    // Once expired, further 401s fail without another refresh attempt.
    assert!(matches!(api.overview().await, Err(ClientError::SessionExpired)));
    assert_eq!(transport.count(Method::Post, TOKEN_REFRESH_PATH), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_expiry_stops_tracker() {
    let backend = common::FakeBackend::new();
    backend.report("D1", "Tractor 1", common::INSIDE);

    let revoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&revoked);
    let inner = backend.clone();
    let transport = MockTransport::new(move |request| {
        if flag.load(Ordering::SeqCst) {
            return Ok(ApiResponse::new(401, r#"{"detail": "Token is invalid or expired"}"#));
        }
        inner.respond(request)
    });

    let mut h = Harness::start_with(backend, transport).await;
    assert_ok!(h.tracker.mount(None).await);
    h.wait_until(|s| !s.devices.is_empty()).await;

    revoked.store(true, Ordering::SeqCst);
    h.wait_for(|e| *e == TrackerEvent::SessionExpired).await;
    h.wait_for(|e| *e == TrackerEvent::Unmounted).await;

    assert_eq!(h.session.status(), SessionStatus::Expired);
    let snapshot = h.tracker.snapshot().await.unwrap();
    assert!(!snapshot.mounted);
    assert_eq!(h.tracker.mount(None).await, Err(ClientError::SessionExpired));
}

#[tokio::test]
async fn test_login_persists_across_sessions() {
    let dir = std::env::temp_dir().join(format!("farmtrack-session-{}", uuid::Uuid::new_v4()));
    let path = dir.join("auth-storage.json");
    let exp = chrono::Utc::now().timestamp() + 3600;
    let access = jwt("farmer", exp);

    let token = access.clone();
    let transport = MockTransport::new(move |request| {
        assert_eq!(request.path, "/token/");
        assert!(request.bearer.is_none());
        Ok(ApiResponse::json(200, &json!({"access": token, "refresh": "refresh-9"})))
    });

    let store: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(&path));
    let session = Arc::new(SessionContext::new(Arc::clone(&store), 30));
    assert_eq!(session.init().await.unwrap(), SessionStatus::LoggedOut);

    let rest = RestClient::new(Arc::new(transport), Arc::clone(&session));
    assert_ok!(rest.login("farmer", "hunter2").await);
    assert!(session.is_valid().await);
    assert_ok!(session.teardown().await);

    // A new process picks the session up from disk.
    let restored = SessionContext::new(Arc::new(FileTokenStore::new(&path)), 30);
    assert_eq!(restored.init().await.unwrap(), SessionStatus::Active);
    assert_eq!(restored.get_token().await, Some(access));
    let user = restored.current_user().await.unwrap();
    assert_eq!(user.username.as_deref(), Some("farmer"));
    assert_eq!(user.user_id, Some(7));

    // Logging out clears the persisted record.
    assert_ok!(restored.clear().await);
    let reloaded = SessionContext::new(Arc::new(FileTokenStore::new(&path)), 30);
    assert_eq!(reloaded.init().await.unwrap(), SessionStatus::LoggedOut);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
