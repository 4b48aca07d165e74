use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mockito::Matcher;
use reqwest::StatusCode;
use serde_json::json;

use super::{ApiRequest, Transport};
use crate::config::ClientSettings;
use crate::error::ClientError;
use crate::storage::{MemoryCredentialStorage, PersistedCredential};

fn signed_in(server: &mockito::ServerGuard, access: &str) -> (Transport, Arc<MemoryCredentialStorage>) {
    let storage = Arc::new(MemoryCredentialStorage::with_record(PersistedCredential {
        refresh_token: Some("refresh-1".to_string()),
        issued_at: Utc::now() - Duration::hours(1),
        user: None,
    }));
    let settings =
        ClientSettings::for_base_url(&server.url(), PathBuf::from("unused.json")).expect("settings");
    let transport = Transport::from_settings(&settings, storage.clone()).expect("transport");
    transport.credentials().load().expect("load").expect("session");
    let access = access.to_string();
    transport
        .credentials()
        .save(move |current| {
            current.map(|mut credential| {
                credential.access_token = Some(access);
                credential
            })
        })
        .expect("save");
    (transport, storage)
}

#[tokio::test]
async fn it_attaches_the_bearer_credential() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/profile")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(r#"{"email":"ada@example.com"}"#)
        .create_async()
        .await;

    let (transport, _) = signed_in(&server, "access-1");
    let body: serde_json::Value = transport
        .call_json(&ApiRequest::get("/profile"))
        .await
        .expect("call");

    assert_eq!(body["email"], "ada@example.com");
    mock.assert_async().await;
}

#[tokio::test]
async fn it_renews_once_and_retries_with_the_new_credential() {
    let mut server = mockito::Server::new_async().await;
    let stale = server
        .mock("GET", "/chat/sessions/")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/chat/sessions/")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .match_body(Matcher::Json(json!({ "refresh": "refresh-1" })))
        .with_status(200)
        .with_body(r#"{"access":"new"}"#)
        .expect(1)
        .create_async()
        .await;

    let (transport, storage) = signed_in(&server, "old");
    let sessions: Vec<serde_json::Value> = transport
        .call_json(&ApiRequest::get("/chat/sessions/"))
        .await
        .expect("call");

    assert!(sessions.is_empty());
    assert_eq!(transport.credentials().access_token().as_deref(), Some("new"));
    assert!(storage.snapshot().is_some());
    stale.assert_async().await;
    fresh.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn it_expires_the_session_after_two_authorization_failures() {
    let mut server = mockito::Server::new_async().await;
    let denied = server
        .mock("GET", "/chat/sessions/")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .with_status(200)
        .with_body(r#"{"access":"new","refresh":"refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;

    let (transport, storage) = signed_in(&server, "old");
    let status = transport.credentials().subscribe();
    let err = transport
        .call(&ApiRequest::get("/chat/sessions/"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SessionExpired));
    assert!(storage.snapshot().is_none());
    assert!(!transport.credentials().is_signed_in());
    assert_eq!(*status.borrow(), crate::credentials::AuthStatus::SignedOut);
    denied.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn it_expires_the_session_when_renewal_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let denied = server
        .mock("POST", "/chat/sessions/")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .with_status(401)
        .with_body(r#"{"detail":"Token is blacklisted"}"#)
        .expect(1)
        .create_async()
        .await;

    let (transport, storage) = signed_in(&server, "old");
    let err = transport
        .call(&ApiRequest::post("/chat/sessions/").json(json!({ "title": "x" })))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SessionExpired));
    assert!(storage.snapshot().is_none());
    denied.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn it_does_not_renew_for_credential_issuing_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/auth/login")
        .with_status(401)
        .with_body(r#"{"detail":"No active account found"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .expect(0)
        .create_async()
        .await;

    let (transport, storage) = signed_in(&server, "old");
    let err = transport
        .call(&ApiRequest::post("/auth/login").json(json!({ "email": "a", "password": "b" })))
        .await
        .unwrap_err();

    match err {
        ClientError::RequestFailed { status, body } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(body.contains("No active account"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(storage.snapshot().is_some());
    login.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn it_surfaces_other_failures_unchanged() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/chat/sessions/abc/")
        .with_status(404)
        .with_body(r#"{"detail":"Not found."}"#)
        .create_async()
        .await;

    let (transport, storage) = signed_in(&server, "access-1");
    let err = transport
        .call(&ApiRequest::get("/chat/sessions/abc/"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.user_message(), "Not found.");
    assert!(storage.snapshot().is_some());
    mock.assert_async().await;
}

#[tokio::test]
async fn concurrent_authorization_failures_share_one_renewal() {
    let mut server = mockito::Server::new_async().await;
    let stale = server
        .mock("GET", "/chat/sessions/")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/chat/sessions/")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .with_status(200)
        .with_body(r#"{"access":"new"}"#)
        .expect(1)
        .create_async()
        .await;

    let (transport, _) = signed_in(&server, "old");
    let request = ApiRequest::get("/chat/sessions/");
    let (first, second) = tokio::join!(transport.call(&request), transport.call(&request));

    assert!(first.is_ok());
    assert!(second.is_ok());
    stale.assert_async().await;
    fresh.assert_async().await;
    refresh.assert_async().await;
}

#[test]
fn credential_issuing_paths_are_recognised() {
    assert!(ApiRequest::post("/auth/login").is_credential_issuing());
    assert!(ApiRequest::post("/auth/signup").is_credential_issuing());
    assert!(ApiRequest::post("/auth/token/refresh/").is_credential_issuing());
    assert!(ApiRequest::post("/auth/google/login").is_credential_issuing());
    assert!(ApiRequest::post("/auth/resend-otp").is_credential_issuing());
    assert!(ApiRequest::post("/auth/password-reset/confirm").is_credential_issuing());
    assert!(!ApiRequest::post("/auth/logout").is_credential_issuing());
    assert!(!ApiRequest::get("/profile").is_credential_issuing());
}
