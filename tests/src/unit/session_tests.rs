use super::{test_runtime, Harness};
use mockito::Matcher;
use serde_json::json;
use talksense_core::{AuthStatus, ClientError, MessageStatus, Role};
use tempfile::TempDir;

const LOGIN_BODY: &str = r#"{
    "tokens": {"access": "ACCESS-TOKEN-1", "refresh": "REFRESH-TOKEN-1"},
    "user": {"id": 3, "email": "ada@example.com", "first_name": "Ada", "role": "user"},
    "is_new": false
}"#;

fn mock_login(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(LOGIN_BODY)
        .create()
}

#[test]
fn login_survives_restart_and_logout_removes_the_record() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("auth.json");

    let login = mock_login(&mut server);
    let first = Harness::new(&server.url(), &path);
    runtime
        .block_on(first.auth.login("ada@example.com", "pw"))
        .expect("login");
    login.assert();

    let raw = std::fs::read_to_string(&path).expect("credential file");
    assert!(raw.contains("REFRESH-TOKEN-1"));
    assert!(!raw.contains("ACCESS-TOKEN"));

    // A new process only has the durable half until it renews.
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .match_body(Matcher::Json(json!({ "refresh": "REFRESH-TOKEN-1" })))
        .with_status(200)
        .with_body(r#"{"access":"ACCESS-TOKEN-2"}"#)
        .expect(1)
        .create();
    let profile = server
        .mock("GET", "/profile")
        .match_header("authorization", "Bearer ACCESS-TOKEN-2")
        .with_status(200)
        .with_body(r#"{"id":3,"email":"ada@example.com","first_name":"Ada","last_name":"Lovelace"}"#)
        .expect(1)
        .create();

    let second = Harness::new(&server.url(), &path);
    assert!(second.auth.credentials().access_token().is_none());
    let user = runtime
        .block_on(second.auth.restore_session())
        .expect("restore")
        .expect("session");
    assert_eq!(user.display_name(), "Ada Lovelace");
    assert_eq!(
        second.auth.credentials().access_token().as_deref(),
        Some("ACCESS-TOKEN-2")
    );
    refresh.assert();
    profile.assert();

    let logout = server
        .mock("POST", "/auth/logout")
        .match_header("authorization", "Bearer ACCESS-TOKEN-2")
        .match_body(Matcher::Json(json!({ "refresh": "REFRESH-TOKEN-1" })))
        .with_status(200)
        .with_body(r#"{"detail":"Logged out."}"#)
        .expect(1)
        .create();
    let status = second.auth.credentials().subscribe();
    runtime.block_on(second.auth.logout()).expect("logout");

    assert!(!path.exists());
    assert_eq!(*status.borrow(), AuthStatus::SignedOut);
    logout.assert();
}

#[test]
fn expired_access_during_a_send_is_renewed_transparently() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("auth.json");

    let _login = mock_login(&mut server);
    let client = Harness::new(&server.url(), &path);
    runtime
        .block_on(client.auth.login("ada@example.com", "pw"))
        .expect("login");

    let _create = server
        .mock("POST", "/chat/sessions/")
        .with_status(201)
        .with_body(r#"{"id":"4b1d","title":"What is RAG?..."}"#)
        .create();
    let stale = server
        .mock("POST", "/chat/messages/stream/")
        .match_header("authorization", "Bearer ACCESS-TOKEN-1")
        .with_status(401)
        .with_body(r#"{"detail":"Given token not valid for any token type"}"#)
        .expect(1)
        .create();
    let refresh = server
        .mock("POST", "/auth/token/refresh/")
        .with_status(200)
        .with_body(r#"{"access":"ACCESS-TOKEN-2","refresh":"REFRESH-TOKEN-2"}"#)
        .expect(1)
        .create();
    let fresh = server
        .mock("POST", "/chat/messages/stream/")
        .match_header("authorization", "Bearer ACCESS-TOKEN-2")
        .with_status(200)
        .with_body("data: Retrieval\n\ndata:  augmented\n\n")
        .expect(1)
        .create();
    let _detail = server
        .mock("GET", "/chat/sessions/4b1d/")
        .match_header("authorization", "Bearer ACCESS-TOKEN-2")
        .with_status(200)
        .with_body(
            r#"{"id":"4b1d","title":"What is RAG?...","messages":[
                {"id":"m1","role":"user","content":"What is RAG?"},
                {"id":"m2","role":"assistant","content":"Retrieval augmented"}
            ]}"#,
        )
        .create();

    let report = runtime
        .block_on(client.pipeline.send(None, "What is RAG?"))
        .expect("accepted");

    assert!(report.is_success(), "unexpected report: {report:?}");
    let conversation = client
        .pipeline
        .store()
        .get(report.conversation)
        .expect("conversation");
    assert_eq!(conversation.messages[1].content, "Retrieval augmented");
    let raw = std::fs::read_to_string(&path).expect("credential file");
    assert!(raw.contains("REFRESH-TOKEN-2"));
    stale.assert();
    refresh.assert();
    fresh.assert();
}

#[test]
fn rejected_renewal_during_a_send_signs_out_but_keeps_the_user_text() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("auth.json");

    let _login = mock_login(&mut server);
    let client = Harness::new(&server.url(), &path);
    runtime
        .block_on(client.auth.login("ada@example.com", "pw"))
        .expect("login");
    let status = client.auth.credentials().subscribe();

    let _stream = server
        .mock("POST", "/chat/messages/stream/")
        .with_status(401)
        .create();
    let _refresh = server
        .mock("POST", "/auth/token/refresh/")
        .with_status(401)
        .with_body(r#"{"detail":"Token is blacklisted","code":"token_not_valid"}"#)
        .create();

    let id = talksense_core::DurableId::from("4b1d");
    let report = runtime
        .block_on(client.pipeline.send(Some(&id), "still there?"))
        .expect("accepted");

    assert_eq!(report.status, MessageStatus::Error);
    assert!(matches!(report.error, Some(ClientError::SessionExpired)));
    assert!(report.forces_logout());
    assert!(!path.exists());
    assert_eq!(*status.borrow(), AuthStatus::SignedOut);

    let conversation = client.pipeline.store().find(&id).expect("conversation");
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[0].content, "still there?");
    assert!(!client.pipeline.store().is_sending(report.conversation));
}
