use super::{test_runtime, Harness};
use std::io::Write;
use std::time::Duration;
use talksense_core::{ClientError, DurableId, MessageStatus};
use tempfile::TempDir;

fn detail(id: &str, reply: &str) -> String {
    serde_json::json!({
        "id": id,
        "title": "chat",
        "messages": [
            {"id": format!("{id}-u"), "role": "user", "content": "question"},
            {"id": format!("{id}-a"), "role": "assistant", "content": reply}
        ]
    })
    .to_string()
}

#[test]
fn sends_to_different_conversations_proceed_independently() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let client = Harness::new(&server.url(), &dir.path().join("auth.json"));

    let _streams = server
        .mock("POST", "/chat/messages/stream/")
        .with_status(200)
        .with_chunked_body(|out| {
            out.write_all(b"data: par")?;
            std::thread::sleep(Duration::from_millis(50));
            out.write_all(b"tial\n\n")
        })
        .expect(2)
        .create();
    let _first = server
        .mock("GET", "/chat/sessions/a/")
        .with_status(200)
        .with_body(detail("a", "partial"))
        .create();
    let _second = server
        .mock("GET", "/chat/sessions/b/")
        .with_status(200)
        .with_body(detail("b", "partial"))
        .create();

    let (a, b) = (DurableId::from("a"), DurableId::from("b"));
    let (first, second) = runtime.block_on(async {
        tokio::join!(
            client.pipeline.send(Some(&a), "question"),
            client.pipeline.send(Some(&b), "question"),
        )
    });

    for report in [first.expect("first accepted"), second.expect("second accepted")] {
        assert_eq!(report.status, MessageStatus::Completed);
        assert!(!client.pipeline.store().is_sending(report.conversation));
    }
}

#[test]
fn duplicate_send_is_rejected_until_the_first_one_finishes() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let client = Harness::new(&server.url(), &dir.path().join("auth.json"));

    let stream = server
        .mock("POST", "/chat/messages/stream/")
        .with_status(200)
        .with_chunked_body(|out| {
            out.write_all(b"data: slow\n\n")?;
            std::thread::sleep(Duration::from_millis(200));
            out.write_all(b"data:  reply\n\n")
        })
        .expect(2)
        .create();
    let _detail = server
        .mock("GET", "/chat/sessions/s1/")
        .with_status(200)
        .with_body(detail("s1", "slow reply"))
        .create();

    let id = DurableId::from("s1");
    let (first, second) = runtime.block_on(async {
        tokio::join!(client.pipeline.send(Some(&id), "one"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            client.pipeline.send(Some(&id), "two").await
        })
    });

    assert!(first.expect("first accepted").is_success());
    assert!(matches!(second, Err(ClientError::ConversationLockHeld)));

    // The rejected attempt left nothing behind and the lock is free again.
    let third = runtime
        .block_on(client.pipeline.send(Some(&id), "three"))
        .expect("third accepted");
    assert!(third.is_success());
    stream.assert();
}

#[test]
fn active_and_archived_lists_stay_apart() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let client = Harness::new(&server.url(), &dir.path().join("auth.json"));

    let _active = server
        .mock("GET", "/chat/sessions/")
        .with_status(200)
        .with_body(
            r#"{"count":3,"next":null,"previous":null,"results":[
                {"id":"old","title":"Old","updated_at":"2024-05-01T09:00:00Z"},
                {"id":"new","title":"New","updated_at":"2024-05-03T09:00:00Z"},
                {"id":"pinned","title":"Pinned","is_pinned":true,"updated_at":"2024-04-01T09:00:00Z"}
            ]}"#,
        )
        .create();
    let _archived = server
        .mock("GET", "/chat/sessions/archived/")
        .with_status(200)
        .with_body(r#"[{"id":"gone","title":"Gone","is_archived":true}]"#)
        .create();
    let _unarchive = server
        .mock("POST", "/chat/sessions/gone/unarchive/")
        .with_status(200)
        .with_body(r#"{"status":"Session restored"}"#)
        .expect(1)
        .create();

    let active = runtime.block_on(client.pipeline.refresh_list()).expect("list");
    let titles: Vec<&str> = active.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["Pinned", "New", "Old"]);

    let archived = runtime
        .block_on(client.pipeline.refresh_archived())
        .expect("archived");
    assert_eq!(archived.len(), 1);
    assert_eq!(client.pipeline.store().conversations().len(), 3);

    runtime
        .block_on(client.pipeline.unarchive(&DurableId::from("gone")))
        .expect("unarchive");
    assert!(client.pipeline.store().archived().is_empty());
    assert_eq!(client.pipeline.store().conversations().len(), 4);
}

#[test]
fn shared_view_is_read_without_touching_the_store() {
    let runtime = test_runtime();
    let mut server = mockito::Server::new();
    let dir = TempDir::new().expect("temp dir");
    let client = Harness::new(&server.url(), &dir.path().join("auth.json"));

    let _public = server
        .mock("GET", "/chat/sessions/s1/public/")
        .with_status(200)
        .with_body(
            r#"{"id":"s1","title":"Shared","created_at":"2024-05-01T09:00:00Z","messages":[
                {"id":1,"role":"user","content":"hi"},
                {"id":2,"role":"assistant","content":"hello"}
            ]}"#,
        )
        .create();
    let _hidden = server
        .mock("GET", "/chat/sessions/s2/public/")
        .with_status(404)
        .with_body(r#"{"error":"Chat not found or not public"}"#)
        .create();

    let shared = runtime
        .block_on(client.pipeline.public_conversation(&DurableId::from("s1")))
        .expect("shared");
    assert_eq!(shared.messages.len(), 2);
    assert!(client.pipeline.store().conversations().is_empty());

    let err = runtime
        .block_on(client.pipeline.public_conversation(&DurableId::from("s2")))
        .unwrap_err();
    assert_eq!(err.user_message(), "Chat not found or not public");
}
