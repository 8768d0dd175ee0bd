use mockito::Matcher;
use serde_json::{json, Value};
use std::time::Duration;

use camp_mailer::config::{Relay, Supabase};
use camp_mailer::model::{LogStatus, Recipient, SendState};
use camp_mailer::pipeline::send_batch;
use camp_mailer::relay::{MailTransport, RelayClient, TransportError};
use camp_mailer::render::render_message;
use camp_mailer::supabase::{ChildDirectory, DeliveryLog, SupabaseClient};

const SEND_PATH: &str = "/v1/passthrough/users/me/messages/send";

fn recipient(n: usize) -> Recipient {
    Recipient {
        recipient_email: format!("parent{n}@example.com"),
        recipient_name: format!("Parent {n}"),
        subject_names: format!("Child {n}"),
        attachment_url: format!("https://qr.example/{n}.png"),
        recipient_id: Some(format!("child-{n}")),
    }
}

fn relay(base_url: String) -> RelayClient {
    RelayClient::from_config(&Relay {
        secret_key: "sk-test".into(),
        connection_key: "ck-test".into(),
        base_url: Some(base_url),
        action_id: None,
    })
    .unwrap()
}

fn supabase(url: String) -> SupabaseClient {
    SupabaseClient::from_config(&Supabase {
        url,
        anon_key: "anon-123".into(),
    })
    .unwrap()
}

#[tokio::test]
async fn relay_success_returns_json_body() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", SEND_PATH)
        .match_header("x-pica-secret", "sk-test")
        .match_header("x-pica-connection-key", "ck-test")
        .match_body(Matcher::Regex(r#"^\{"raw":"[A-Za-z0-9_-]+"\}$"#.into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"msg-1","threadId":"t-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = relay(server.url());
    let value = client.send(&render_message(&recipient(1))).await.unwrap();
    assert_eq!(value, json!({"id": "msg-1", "threadId": "t-1"}));
    m.assert_async().await;
}

#[tokio::test]
async fn relay_rejection_carries_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", SEND_PATH)
        .with_status(429)
        .with_body("slow down")
        .create_async()
        .await;

    let err = relay(server.url())
        .send(&render_message(&recipient(1)))
        .await
        .unwrap_err();
    match &err {
        TransportError::Status { status, body, .. } => {
            assert_eq!(*status, 429);
            assert_eq!(body, "slow down");
        }
        other => panic!("wrong error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        "Failed to send email: 429 Too Many Requests - slow down"
    );
}

#[tokio::test]
async fn relay_empty_success_body_is_null() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", SEND_PATH)
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let value = relay(server.url())
        .send(&render_message(&recipient(1)))
        .await
        .unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn relay_non_json_success_body_is_a_decode_error() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", SEND_PATH)
        .with_status(200)
        .with_body("<html>ok</html>")
        .create_async()
        .await;

    let err = relay(server.url())
        .send(&render_message(&recipient(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)), "got {err}");
}

#[tokio::test]
async fn relay_unreachable_is_a_network_error() {
    // Nothing listens on port 1.
    let err = relay("http://127.0.0.1:1".into())
        .send(&render_message(&recipient(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Network(_)), "got {err}");
}

#[tokio::test]
async fn email_log_posts_row() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("POST", "/rest/v1/email_logs")
        .match_header("apikey", "anon-123")
        .match_header("prefer", "return=minimal")
        .match_body(Matcher::PartialJson(json!({
            "child_id": "child-1",
            "parent_email": "parent1@example.com",
            "status": "failed",
            "error_message": "boom",
            "email_type": "qr_code",
            "sent_at": null
        })))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    supabase(server.url())
        .log_email("child-1", "parent1@example.com", LogStatus::Failed, Some("boom"))
        .await
        .unwrap();
    m.assert_async().await;
}

#[tokio::test]
async fn email_log_failure_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/rest/v1/email_logs")
        .with_status(500)
        .with_body("relation does not exist")
        .create_async()
        .await;

    let err = supabase(server.url())
        .log_email("child-1", "parent1@example.com", LogStatus::Sent, None)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("500"), "{msg}");
    assert!(msg.contains("relation does not exist"), "{msg}");
}

#[tokio::test]
async fn batch_survives_relay_rejection_and_log_outage() {
    let mut relay_server = mockito::Server::new_async().await;
    let _rejected = relay_server
        .mock("POST", SEND_PATH)
        .with_status(429)
        .with_body("slow down")
        .expect(3)
        .create_async()
        .await;
    let mut db_server = mockito::Server::new_async().await;
    let log = db_server
        .mock("POST", "/rest/v1/email_logs")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let transport = relay(relay_server.url());
    let delivery_log = supabase(db_server.url());
    let batch = vec![recipient(1), recipient(2), recipient(3)];
    let statuses = send_batch(
        &batch,
        &transport,
        Some(&delivery_log as &dyn DeliveryLog),
        Duration::ZERO,
        |_| {},
    )
    .await;

    assert_eq!(statuses.len(), 3);
    for status in &statuses {
        assert_eq!(status.state, SendState::Error);
        assert_eq!(
            status.error.as_deref(),
            Some("Failed to send email: 429 Too Many Requests - slow down")
        );
    }
    log.assert_async().await;
}

#[tokio::test]
async fn children_and_parent_lookups() {
    let mut server = mockito::Server::new_async().await;
    let _children = server
        .mock("GET", "/rest/v1/children")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("select".into(), "*,parent:parents(*)".into()),
            Matcher::UrlEncoded("order".into(), "name.asc".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"id":"c1","name":"Ada","qr_code_url":"https://q/1","parent_id":"p1",
                 "parent":{"id":"p1","name":"Mary","email":"mary@x.com"}},
                {"id":"c2","name":"Tobi","qr_code_url":"not a url","parent_id":"p2",
                 "parent":{"id":"p2","name":"Sam","email":"sam@x.com"}}
            ]"#,
        )
        .create_async()
        .await;
    let _parent = server
        .mock("GET", "/rest/v1/parents")
        .match_query(Matcher::UrlEncoded("id".into(), "eq.p1".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"p1","name":"Mary","email":"mary@x.com","church":"Rhema"}]"#)
        .create_async()
        .await;

    let client = supabase(server.url());
    let children = client.children_with_parents(None).await.unwrap();
    let recipients: Vec<Recipient> = children.iter().filter_map(Recipient::from_child).collect();
    assert_eq!(children.len(), 2);
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].recipient_email, "mary@x.com");

    let parent = client.parent_by_id("p1").await.unwrap().unwrap();
    assert_eq!(parent.name, "Mary");
    assert_eq!(parent.church.as_deref(), Some("Rhema"));
}

#[tokio::test]
async fn directory_error_carries_status_and_body() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/rest/v1/children")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"message":"Invalid API key"}"#)
        .create_async()
        .await;

    let err = supabase(server.url())
        .children_with_parents(Some("Ada"))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("Failed to fetch children: 401"), "{msg}");
    assert!(msg.contains("Invalid API key"), "{msg}");
}
