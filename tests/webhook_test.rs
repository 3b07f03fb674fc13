//! Webhook notifier against a local mock endpoint

use mockito::{Matcher, Server};
use std::time::Duration;

use kodegen_tools_pagewatch::error::NotifyError;
use kodegen_tools_pagewatch::{Notifier, RawItem, TargetId, WebhookNotifier};

fn notifier(server: &Server) -> WebhookNotifier {
    let url = url::Url::parse(&format!("{}/hook", server.url())).expect("mock url");
    WebhookNotifier::new(url, Duration::from_secs(5)).expect("http client")
}

#[tokio::test]
async fn test_posts_item_document() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "target": "forum-7",
            "item": { "key": "42", "title": "hello" }
        })))
        .with_status(204)
        .create_async()
        .await;

    let result = notifier(&server)
        .send(&TargetId::new("forum-7"), &RawItem::with_key("42").title("hello"))
        .await;
    assert!(result.is_ok(), "{result:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_posts_summary_document() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .match_body(Matcher::PartialJson(serde_json::json!({ "target": "forum-7" })))
        .with_status(200)
        .create_async()
        .await;

    let items = vec![RawItem::with_key("1"), RawItem::with_key("2")];
    notifier(&server)
        .send_summary(&TargetId::new("forum-7"), &items)
        .await
        .expect("digest accepted");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_too_many_requests_maps_to_rate_limited() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(429)
        .with_header("retry-after", "7")
        .create_async()
        .await;

    let result = notifier(&server)
        .send(&TargetId::new("forum-7"), &RawItem::with_key("1"))
        .await;
    match result {
        Err(NotifyError::RateLimited { retry_after }) => assert_eq!(retry_after, Some(Duration::from_secs(7))),
        other => panic!("expected rate limited, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_other_errors_are_rejections_with_truncated_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(400)
        .with_body("x".repeat(2000))
        .create_async()
        .await;

    let result = notifier(&server)
        .send(&TargetId::new("forum-7"), &RawItem::with_key("1"))
        .await;
    match result {
        Err(NotifyError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert_eq!(body.len(), 512);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_errors_are_retryable() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(503)
        .with_body("maintenance")
        .expect(2)
        .create_async()
        .await;

    let notifier = notifier(&server);
    for _ in 0..2 {
        match notifier.send(&TargetId::new("forum-7"), &RawItem::with_key("1")).await {
            Err(NotifyError::Unavailable { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected an unavailable endpoint, got {other:?}"),
        }
    }
    mock.assert_async().await;
}
