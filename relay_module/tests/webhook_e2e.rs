mod test_support;

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mockito::{Matcher, Server};
use serde_json::json;
use tower::util::ServiceExt;

use relay_module::service::build_relay;

use test_support::{
    created_page, database_schema, json_body, relay_config, signed_webhook, stored_page,
    text_event_body, text_events_body, unsigned_webhook, wait_until_matched, DATABASE_ID,
};

#[tokio::test]
async fn missing_signature_is_bad_request() {
    let server = Server::new_async().await;
    let relay = build_relay(&relay_config(&server.url()));

    let body = text_event_body("U123", "hello", "evt-1", "reply-1");
    let response = relay
        .router
        .clone()
        .oneshot(unsigned_webhook(&body, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["status"], "missing_signature");
    assert!(relay.dedup.is_empty());
    relay.ingestion.stop_and_join().await;
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_side_effects() {
    let mut server = Server::new_async().await;
    let line_reply = server
        .mock("POST", "/v2/bot/message/reply")
        .expect(0)
        .create_async()
        .await;
    let notion = server
        .mock("GET", Matcher::Regex(r"^/v1/".to_string()))
        .expect(0)
        .create_async()
        .await;
    let relay = build_relay(&relay_config(&server.url()));

    let body = text_event_body("U123", "hello", "evt-1", "reply-1");
    let response = relay
        .router
        .clone()
        .oneshot(unsigned_webhook(&body, Some("bm90LXRoZS1yaWdodC1zaWduYXR1cmU=")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["status"], "invalid_signature");
    assert!(relay.dedup.is_empty());
    relay.ingestion.stop_and_join().await;
    line_reply.assert_async().await;
    notion.assert_async().await;
}

#[tokio::test]
async fn probes_and_malformed_bodies() {
    let server = Server::new_async().await;
    let relay = build_relay(&relay_config(&server.url()));

    for probe in ["", "  \n", r#"{"destination":"Ubot","events":[]}"#] {
        let response = relay
            .router
            .clone()
            .oneshot(unsigned_webhook(probe, Some("anything")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "probe {:?}", probe);
    }

    let response = relay
        .router
        .clone()
        .oneshot(unsigned_webhook("{not json", Some("anything")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["status"], "bad_json");

    relay.ingestion.stop_and_join().await;
}

#[tokio::test]
async fn text_message_is_acknowledged_written_and_summarized() {
    let mut server = Server::new_async().await;
    let ack = server
        .mock("POST", "/v2/bot/message/reply")
        .match_header("authorization", "Bearer line-token")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({ "replyToken": "reply-1" })),
            Matcher::Regex("Analyzing".to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let schema = server
        .mock("GET", format!("/v1/databases/{}", DATABASE_ID).as_str())
        .match_header("authorization", "Bearer notion-key")
        .match_header("notion-version", "2022-06-28")
        .with_status(200)
        .with_body(database_schema().to_string())
        .expect(1)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/pages")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "parent": { "database_id": DATABASE_ID },
                "properties": {
                    "Priority": { "select": { "name": "Urgent" } },
                    "Due": { "date": { "start": "2025-09-01" } }
                }
            })),
            Matcher::Regex("Draft Q3 marketing plan, urgent".to_string()),
        ]))
        .with_status(200)
        .with_body(created_page("page-1").to_string())
        .expect(1)
        .create_async()
        .await;
    let read_back = server
        .mock("GET", "/v1/pages/page-1")
        .with_status(200)
        .with_body(
            stored_page(
                "page-1",
                "Draft Q3 marketing plan, urgent, due 2025-09-01",
                Some("Urgent"),
                Some("2025-09-01"),
            )
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let summary = server
        .mock("POST", "/v2/bot/message/push")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({ "to": "U123" })),
            Matcher::Regex("Priority: Urgent".to_string()),
            Matcher::Regex("Due: 2025-09-01".to_string()),
            Matcher::Regex(r"Status: \(empty\)".to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let relay = build_relay(&relay_config(&server.url()));
    let body = text_event_body(
        "U123",
        "Draft Q3 marketing plan, urgent, due 2025-09-01",
        "evt-1",
        "reply-1",
    );
    let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "accepted");

    relay.ingestion.stop_and_join().await;
    ack.assert_async().await;
    schema.assert_async().await;
    create.assert_async().await;
    read_back.assert_async().await;
    summary.assert_async().await;
    assert_eq!(relay.dedup.len(), 2);
}

#[tokio::test]
async fn redelivery_gets_one_already_processed_reply() {
    let mut server = Server::new_async().await;
    let ack = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::Regex("Analyzing".to_string()))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let duplicate = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::Regex("already processed".to_string()))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _schema = server
        .mock("GET", format!("/v1/databases/{}", DATABASE_ID).as_str())
        .with_status(200)
        .with_body(database_schema().to_string())
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/pages")
        .with_status(200)
        .with_body(created_page("page-1").to_string())
        .expect(1)
        .create_async()
        .await;
    let _read_back = server
        .mock("GET", "/v1/pages/page-1")
        .with_status(200)
        .with_body(stored_page("page-1", "memo", None, None).to_string())
        .create_async()
        .await;
    let _push = server
        .mock("POST", "/v2/bot/message/push")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let relay = build_relay(&relay_config(&server.url()));
    let body = text_event_body("U123", "memo: call the printer", "evt-1", "reply-1");
    for _ in 0..2 {
        let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    relay.ingestion.stop_and_join().await;
    ack.assert_async().await;
    duplicate.assert_async().await;
    create.assert_async().await;
}

#[tokio::test]
async fn failed_write_releases_keys_and_pushes_error() {
    let mut server = Server::new_async().await;
    let _ack = server
        .mock("POST", "/v2/bot/message/reply")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let _schema = server
        .mock("GET", format!("/v1/databases/{}", DATABASE_ID).as_str())
        .with_status(200)
        .with_body(database_schema().to_string())
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/pages")
        .with_status(500)
        .with_body(
            json!({
                "object": "error",
                "status": 500,
                "code": "internal_server_error",
                "message": "Something went wrong"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let failure = server
        .mock("POST", "/v2/bot/message/push")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({ "to": "U123" })),
            Matcher::Regex("Saving to Notion failed".to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let relay = build_relay(&relay_config(&server.url()));
    let body = text_event_body("U123", "Book venue", "evt-9", "reply-9");
    let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    relay.ingestion.stop_and_join().await;
    create.assert_async().await;
    failure.assert_async().await;
    assert!(relay.dedup.is_empty());
}

#[tokio::test]
async fn failed_acknowledgement_stops_job_and_releases_keys() {
    let mut server = Server::new_async().await;
    let _ack = server
        .mock("POST", "/v2/bot/message/reply")
        .with_status(400)
        .with_body(r#"{"message":"Invalid reply token"}"#)
        .create_async()
        .await;
    let notion = server
        .mock("GET", Matcher::Regex(r"^/v1/".to_string()))
        .expect(0)
        .create_async()
        .await;

    let relay = build_relay(&relay_config(&server.url()));
    let body = text_event_body("U123", "Book venue", "evt-2", "expired");
    let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    relay.ingestion.stop_and_join().await;
    notion.assert_async().await;
    assert!(relay.dedup.is_empty());
}

#[tokio::test]
async fn acknowledgements_are_not_held_behind_running_jobs() {
    let mut server = Server::new_async().await;
    let acks = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::Regex("Analyzing".to_string()))
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;
    let _schema = server
        .mock("GET", format!("/v1/databases/{}", DATABASE_ID).as_str())
        .with_status(200)
        .with_chunked_body(|w| {
            thread::sleep(Duration::from_secs(2));
            w.write_all(database_schema().to_string().as_bytes())
        })
        .create_async()
        .await;
    let _create = server
        .mock("POST", "/v1/pages")
        .with_status(200)
        .with_body(created_page("page-1").to_string())
        .create_async()
        .await;
    let _read_back = server
        .mock("GET", "/v1/pages/page-1")
        .with_status(200)
        .with_body(stored_page("page-1", "memo", None, None).to_string())
        .create_async()
        .await;
    let _push = server
        .mock("POST", "/v2/bot/message/push")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut config = relay_config(&server.url());
    config.max_concurrent_jobs = 1;
    let relay = build_relay(&config);

    let started = Instant::now();
    for (text, event_id, token) in [
        ("Book venue", "evt-1", "reply-1"),
        ("Order catering", "evt-2", "reply-2"),
    ] {
        let body = text_event_body("U123", text, event_id, token);
        let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(
        wait_until_matched(&acks, Duration::from_secs(1)).await,
        "second acknowledgement waited {:?}",
        started.elapsed()
    );
    relay.ingestion.stop_and_join().await;
}

#[tokio::test]
async fn full_queue_releases_keys_and_replies_busy() {
    let mut server = Server::new_async().await;
    let _ack = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::Regex("Analyzing".to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let busy = server
        .mock("POST", "/v2/bot/message/reply")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({ "replyToken": "reply-2" })),
            Matcher::Regex("busy".to_string()),
        ]))
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;
    let _schema = server
        .mock("GET", format!("/v1/databases/{}", DATABASE_ID).as_str())
        .with_status(200)
        .with_body(database_schema().to_string())
        .create_async()
        .await;
    let create = server
        .mock("POST", "/v1/pages")
        .with_status(200)
        .with_body(created_page("page-1").to_string())
        .expect(1)
        .create_async()
        .await;
    let _read_back = server
        .mock("GET", "/v1/pages/page-1")
        .with_status(200)
        .with_body(stored_page("page-1", "Book venue", None, None).to_string())
        .create_async()
        .await;
    let _push = server
        .mock("POST", "/v2/bot/message/push")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let mut config = relay_config(&server.url());
    config.queue_capacity = 1;
    let relay = build_relay(&config);

    let body = text_events_body(
        "U123",
        &[("Book venue", "evt-1", "reply-1"), ("Order catering", "evt-2", "reply-2")],
    );
    let response = relay.router.clone().oneshot(signed_webhook(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "accepted");
    // Only the queued event keeps its keys.
    assert_eq!(relay.dedup.len(), 2);

    assert!(wait_until_matched(&busy, Duration::from_secs(2)).await);
    relay.ingestion.stop_and_join().await;
    create.assert_async().await;
    assert_eq!(relay.dedup.len(), 2);
}

#[tokio::test]
async fn health_reports_services_and_clear_cache_empties_store() {
    let server = Server::new_async().await;
    let relay = build_relay(&relay_config(&server.url()));
    relay.dedup.try_mark(&["event:a".to_string(), "event:b".to_string()]);

    let response = relay
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["services"]["analysis_provider"], "disabled");
    assert_eq!(health["services"]["notion"], "configured");
    assert_eq!(health["services"]["ingestion_queue"]["capacity"], 8);
    assert_eq!(health["analysis"]["rate_limit"]["requests_this_minute"], 0);
    assert_eq!(health["cache"]["processed_events"], 2);
    assert!(health["version"].is_string());

    let response = relay
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/clear-cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let cleared = json_body(response).await;
    assert_eq!(cleared["previous_size"], 2);
    assert_eq!(cleared["current_size"], 0);
    assert!(relay.dedup.is_empty());

    relay.ingestion.stop_and_join().await;
}
