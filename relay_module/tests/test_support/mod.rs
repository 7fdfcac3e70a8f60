#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use serde_json::{json, Value};

use relay_module::service::RelayConfig;
use relay_module::verify::{compute_line_signature, LINE_SIGNATURE_HEADER};

pub const CHANNEL_SECRET: &str = "test-channel-secret";
pub const DATABASE_ID: &str = "db-123";

/// Relay pointed at a single mock server for LINE and Notion, with the
/// model disabled so analysis is keyword-only.
pub fn relay_config(base_url: &str) -> RelayConfig {
    let mut config = RelayConfig::new(CHANNEL_SECRET, "line-token", "notion-key", DATABASE_ID);
    config.line_api_base_url = base_url.to_string();
    config.notion_api_base_url = base_url.to_string();
    config.max_concurrent_jobs = 2;
    config.queue_capacity = 8;
    config
}

pub fn text_event_body(user_id: &str, text: &str, event_id: &str, reply_token: &str) -> String {
    text_events_body(user_id, &[(text, event_id, reply_token)])
}

/// One webhook carrying a text event per `(text, event_id, reply_token)`.
pub fn text_events_body(user_id: &str, events: &[(&str, &str, &str)]) -> String {
    let events: Vec<Value> = events
        .iter()
        .map(|(text, event_id, reply_token)| {
            json!({
                "type": "message",
                "mode": "active",
                "timestamp": 1_700_000_000_000_i64,
                "webhookEventId": event_id,
                "replyToken": reply_token,
                "source": { "type": "user", "userId": user_id },
                "message": { "type": "text", "id": "468789", "text": text }
            })
        })
        .collect();
    json!({ "destination": "Ubot", "events": events }).to_string()
}

/// Polls until `mock` has seen its expected requests or `timeout` passes.
pub async fn wait_until_matched(mock: &mockito::Mock, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if mock.matched_async().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

pub fn signed_webhook(body: &str) -> Request<Body> {
    let signature =
        compute_line_signature(CHANNEL_SECRET, body.as_bytes()).expect("sign test body");
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header(LINE_SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub fn unsigned_webhook(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(LINE_SIGNATURE_HEADER, signature);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("build request")
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// `GET /v1/databases/{id}` body with a title, a select, a status and a date.
pub fn database_schema() -> Value {
    json!({
        "object": "database",
        "id": DATABASE_ID,
        "properties": {
            "Name": { "id": "title", "type": "title", "title": {} },
            "Priority": { "id": "p", "type": "select", "select": { "options": [
                { "name": "Urgent", "color": "red" },
                { "name": "Important", "color": "orange" },
                { "name": "Normal", "color": "gray" }
            ]}},
            "Status": { "id": "s", "type": "status", "status": { "options": [
                { "name": "Not started" }, { "name": "Done" }
            ]}},
            "Due": { "id": "d", "type": "date", "date": {} },
            "Created": { "id": "c", "type": "date", "date": {} }
        }
    })
}

pub fn created_page(id: &str) -> Value {
    json!({
        "object": "page",
        "id": id,
        "url": format!("https://www.notion.so/{}", id),
        "properties": {}
    })
}

pub fn stored_page(id: &str, title: &str, priority: Option<&str>, due: Option<&str>) -> Value {
    json!({
        "object": "page",
        "id": id,
        "properties": {
            "Name": { "type": "title", "title": [{ "plain_text": title }] },
            "Priority": { "type": "select", "select": priority.map(|name| json!({ "name": name })) },
            "Status": { "type": "status", "status": null },
            "Due": { "type": "date", "date": due.map(|start| json!({ "start": start })) }
        }
    })
}
