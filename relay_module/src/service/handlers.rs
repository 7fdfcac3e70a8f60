use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::dedup::derive_dedup_keys;
use crate::line_event::{InboundEvent, LineWebhookBody};
use crate::verify::{signature_header, verify_line_signature};

use super::ingestion::IngestionJob;
use super::state::AppState;

fn configured(flag: bool) -> &'static str {
    if flag {
        "configured"
    } else {
        "missing"
    }
}

pub(super) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let analysis = &state.pipeline.analysis;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339(),
            "services": {
                "analysis_model": analysis.model(),
                "analysis_provider": analysis.provider().as_str(),
                "notion": configured(state.notion_configured),
                "line": configured(state.line_configured),
                "ingestion_queue": {
                    "capacity": state.jobs.capacity(),
                    "available": state.jobs.available(),
                },
            },
            "analysis": {
                "rate_limit": analysis.rate_limit_status(),
            },
            "cache": {
                "processed_events": state.dedup().len(),
            },
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

pub(super) async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let previous_size = state.dedup().clear();
    info!("dedup cache cleared ({} entries)", previous_size);
    (
        StatusCode::OK,
        Json(json!({
            "message": "dedup cache cleared",
            "previous_size": previous_size,
            "current_size": state.dedup().len(),
        })),
    )
}

pub(super) async fn line_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(signature) = signature_header(&headers) else {
        warn!("webhook rejected: missing signature header");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "missing_signature"})),
        );
    };

    // Console "verify" probes send an empty body or no events.
    if body.iter().all(u8::is_ascii_whitespace) {
        return (StatusCode::OK, Json(json!({"status": "ok"})));
    }

    let payload: LineWebhookBody = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"}))),
    };
    if payload.is_probe() {
        return (StatusCode::OK, Json(json!({"status": "ok"})));
    }

    if let Err(reason) = verify_line_signature(&state.channel_secret, &body, Some(signature)) {
        warn!("webhook rejected: {}", reason);
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let events = payload.text_events();
    info!(
        "webhook accepted: {} events, {} text",
        payload.events.len(),
        events.len()
    );
    for event in events {
        dispatch_event(&state, event);
    }
    (StatusCode::OK, Json(json!({"status": "accepted"})))
}

fn dispatch_event(state: &AppState, event: InboundEvent) {
    let dedup_keys = derive_dedup_keys(state.key_strategy, &event);
    if !state.dedup().try_mark(&dedup_keys) {
        info!("duplicate event from {} suppressed", event.source_user_id);
        if state
            .jobs
            .try_submit(IngestionJob::DuplicateNotice { event })
            .is_err()
        {
            warn!("ingestion queue unavailable; duplicate notice dropped");
        }
        return;
    }

    let job = IngestionJob::Process {
        event,
        dedup_keys,
    };
    if let Err(job) = state.jobs.try_submit(job) {
        let IngestionJob::Process { event, dedup_keys } = job else {
            return;
        };
        warn!(
            "ingestion queue unavailable; rejecting event from {}",
            event.source_user_id
        );
        state.dedup().release(&dedup_keys);
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            pipeline.reply_unavailable(&event).await;
        });
    }
}
