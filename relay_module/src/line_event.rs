//! LINE Messaging API webhook payloads.
//!
//! Only text messages from a user with a stable id become [`InboundEvent`]s;
//! everything else in a delivery (follows, stickers, images, postbacks) is
//! dropped during parsing.

use serde::Deserialize;
use tracing::debug;

use crate::analysis::fallback::message_title;

/// One text message event, consumed once by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub source_user_id: String,
    pub message_text: String,
    /// `webhookEventId`; absent on some redeliveries and older payloads.
    pub event_id: Option<String>,
    /// Single-use and short-lived. Consumed by the first reply.
    pub reply_token: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl InboundEvent {
    /// First non-empty line, used as the record title.
    pub fn title(&self) -> &str {
        message_title(&self.message_text)
    }
}

/// Top-level webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct LineWebhookBody {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<LineWebhookEvent>,
}

impl LineWebhookBody {
    pub fn is_probe(&self) -> bool {
        self.events.is_empty()
    }

    pub fn text_events(&self) -> Vec<InboundEvent> {
        self.events
            .iter()
            .filter_map(|event| match event.to_inbound() {
                Some(inbound) => Some(inbound),
                None => {
                    debug!(
                        "ignoring LINE event type={} message_type={:?}",
                        event.event_type,
                        event.message.as_ref().map(|message| message.message_type.as_str())
                    );
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub message: Option<LineMessage>,
    #[serde(default)]
    pub source: Option<LineSource>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
}

impl LineWebhookEvent {
    pub fn to_inbound(&self) -> Option<InboundEvent> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        let text = message.text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        let user_id = self
            .source
            .as_ref()
            .and_then(|source| source.user_id.clone())
            .filter(|value| !value.trim().is_empty())?;

        Some(InboundEvent {
            source_user_id: user_id,
            message_text: text.to_string(),
            event_id: self
                .webhook_event_id
                .clone()
                .filter(|value| !value.trim().is_empty()),
            reply_token: self
                .reply_token
                .clone()
                .filter(|value| !value.trim().is_empty()),
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(payload: &str) -> LineWebhookBody {
        serde_json::from_str(payload).unwrap()
    }

    #[test]
    fn parse_text_message() {
        let body = parse(
            r#"{
                "destination": "Ubot",
                "events": [{
                    "type": "message",
                    "message": {"type": "text", "id": "1", "text": "  Draft Q3 plan\nwith budget  "},
                    "source": {"type": "user", "userId": "U123"},
                    "replyToken": "reply-1",
                    "timestamp": 1700000000000,
                    "webhookEventId": "01HEVENT"
                }]
            }"#,
        );

        let events = body.text_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.source_user_id, "U123");
        assert_eq!(event.message_text, "Draft Q3 plan\nwith budget");
        assert_eq!(event.event_id.as_deref(), Some("01HEVENT"));
        assert_eq!(event.reply_token.as_deref(), Some("reply-1"));
        assert_eq!(event.title(), "Draft Q3 plan");
    }

    #[test]
    fn ignore_non_text_and_blank_messages() {
        let body = parse(
            r#"{
                "events": [
                    {"type": "follow", "source": {"type": "user", "userId": "U1"}, "timestamp": 1},
                    {"type": "message", "message": {"type": "sticker", "id": "2"},
                     "source": {"type": "user", "userId": "U1"}, "timestamp": 2},
                    {"type": "message", "message": {"type": "text", "id": "3", "text": "   "},
                     "source": {"type": "user", "userId": "U1"}, "timestamp": 3}
                ]
            }"#,
        );
        assert!(!body.is_probe());
        assert!(body.text_events().is_empty());
    }

    #[test]
    fn ignore_events_without_user_id() {
        let body = parse(
            r#"{"events": [{"type": "message", "message": {"type": "text", "text": "hi"},
                "source": {"type": "group", "groupId": "G1"}, "timestamp": 1}]}"#,
        );
        assert!(body.text_events().is_empty());
    }

    #[test]
    fn empty_events_is_probe() {
        assert!(parse(r#"{"destination": "U", "events": []}"#).is_probe());
        assert!(parse(r#"{}"#).is_probe());
    }

    #[test]
    fn title_skips_leading_blank_lines() {
        let event = InboundEvent {
            source_user_id: "U".to_string(),
            message_text: "\n  Only a title\nmore".to_string(),
            event_id: None,
            reply_token: None,
            timestamp: 0,
        };
        assert_eq!(event.title(), "Only a title");
    }
}
