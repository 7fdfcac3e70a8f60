use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

pub const DEFAULT_LINE_API_BASE_URL: &str = "https://api.line.me";

/// LINE rejects text messages longer than this many characters.
const MAX_TEXT_CHARS: usize = 5000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SendMessageError {
    #[error("LINE request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LINE API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// A `{ "type": "text", "text": ... }` message object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextMessage {
    pub fn new(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            text: truncate_chars(text, MAX_TEXT_CHARS),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage>,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<TextMessage>,
}

/// Client for the reply and push endpoints of the LINE Messaging API.
#[derive(Debug, Clone)]
pub struct LineMessagingClient {
    channel_access_token: String,
    api_base_url: String,
    client: Client,
}

impl LineMessagingClient {
    pub fn new(channel_access_token: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            channel_access_token: channel_access_token.into(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Sends a reply using a single-use reply token. The token is consumed by
    /// LINE even when the call fails, so callers must not retry with it.
    pub async fn reply_text(&self, reply_token: &str, text: &str) -> Result<(), SendMessageError> {
        let request = ReplyRequest {
            reply_token,
            messages: vec![TextMessage::new(text)],
        };
        self.post("/v2/bot/message/reply", &request).await
    }

    /// Sends a push message to a user id.
    pub async fn push_text(&self, user_id: &str, text: &str) -> Result<(), SendMessageError> {
        let request = PushRequest {
            to: user_id,
            messages: vec![TextMessage::new(text)],
        };
        self.post("/v2/bot/message/push", &request).await
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), SendMessageError> {
        let url = format!("{}{}", self.api_base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.channel_access_token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SendMessageError::Api { status, body });
        }
        Ok(())
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
