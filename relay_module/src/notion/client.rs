use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_NOTION_API_BASE_URL: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum NotionError {
    #[error("Notion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Notion API returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected Notion response: {0}")]
    Parse(String),
    #[error("database has no title property")]
    MissingTitleProperty,
}

impl NotionError {
    /// The record was rejected for its contents rather than for access or
    /// availability.
    pub fn is_validation(&self) -> bool {
        matches!(self, NotionError::Api { status: 400, code, .. } if code == "validation_error")
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, NotionError::Api { status: 429, .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NotionError::Http(err) if err.is_timeout())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Thin JSON client for the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionClient {
    api_key: String,
    api_base_url: String,
    client: Client,
}

impl NotionClient {
    pub fn new(api_key: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_key: api_key.into(),
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base_url, path)
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<Value, NotionError> {
        let request = self.client.get(self.url(&format!("databases/{}", database_id)));
        self.send(request).await
    }

    pub async fn create_page(&self, body: &Value) -> Result<Value, NotionError> {
        let request = self.client.post(self.url("pages")).json(body);
        self.send(request).await
    }

    pub async fn retrieve_page(&self, page_id: &str) -> Result<Value, NotionError> {
        let request = self.client.get(self.url(&format!("pages/{}", page_id)));
        self.send(request).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, NotionError> {
        let response = request
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let error: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
            debug!("Notion error body: {}", body);
            return Err(NotionError::Api {
                status: status.as_u16(),
                code: error.code,
                message: if error.message.is_empty() { body } else { error.message },
            });
        }
        serde_json::from_str(&body).map_err(|err| NotionError::Parse(err.to_string()))
    }
}
