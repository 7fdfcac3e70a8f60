//! Language-model analysis of inbound messages.
//!
//! Providers:
//! - Gemini `generateContent` when `GEMINI_API_KEY` is set (preferred)
//! - OpenAI-compatible chat completions when `OPENAI_API_KEY` is set
//! - neither: every message goes through the keyword fallback
//!
//! [`AnalysisClient::analyze`] never fails. Rate limiting, timeouts, upstream
//! errors and malformed responses all degrade to the keyword fallback.

use std::time::Duration;

use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analysis::fallback::{extract_urls, fallback_analysis, message_title};
use crate::analysis::rate_limit::{
    RateLimitStatus, RateLimiter, DEFAULT_REQUESTS_PER_DAY, DEFAULT_REQUESTS_PER_MINUTE,
};
use crate::analysis::template::{append_links, system_prompt, task_breakdown, user_prompt};
use crate::analysis::types::{
    parse_strict_date, AnalysisResult, AnalysisSource, FallbackReason, FieldKind, FieldValue,
    LogicalField,
};
use crate::vocabulary::{default_rules, KeywordRule, Vocabulary};

pub const DEFAULT_GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisProvider {
    Gemini,
    OpenAi,
    Disabled,
}

impl AnalysisProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisProvider::Gemini => "gemini",
            AnalysisProvider::OpenAi => "openai",
            AnalysisProvider::Disabled => "disabled",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            AnalysisProvider::OpenAi => DEFAULT_OPENAI_MODEL,
            AnalysisProvider::Gemini | AnalysisProvider::Disabled => DEFAULT_GEMINI_MODEL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub provider: AnalysisProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub gemini_base_url: String,
    pub openai_url: String,
    pub timeout: Duration,
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl AnalysisConfig {
    /// Picks the provider from whichever key is present, Gemini first.
    pub fn from_keys(gemini_api_key: Option<String>, openai_api_key: Option<String>) -> Self {
        let (provider, api_key) = match (gemini_api_key, openai_api_key) {
            (Some(key), _) => (AnalysisProvider::Gemini, Some(key)),
            (None, Some(key)) => (AnalysisProvider::OpenAi, Some(key)),
            (None, None) => (AnalysisProvider::Disabled, None),
        };
        Self {
            provider,
            api_key,
            model: provider.default_model().to_string(),
            ..Self::default()
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: AnalysisProvider::Disabled,
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_API_BASE_URL.to_string(),
            openai_url: DEFAULT_OPENAI_URL.to_string(),
            timeout: DEFAULT_ANALYSIS_TIMEOUT,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("local rate limit reached")]
    RateLimited,
    #[error("model request timed out")]
    Timeout,
    #[error("model request failed: {0}")]
    Http(reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("unusable model response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AnalysisError::Timeout
        } else {
            AnalysisError::Http(err)
        }
    }
}

impl AnalysisError {
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            AnalysisError::RateLimited => FallbackReason::RateLimited,
            AnalysisError::Upstream { status: 429, .. } => FallbackReason::RateLimited,
            AnalysisError::Timeout => FallbackReason::Timeout,
            AnalysisError::Http(_) | AnalysisError::Upstream { .. } => FallbackReason::UpstreamError,
            AnalysisError::Parse(_) => FallbackReason::MalformedResponse,
        }
    }
}

pub struct AnalysisClient {
    config: AnalysisConfig,
    vocabulary: Vocabulary,
    rules: Vec<KeywordRule>,
    limiter: RateLimiter,
    client: Client,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig, vocabulary: Vocabulary, rules: Vec<KeywordRule>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        let limiter = RateLimiter::new(config.requests_per_minute, config.requests_per_day);
        let rules = vocabulary.retain_valid_rules(rules);

        match config.provider {
            AnalysisProvider::Disabled => {
                info!("analysis model disabled (no API key); using keyword rules only")
            }
            provider => info!(
                "analysis client initialized: provider={}, model={}, timeout={:?}, rpm={}, rpd={}",
                provider.as_str(),
                config.model,
                config.timeout,
                config.requests_per_minute,
                config.requests_per_day
            ),
        }

        Self {
            config,
            vocabulary,
            rules,
            limiter,
            client,
        }
    }

    /// Keyword-only client with the built-in vocabulary.
    pub fn disabled() -> Self {
        Self::new(AnalysisConfig::default(), Vocabulary::default(), default_rules())
    }

    pub fn provider(&self) -> AnalysisProvider {
        self.config.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    pub async fn analyze(&self, text: &str) -> AnalysisResult {
        let today = Local::now().date_naive();
        let reason = match self.config.provider {
            AnalysisProvider::Disabled => FallbackReason::ModelDisabled,
            _ => match self.request_model(text, today).await {
                Ok(result) => return result,
                Err(err) => {
                    warn!("analysis model unavailable, using keyword rules: {}", err);
                    err.fallback_reason()
                }
            },
        };
        fallback_analysis(text, &self.vocabulary, &self.rules, today, reason)
    }

    async fn request_model(
        &self,
        text: &str,
        today: NaiveDate,
    ) -> Result<AnalysisResult, AnalysisError> {
        if !self.limiter.try_acquire() {
            return Err(AnalysisError::RateLimited);
        }
        let urls = extract_urls(text);
        let system = system_prompt(&self.vocabulary);
        let user = user_prompt(text, &urls, &today.format("%Y-%m-%d").to_string());

        let raw = match self.config.provider {
            AnalysisProvider::Gemini => self.call_gemini(&system, &user).await?,
            AnalysisProvider::OpenAi => self.call_openai(&system, &user).await?,
            AnalysisProvider::Disabled => {
                return Err(AnalysisError::Parse("model disabled".to_string()))
            }
        };
        debug!("analysis model response: {} chars", raw.len());
        parse_model_response(&raw, text, &self.vocabulary)
    }

    async fn call_gemini(&self, system: &str, user: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.gemini_base_url.trim_end_matches('/'),
            self.config.model
        );
        let request = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.3,
                response_mime_type: "application/json".to_string(),
            },
        };

        debug!("calling Gemini model {}", self.config.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_deref().unwrap_or_default())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream { status, body });
        }

        let parsed: GeminiResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn call_openai(&self, system: &str, user: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/chat/completions",
            self.config.openai_url.trim_end_matches('/')
        );
        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                OpenAIChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OpenAIChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            response_format: OpenAIResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        debug!("calling OpenAI model {}", self.config.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.as_deref().unwrap_or_default())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream { status, body });
        }

        let parsed: OpenAIChatResponse = response.json().await?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// Strips Markdown code fences and any prose around the outermost `{...}`.
pub fn clean_json_response(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Validates a model reply into an [`AnalysisResult`]. Labels outside the
/// vocabulary and dates not in `YYYY-MM-DD` form become `Null`.
pub fn parse_model_response(
    raw: &str,
    text: &str,
    vocabulary: &Vocabulary,
) -> Result<AnalysisResult, AnalysisError> {
    let json = clean_json_response(raw)
        .ok_or_else(|| AnalysisError::Parse("no JSON object in response".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|err| AnalysisError::Parse(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| AnalysisError::Parse("response is not an object".to_string()))?;

    let title = message_title(text);
    let mut result = AnalysisResult::empty(title, AnalysisSource::Model);

    if let Some(properties) = object.get("properties").and_then(Value::as_object) {
        for (key, raw_value) in properties {
            let Some(field) = LogicalField::from_json_key(key) else {
                debug!("ignoring unknown model field {}", key);
                continue;
            };
            if field == LogicalField::Status {
                continue;
            }
            let value = validate_field(field, raw_value, vocabulary);
            if value.is_null() && !raw_value.is_null() {
                debug!("model value for {} rejected: {}", field, raw_value);
            }
            result.set(field, value);
        }
    }

    if let Some(status) = vocabulary.default_status_label() {
        result.set(LogicalField::Status, FieldValue::Label(status.to_string()));
    }

    let mut content = object
        .get("pageContent")
        .or_else(|| object.get("page_content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| task_breakdown(title, text));
    let missing_links: Vec<String> = extract_urls(text)
        .into_iter()
        .filter(|url| !content.contains(url.as_str()))
        .collect();
    append_links(&mut content, &missing_links);
    result.page_content = content;

    Ok(result)
}

fn validate_field(field: LogicalField, value: &Value, vocabulary: &Vocabulary) -> FieldValue {
    let text = match value {
        Value::String(text) => text.as_str(),
        Value::Array(items) => match items.iter().find_map(Value::as_str) {
            Some(first) => first,
            None => return FieldValue::Null,
        },
        _ => return FieldValue::Null,
    };
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return FieldValue::Null;
    }
    match field.kind() {
        FieldKind::Enumerated => vocabulary
            .canonical_label(field, text)
            .map(|label| FieldValue::Label(label.to_string()))
            .unwrap_or_default(),
        FieldKind::Text => FieldValue::Text(text.to_string()),
        FieldKind::Date => parse_strict_date(text)
            .map(FieldValue::Date)
            .unwrap_or_default(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIChatMessage>,
    response_format: OpenAIResponseFormat,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatChoice {
    message: OpenAIChatMessage,
}
