use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use send_messages_module::DEFAULT_LINE_API_BASE_URL;

use crate::analysis::client::AnalysisConfig;
use crate::dedup::{DedupKeyStrategy, DEFAULT_DEDUP_WINDOW, DEFAULT_SWEEP_INTERVAL};
use crate::notion::{MismatchPolicy, PropertyMapping, DEFAULT_NOTION_API_BASE_URL};
use crate::vocabulary::{default_rules, KeywordRule, Vocabulary};

pub const DEFAULT_RELAY_PORT: u16 = 3000;
pub const DEFAULT_RELAY_BODY_MAX_BYTES: usize = 1024 * 1024;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 8;

const CONFIG_FILE_NAME: &str = "relay.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {key}")]
    MissingEnv { key: &'static str },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `relay.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub vocabulary: Vocabulary,
    /// Replaces the built-in keyword rules when present.
    #[serde(default)]
    pub rules: Option<Vec<KeywordRule>>,
    #[serde(default)]
    pub notion: NotionSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotionSection {
    #[serde(default)]
    pub properties: PropertyMapping,
    #[serde(default)]
    pub on_option_mismatch: MismatchPolicy,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub line_channel_secret: String,
    pub line_channel_access_token: String,
    pub line_api_base_url: String,
    pub notion_api_key: String,
    pub notion_database_id: String,
    pub notion_api_base_url: String,
    pub analysis: AnalysisConfig,
    pub dedup_window: Duration,
    pub dedup_sweep_interval: Duration,
    pub dedup_key_strategy: DedupKeyStrategy,
    pub max_concurrent_jobs: usize,
    pub queue_capacity: usize,
    pub body_max_bytes: usize,
    pub vocabulary: Vocabulary,
    pub rules: Vec<KeywordRule>,
    pub property_mapping: PropertyMapping,
    pub mismatch_policy: MismatchPolicy,
    /// `relay.toml` that was loaded, if any.
    pub config_path: Option<PathBuf>,
}

impl RelayConfig {
    /// Defaults for everything except the four required credentials.
    pub fn new(
        line_channel_secret: impl Into<String>,
        line_channel_access_token: impl Into<String>,
        notion_api_key: impl Into<String>,
        notion_database_id: impl Into<String>,
    ) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_RELAY_PORT,
            line_channel_secret: line_channel_secret.into(),
            line_channel_access_token: line_channel_access_token.into(),
            line_api_base_url: DEFAULT_LINE_API_BASE_URL.to_string(),
            notion_api_key: notion_api_key.into(),
            notion_database_id: notion_database_id.into(),
            notion_api_base_url: DEFAULT_NOTION_API_BASE_URL.to_string(),
            analysis: AnalysisConfig::default(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            dedup_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            dedup_key_strategy: DedupKeyStrategy::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            body_max_bytes: DEFAULT_RELAY_BODY_MAX_BYTES,
            vocabulary: Vocabulary::default(),
            rules: default_rules(),
            property_mapping: PropertyMapping::default(),
            mismatch_policy: MismatchPolicy::default(),
            config_path: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::new(
            required("LINE_CHANNEL_SECRET")?,
            required("LINE_CHANNEL_ACCESS_TOKEN")?,
            required("NOTION_API_KEY")?,
            required("NOTION_DATABASE_ID")?,
        );

        config.config_path = resolve_config_path()?;
        let file = match &config.config_path {
            Some(path) => load_config_file(path)?,
            None => RelayConfigFile::default(),
        };

        if let Some(host) = optional("RELAY_HOST").or(file.server.host) {
            config.host = host;
        }
        let port = optional("PORT")
            .map(|value| ("PORT", value))
            .or_else(|| optional("RELAY_PORT").map(|value| ("RELAY_PORT", value)));
        config.port = match port {
            Some((key, value)) => parse_value(key, &value)?,
            None => file.server.port.unwrap_or(DEFAULT_RELAY_PORT),
        };
        if let Some(url) = optional("LINE_API_BASE_URL") {
            config.line_api_base_url = url;
        }
        if let Some(url) = optional("NOTION_API_BASE_URL") {
            config.notion_api_base_url = url;
        }

        let mut analysis = AnalysisConfig::from_keys(
            optional("GEMINI_API_KEY"),
            optional("OPENAI_API_KEY"),
        );
        if let Some(model) = optional("ANALYSIS_MODEL") {
            analysis.model = model;
        }
        if let Some(url) = optional("GEMINI_API_BASE_URL") {
            analysis.gemini_base_url = url;
        }
        if let Some(url) = optional("OPENAI_API_URL") {
            analysis.openai_url = url;
        }
        analysis.timeout =
            Duration::from_secs(positive("ANALYSIS_TIMEOUT_SECS", analysis.timeout.as_secs())?);
        analysis.requests_per_minute = parse_or("ANALYSIS_RPM_LIMIT", analysis.requests_per_minute)?;
        analysis.requests_per_day = parse_or("ANALYSIS_RPD_LIMIT", analysis.requests_per_day)?;
        config.analysis = analysis;

        config.dedup_window =
            Duration::from_secs(parse_or("DEDUP_WINDOW_SECS", DEFAULT_DEDUP_WINDOW.as_secs())?);
        config.dedup_sweep_interval = Duration::from_secs(positive(
            "DEDUP_SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL.as_secs(),
        )?);
        config.dedup_key_strategy = parse_or("DEDUP_KEY_STRATEGY", DedupKeyStrategy::default())?;
        config.max_concurrent_jobs =
            positive("RELAY_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)?;
        config.queue_capacity = positive("RELAY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        config.body_max_bytes = positive("RELAY_MAX_BODY_BYTES", DEFAULT_RELAY_BODY_MAX_BYTES)?;

        config.vocabulary = file.vocabulary;
        if let Some(rules) = file.rules {
            config.rules = rules;
        }
        config.property_mapping = file.notion.properties;
        config.mismatch_policy = file.notion.on_option_mismatch;
        Ok(config)
    }
}

/// `RELAY_CONFIG_PATH` when set, otherwise `relay.toml` in the working
/// directory if it exists.
pub fn resolve_config_path() -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = optional("RELAY_CONFIG_PATH") {
        return Ok(Some(PathBuf::from(path)));
    }
    let cwd = env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let direct = cwd.join(CONFIG_FILE_NAME);
    Ok(direct.exists().then_some(direct))
}

pub fn load_config_file(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::MissingEnv { key })
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    let value = parse_or(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}
