use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

static STRICT_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Record fields the analysis fills, independent of the store's column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    Status,
    Category,
    Priority,
    Deliverable,
    Scale,
    ProjectTag,
    Assignee,
    DueDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Closed vocabulary of labels.
    Enumerated,
    Text,
    Date,
}

impl LogicalField {
    pub const ALL: [LogicalField; 8] = [
        LogicalField::Status,
        LogicalField::Category,
        LogicalField::Priority,
        LogicalField::Deliverable,
        LogicalField::Scale,
        LogicalField::ProjectTag,
        LogicalField::Assignee,
        LogicalField::DueDate,
    ];

    /// Key used in the model's JSON output.
    pub fn json_key(self) -> &'static str {
        match self {
            LogicalField::Status => "status",
            LogicalField::Category => "category",
            LogicalField::Priority => "priority",
            LogicalField::Deliverable => "deliverable",
            LogicalField::Scale => "scale",
            LogicalField::ProjectTag => "project_tag",
            LogicalField::Assignee => "assignee",
            LogicalField::DueDate => "due_date",
        }
    }

    pub fn from_json_key(key: &str) -> Option<Self> {
        let normalized = key.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "duedate" => Some(LogicalField::DueDate),
            "projecttag" | "project" => Some(LogicalField::ProjectTag),
            _ => Self::ALL
                .into_iter()
                .find(|field| field.json_key() == normalized),
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            LogicalField::Assignee => FieldKind::Text,
            LogicalField::DueDate => FieldKind::Date,
            _ => FieldKind::Enumerated,
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_key())
    }
}

/// A single property value. Replaces loosely typed JSON so every value is
/// validated before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    /// Canonical label from a closed vocabulary.
    Label(String),
    Text(String),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_display(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Label(value) | FieldValue::Text(value) => Some(value.clone()),
            FieldValue::Date(date) => Some(date.format("%Y-%m-%d").to_string()),
        }
    }
}

/// Parses only `YYYY-MM-DD` strings naming a real calendar day.
pub fn parse_strict_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if !STRICT_DATE.is_match(value) {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisSource {
    Model,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    ModelDisabled,
    RateLimited,
    Timeout,
    UpstreamError,
    MalformedResponse,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackReason::ModelDisabled => "model_disabled",
            FallbackReason::RateLimited => "rate_limited",
            FallbackReason::Timeout => "timeout",
            FallbackReason::UpstreamError => "upstream_error",
            FallbackReason::MalformedResponse => "malformed_response",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Record title: the first line of the message.
    pub title: String,
    pub properties: BTreeMap<LogicalField, FieldValue>,
    /// Markdown sub-task breakdown.
    pub page_content: String,
    pub source: AnalysisSource,
}

impl AnalysisResult {
    /// A result with every field present and `Null`.
    pub fn empty(title: &str, source: AnalysisSource) -> Self {
        Self {
            title: title.to_string(),
            properties: LogicalField::ALL
                .into_iter()
                .map(|field| (field, FieldValue::Null))
                .collect(),
            page_content: String::new(),
            source,
        }
    }

    pub fn get(&self, field: LogicalField) -> &FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        self.properties.get(&field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: LogicalField, value: FieldValue) {
        self.properties.insert(field, value);
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, AnalysisSource::Fallback(_))
    }
}
