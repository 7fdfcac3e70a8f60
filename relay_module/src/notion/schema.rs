//! Database schema introspection and reconciliation of analysis results
//! against it.
//!
//! The schema is the source of truth for which properties exist and which
//! options a closed property accepts. Values that do not fit are omitted
//! (or substituted, per [`MismatchPolicy`]) before the create call.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::analysis::types::{parse_strict_date, AnalysisResult, FieldValue, LogicalField};
use crate::notion::blocks::{rich_text, truncate_chars, MAX_RICH_TEXT_CHARS};
use crate::notion::client::NotionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Title,
    RichText,
    Select,
    MultiSelect,
    Status,
    Date,
    Other(String),
}

impl PropertyKind {
    fn from_type(name: &str) -> Self {
        match name {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "select" => PropertyKind::Select,
            "multi_select" => PropertyKind::MultiSelect,
            "status" => PropertyKind::Status,
            "date" => PropertyKind::Date,
            other => PropertyKind::Other(other.to_string()),
        }
    }

    fn has_options(&self) -> bool {
        matches!(
            self,
            PropertyKind::Select | PropertyKind::MultiSelect | PropertyKind::Status
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySchema {
    pub kind: PropertyKind,
    /// Allowed option names for select, multi-select and status properties.
    pub options: Vec<String>,
}

impl PropertySchema {
    /// Declared spelling of `value` among the options, ignoring case.
    pub fn match_option(&self, value: &str) -> Option<&str> {
        let wanted = value.trim();
        self.options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(wanted))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    pub properties: BTreeMap<String, PropertySchema>,
}

impl DatabaseSchema {
    /// Parses the body of `GET /v1/databases/{id}`.
    pub fn from_json(value: &Value) -> Result<Self, NotionError> {
        let raw = value
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| NotionError::Parse("database has no properties object".to_string()))?;

        let mut properties = BTreeMap::new();
        for (name, definition) in raw {
            let type_name = definition
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let kind = PropertyKind::from_type(type_name);
            let options = if kind.has_options() {
                definition
                    .get(type_name)
                    .and_then(|body| body.get("options"))
                    .and_then(Value::as_array)
                    .map(|options| {
                        options
                            .iter()
                            .filter_map(|option| option.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            properties.insert(name.clone(), PropertySchema { kind, options });
        }
        Ok(Self { properties })
    }

    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.get(name)
    }

    pub fn title_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, property)| property.kind == PropertyKind::Title)
            .map(|(name, _)| name.as_str())
    }

    pub fn has_date_property(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|property| property.kind == PropertyKind::Date)
    }
}

/// What to write when a label is not among a closed property's options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    #[default]
    Omit,
    /// Substitute the property's first declared option.
    FirstOption,
}

/// Logical field → database property name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PropertyMapping {
    pub status: String,
    pub category: String,
    pub priority: String,
    pub deliverable: String,
    pub scale: String,
    pub project_tag: String,
    pub assignee: String,
    pub due_date: String,
    /// Date property stamped on the minimal record.
    pub created_date: String,
}

impl Default for PropertyMapping {
    fn default() -> Self {
        Self {
            status: "Status".to_string(),
            category: "Category".to_string(),
            priority: "Priority".to_string(),
            deliverable: "Deliverable".to_string(),
            scale: "Scale".to_string(),
            project_tag: "Project".to_string(),
            assignee: "Assignee".to_string(),
            due_date: "Due".to_string(),
            created_date: "Created".to_string(),
        }
    }
}

impl PropertyMapping {
    pub fn name_for(&self, field: LogicalField) -> &str {
        match field {
            LogicalField::Status => &self.status,
            LogicalField::Category => &self.category,
            LogicalField::Priority => &self.priority,
            LogicalField::Deliverable => &self.deliverable,
            LogicalField::Scale => &self.scale,
            LogicalField::ProjectTag => &self.project_tag,
            LogicalField::Assignee => &self.assignee,
            LogicalField::DueDate => &self.due_date,
        }
    }
}

pub fn title_value(title: &str) -> Value {
    json!({ "title": rich_text(title) })
}

/// Builds the `properties` object for a create call: the title plus every
/// non-null field whose mapped property exists and accepts the value.
pub fn reconcile_properties(
    analysis: &AnalysisResult,
    schema: &DatabaseSchema,
    mapping: &PropertyMapping,
    policy: MismatchPolicy,
) -> Result<Map<String, Value>, NotionError> {
    let title_property = schema
        .title_property()
        .ok_or(NotionError::MissingTitleProperty)?;

    let mut properties = Map::new();
    properties.insert(title_property.to_string(), title_value(&analysis.title));

    for (field, value) in &analysis.properties {
        if value.is_null() {
            continue;
        }
        let name = mapping.name_for(*field);
        let Some(property) = schema.get(name) else {
            debug!("skipping {}: property {:?} not in database", field, name);
            continue;
        };
        if let Some(encoded) = encode_value(name, property, value, policy) {
            properties.insert(name.to_string(), encoded);
        }
    }
    Ok(properties)
}

fn encode_value(
    name: &str,
    property: &PropertySchema,
    value: &FieldValue,
    policy: MismatchPolicy,
) -> Option<Value> {
    let text = value.as_display()?;
    match &property.kind {
        PropertyKind::Select | PropertyKind::MultiSelect | PropertyKind::Status => {
            let option = match property.match_option(&text) {
                Some(option) => option,
                None => match (policy, property.options.first()) {
                    (MismatchPolicy::FirstOption, Some(first)) => {
                        warn!(
                            "value {:?} not an option of {:?}; using {:?}",
                            text, name, first
                        );
                        first.as_str()
                    }
                    _ => {
                        warn!("value {:?} not an option of {:?}; omitting", text, name);
                        return None;
                    }
                },
            };
            Some(match property.kind {
                PropertyKind::Select => json!({ "select": { "name": option } }),
                PropertyKind::Status => json!({ "status": { "name": option } }),
                _ => json!({ "multi_select": [{ "name": option }] }),
            })
        }
        PropertyKind::RichText => Some(json!({ "rich_text": rich_text(&text) })),
        PropertyKind::Date => match parse_strict_date(&text) {
            Some(date) => Some(json!({ "date": { "start": date.format("%Y-%m-%d").to_string() } })),
            None => {
                warn!("value {:?} is not a date for {:?}; omitting", text, name);
                None
            }
        },
        PropertyKind::Title | PropertyKind::Other(_) => {
            debug!("skipping {:?}: unsupported property type", name);
            None
        }
    }
}

/// Display strings for every readable property of a page object.
pub fn read_back_properties(page: &Value) -> BTreeMap<String, String> {
    page.get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .filter_map(|(name, value)| {
                    property_display(value).map(|display| (name.clone(), display))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn property_display(value: &Value) -> Option<String> {
    let kind = value.get("type").and_then(Value::as_str)?;
    let body = value.get(kind)?;
    let display = match kind {
        "title" | "rich_text" => body
            .as_array()?
            .iter()
            .filter_map(|part| part.get("plain_text").or_else(|| part.pointer("/text/content")))
            .filter_map(Value::as_str)
            .collect::<String>(),
        "select" | "status" => body.get("name")?.as_str()?.to_string(),
        "multi_select" => body
            .as_array()?
            .iter()
            .filter_map(|option| option.get("name").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(", "),
        "date" => body.get("start")?.as_str()?.to_string(),
        "number" => match body {
            Value::Number(number) => number.to_string(),
            _ => return None,
        },
        "checkbox" => body.as_bool()?.to_string(),
        "url" | "email" | "phone_number" => body.as_str()?.to_string(),
        _ => return None,
    };
    Some(truncate_chars(&display, MAX_RICH_TEXT_CHARS))
}
