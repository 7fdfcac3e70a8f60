use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::analysis::types::AnalysisResult;
use crate::notion::blocks::markdown_to_blocks;
use crate::notion::client::{NotionClient, NotionError};
use crate::notion::schema::{
    read_back_properties, reconcile_properties, title_value, DatabaseSchema, MismatchPolicy,
    PropertyMapping,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub id: String,
    pub url: String,
    /// Property values as stored, keyed by property name. Empty when the
    /// read-back failed.
    pub properties: BTreeMap<String, String>,
    /// True when only the title, created date and content were written.
    pub minimal: bool,
}

/// Writes analysis results into one database, reconciling each record with
/// the database schema fetched on first use.
pub struct SchemaWriter {
    client: NotionClient,
    database_id: String,
    mapping: PropertyMapping,
    policy: MismatchPolicy,
    schema: OnceCell<DatabaseSchema>,
}

impl SchemaWriter {
    pub fn new(
        client: NotionClient,
        database_id: impl Into<String>,
        mapping: PropertyMapping,
        policy: MismatchPolicy,
    ) -> Self {
        Self {
            client,
            database_id: database_id.into(),
            mapping,
            policy,
            schema: OnceCell::new(),
        }
    }

    pub fn mapping(&self) -> &PropertyMapping {
        &self.mapping
    }

    /// Fetches the schema once and reuses it for the life of the process.
    pub async fn schema(&self) -> Result<&DatabaseSchema, NotionError> {
        self.schema
            .get_or_try_init(|| async {
                let raw = self.client.retrieve_database(&self.database_id).await?;
                let schema = DatabaseSchema::from_json(&raw)?;
                info!(
                    "loaded database schema: {} properties, title={:?}",
                    schema.properties.len(),
                    schema.title_property()
                );
                Ok::<_, NotionError>(schema)
            })
            .await
    }

    pub async fn create_record(
        &self,
        analysis: &AnalysisResult,
        today: NaiveDate,
    ) -> Result<CreatedRecord, NotionError> {
        let schema = self.schema().await?;
        let children = markdown_to_blocks(&analysis.page_content);
        let properties = reconcile_properties(analysis, schema, &self.mapping, self.policy)?;

        let (page, minimal) = match self.create_page(properties, &children).await {
            Ok(page) => (page, false),
            Err(err) if err.is_validation() => {
                warn!("record rejected ({}); retrying with title and content only", err);
                let minimal = self.minimal_properties(schema, analysis, today)?;
                (self.create_page(minimal, &children).await?, true)
            }
            Err(err) => return Err(err),
        };

        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| NotionError::Parse("created page has no id".to_string()))?
            .to_string();
        let url = page
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("created record {} (minimal={})", id, minimal);

        let properties = match self.client.retrieve_page(&id).await {
            Ok(stored) => read_back_properties(&stored),
            Err(err) => {
                warn!("read-back of {} failed: {}", id, err);
                BTreeMap::new()
            }
        };

        Ok(CreatedRecord {
            id,
            url,
            properties,
            minimal,
        })
    }

    fn minimal_properties(
        &self,
        schema: &DatabaseSchema,
        analysis: &AnalysisResult,
        today: NaiveDate,
    ) -> Result<Map<String, Value>, NotionError> {
        let title_property = schema
            .title_property()
            .ok_or(NotionError::MissingTitleProperty)?;
        let mut properties = Map::new();
        properties.insert(title_property.to_string(), title_value(&analysis.title));
        if schema.has_date_property(&self.mapping.created_date) {
            properties.insert(
                self.mapping.created_date.clone(),
                json!({ "date": { "start": today.format("%Y-%m-%d").to_string() } }),
            );
        }
        Ok(properties)
    }

    async fn create_page(
        &self,
        properties: Map<String, Value>,
        children: &[Value],
    ) -> Result<Value, NotionError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": properties,
            "children": children,
        });
        self.client.create_page(&body).await
    }
}
