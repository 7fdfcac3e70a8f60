//! Notion database writer.

pub mod blocks;
pub mod client;
pub mod schema;
pub mod writer;

pub use client::{NotionClient, NotionError, DEFAULT_NOTION_API_BASE_URL};
pub use schema::{DatabaseSchema, MismatchPolicy, PropertyKind, PropertyMapping, PropertySchema};
pub use writer::{CreatedRecord, SchemaWriter};
