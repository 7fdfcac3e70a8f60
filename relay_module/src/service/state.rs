use std::sync::Arc;

use crate::dedup::{DedupKeyStrategy, DedupStore};

use super::ingestion::{IngestionSender, Pipeline};

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) channel_secret: Arc<str>,
    pub(super) key_strategy: DedupKeyStrategy,
    pub(super) pipeline: Arc<Pipeline>,
    pub(super) jobs: IngestionSender,
    pub(super) notion_configured: bool,
    pub(super) line_configured: bool,
}

impl AppState {
    pub(super) fn dedup(&self) -> &Arc<dyn DedupStore> {
        &self.pipeline.dedup
    }
}
