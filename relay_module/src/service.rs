mod config;
mod handlers;
mod ingestion;
mod server;
mod state;
mod summary;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    load_config_file, resolve_config_path, ConfigError, NotionSection, RelayConfig,
    RelayConfigFile, ServerSection, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RELAY_BODY_MAX_BYTES, DEFAULT_RELAY_PORT,
};
pub use ingestion::{
    spawn_ingestion_worker, IngestionControl, IngestionJob, IngestionSender, Pipeline,
    PipelineError,
};
pub use server::{build_relay, run_server, Relay};
