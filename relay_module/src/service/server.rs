use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use send_messages_module::LineMessagingClient;

use crate::analysis::AnalysisClient;
use crate::dedup::{spawn_dedup_sweeper, DedupStore, InMemoryDedupStore};
use crate::notion::{NotionClient, SchemaWriter};

use super::config::RelayConfig;
use super::handlers::{clear_cache, health, line_webhook};
use super::ingestion::{spawn_ingestion_worker, IngestionControl, Pipeline};
use super::state::AppState;
use super::BoxError;

/// A wired relay: the router plus the background pieces it feeds.
pub struct Relay {
    pub router: Router,
    pub ingestion: IngestionControl,
    pub dedup: Arc<dyn DedupStore>,
}

/// Builds clients, the dedup store and the ingestion worker from `config`.
/// Must be called inside a tokio runtime.
pub fn build_relay(config: &RelayConfig) -> Relay {
    let dedup: Arc<dyn DedupStore> = Arc::new(InMemoryDedupStore::new(config.dedup_window));
    let analysis = Arc::new(AnalysisClient::new(
        config.analysis.clone(),
        config.vocabulary.clone(),
        config.rules.clone(),
    ));
    let writer = Arc::new(SchemaWriter::new(
        NotionClient::new(&config.notion_api_key, &config.notion_api_base_url),
        &config.notion_database_id,
        config.property_mapping.clone(),
        config.mismatch_policy,
    ));
    let messenger = Arc::new(LineMessagingClient::new(
        &config.line_channel_access_token,
        &config.line_api_base_url,
    ));

    let pipeline = Arc::new(Pipeline {
        analysis,
        writer,
        messenger,
        dedup: dedup.clone(),
    });
    let (jobs, ingestion) = spawn_ingestion_worker(
        pipeline.clone(),
        config.queue_capacity,
        config.max_concurrent_jobs,
    );

    let state = AppState {
        channel_secret: Arc::from(config.line_channel_secret.as_str()),
        key_strategy: config.dedup_key_strategy,
        pipeline,
        jobs,
        notion_configured: !config.notion_api_key.is_empty()
            && !config.notion_database_id.is_empty(),
        line_configured: !config.line_channel_access_token.is_empty(),
    };

    Relay {
        router: build_router(state, config.body_max_bytes),
        ingestion,
        dedup,
    }
}

fn build_router(state: AppState, body_max_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook", post(line_webhook))
        .route("/clear-cache", post(clear_cache))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_max_bytes))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(
    config: RelayConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let relay = build_relay(&config);
    let sweeper: JoinHandle<()> =
        spawn_dedup_sweeper(relay.dedup.clone(), config.dedup_sweep_interval);

    info!(
        "relay config path={}, analysis={} ({}), dedup window={:?}, strategy={}, jobs={}/{}",
        config
            .config_path
            .as_deref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string()),
        config.analysis.provider.as_str(),
        config.analysis.model,
        config.dedup_window,
        config.dedup_key_strategy,
        config.max_concurrent_jobs,
        config.queue_capacity,
    );
    info!("line relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, relay.router)
        .with_graceful_shutdown(shutdown)
        .await;
    info!("http server stopped; draining ingestion queue");
    relay.ingestion.stop_and_join().await;
    sweeper.abort();
    serve_result?;
    Ok(())
}
