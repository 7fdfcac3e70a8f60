use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use send_messages_module::{LineMessagingClient, SendMessageError};

use crate::analysis::AnalysisClient;
use crate::dedup::DedupStore;
use crate::line_event::InboundEvent;
use crate::notion::{NotionError, SchemaWriter};

use super::summary::{build_summary, ACK_MESSAGE, DUPLICATE_MESSAGE, UNAVAILABLE_MESSAGE};

#[derive(Debug)]
pub enum IngestionJob {
    /// A new event whose dedup keys are already marked.
    Process {
        event: InboundEvent,
        dedup_keys: Vec<String>,
    },
    /// A redelivery; only answered.
    DuplicateNotice { event: InboundEvent },
}

impl IngestionJob {
    fn event(&self) -> &InboundEvent {
        match self {
            IngestionJob::Process { event, .. } | IngestionJob::DuplicateNotice { event } => event,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("acknowledgement reply failed: {0}")]
    Acknowledge(#[source] SendMessageError),
    #[error("record write failed: {0}")]
    Write(#[from] NotionError),
    #[error("ingestion worker stopped before the job could run")]
    Stopped,
}

impl PipelineError {
    /// Text pushed to the user when a job fails after acknowledgement.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Write(err) if err.is_rate_limited() => {
                "Saving to Notion failed: the Notion API rate limit was reached. Please try again in a few minutes.".to_string()
            }
            PipelineError::Write(err) if err.is_timeout() => {
                "Saving to Notion failed: the request timed out. Please try again.".to_string()
            }
            other => format!("Saving to Notion failed: {}", other),
        }
    }
}

/// Everything a job needs after the webhook has returned.
pub struct Pipeline {
    pub analysis: Arc<AnalysisClient>,
    pub writer: Arc<SchemaWriter>,
    pub messenger: Arc<LineMessagingClient>,
    pub dedup: Arc<dyn DedupStore>,
}

impl Pipeline {
    /// Runs one job. The acknowledgement goes out before `permits` is
    /// awaited; only analysis, the write and the push are bounded by it.
    pub async fn run_job(&self, job: IngestionJob, permits: &Semaphore) {
        match job {
            IngestionJob::DuplicateNotice { event } => {
                if let Some(token) = event.reply_token.as_deref() {
                    if let Err(err) = self.messenger.reply_text(token, DUPLICATE_MESSAGE).await {
                        warn!("duplicate notice for {} failed: {}", event.source_user_id, err);
                    }
                }
            }
            IngestionJob::Process { event, dedup_keys } => {
                if let Err(err) = self.process(&event, permits).await {
                    self.dedup.release(&dedup_keys);
                    match err {
                        PipelineError::Acknowledge(_) | PipelineError::Stopped => {
                            error!("job for {} stopped: {}", event.source_user_id, err);
                        }
                        PipelineError::Write(_) => {
                            error!("job for {} failed: {}", event.source_user_id, err);
                            self.notify(&event.source_user_id, &err.user_message()).await;
                        }
                    }
                }
            }
        }
    }

    async fn process(
        &self,
        event: &InboundEvent,
        permits: &Semaphore,
    ) -> Result<(), PipelineError> {
        info!("processing {:?} from {}", event.title(), event.source_user_id);
        match event.reply_token.as_deref() {
            Some(token) => self
                .messenger
                .reply_text(token, ACK_MESSAGE)
                .await
                .map_err(PipelineError::Acknowledge)?,
            None => info!("event from {} has no reply token; skipping ack", event.source_user_id),
        }

        let _permit = permits.acquire().await.map_err(|_| PipelineError::Stopped)?;
        let analysis = self.analysis.analyze(&event.message_text).await;
        let record = self
            .writer
            .create_record(&analysis, Local::now().date_naive())
            .await?;
        let summary = build_summary(&analysis, &record, self.writer.mapping());
        self.notify(&event.source_user_id, &summary).await;
        Ok(())
    }

    async fn notify(&self, user_id: &str, text: &str) {
        if let Err(err) = self.messenger.push_text(user_id, text).await {
            warn!("push to {} failed: {}", user_id, err);
        }
    }

    /// Sent instead of a job when the queue cannot take one.
    pub async fn reply_unavailable(&self, event: &InboundEvent) {
        if let Some(token) = event.reply_token.as_deref() {
            if let Err(err) = self.messenger.reply_text(token, UNAVAILABLE_MESSAGE).await {
                warn!("unavailable notice for {} failed: {}", event.source_user_id, err);
            }
        }
    }
}

#[derive(Clone)]
pub struct IngestionSender {
    tx: mpsc::Sender<IngestionJob>,
}

impl IngestionSender {
    /// Never waits; a full or closed queue hands the job back.
    pub fn try_submit(&self, job: IngestionJob) -> Result<(), IngestionJob> {
        self.tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Free slots in the queue.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }
}

pub struct IngestionControl {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl IngestionControl {
    /// Closes the queue, then waits for queued and in-flight jobs.
    pub async fn stop_and_join(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(err) = self.handle.await {
            error!("ingestion worker panicked: {}", err);
        }
    }
}

/// Starts the worker. Up to `queue_capacity` jobs wait in the channel and
/// up to `queue_capacity` more are started and acknowledged; of those, at
/// most `max_concurrent_jobs` run analysis and the write at once.
pub fn spawn_ingestion_worker(
    pipeline: Arc<Pipeline>,
    queue_capacity: usize,
    max_concurrent_jobs: usize,
) -> (IngestionSender, IngestionControl) {
    let (tx, mut rx) = mpsc::channel::<IngestionJob>(queue_capacity.max(1));
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let permits = JobPermits {
        started: Arc::new(Semaphore::new(queue_capacity.max(1))),
        running: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
    };

    let handle = tokio::spawn(async move {
        let mut jobs = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    rx.close();
                    break;
                }
                next = rx.recv() => match next {
                    Some(job) => spawn_job(&mut jobs, &pipeline, &permits, job).await,
                    None => break,
                },
                Some(finished) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(err) = finished {
                        error!("ingestion job panicked: {}", err);
                    }
                }
            }
        }

        while let Some(job) = rx.recv().await {
            spawn_job(&mut jobs, &pipeline, &permits, job).await;
        }
        let pending = jobs.len();
        if pending > 0 {
            info!("waiting for {} ingestion jobs to finish", pending);
        }
        while let Some(finished) = jobs.join_next().await {
            if let Err(err) = finished {
                error!("ingestion job panicked: {}", err);
            }
        }
        info!("ingestion worker stopped");
    });

    (
        IngestionSender { tx },
        IngestionControl {
            stop_tx: Some(stop_tx),
            handle,
        },
    )
}

struct JobPermits {
    /// Jobs taken off the channel and not yet finished.
    started: Arc<Semaphore>,
    /// Jobs past acknowledgement.
    running: Arc<Semaphore>,
}

async fn spawn_job(
    jobs: &mut JoinSet<()>,
    pipeline: &Arc<Pipeline>,
    permits: &JobPermits,
    job: IngestionJob,
) {
    let started = match permits.started.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            warn!("job permits closed; dropping job for {}", job.event().source_user_id);
            return;
        }
    };
    let pipeline = pipeline.clone();
    let running = permits.running.clone();
    jobs.spawn(async move {
        pipeline.run_job(job, &running).await;
        drop(started);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_write_gets_specific_message() {
        let err = PipelineError::Write(NotionError::Api {
            status: 429,
            code: "rate_limited".to_string(),
            message: "slow down".to_string(),
        });
        assert!(err.user_message().contains("rate limit"));
    }

    #[test]
    fn other_write_errors_include_reason() {
        let err = PipelineError::Write(NotionError::MissingTitleProperty);
        let message = err.user_message();
        assert!(message.starts_with("Saving to Notion failed:"));
        assert!(message.contains("no title property"));
    }
}
