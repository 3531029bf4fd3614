//! Run supervision: startup recovery, worker lifecycle and shutdown.
//!
//! A run goes through four phases:
//!
//! 1. **Startup** -- probe collaborators, seed the store, reset
//!    interrupted jobs and snapshot the `generated` backlog. Any failure
//!    here aborts the run before a worker exists.
//! 2. **Run** -- spawn the producer and (two-stage) the consumer. If
//!    the consumer dies first the producer is stopped too.
//! 3. **Drain** -- after the producer runs out of work, wait until every
//!    queued artifact is acknowledged, then stop the consumer.
//! 4. **Shutdown** -- on cancellation give each worker a grace period and
//!    abandon the ones that do not stop in time.

use std::sync::Arc;
use std::time::Duration;

use genpipe_db::models::job::{Job, JobStats, ReconcileReport};
use genpipe_db::repositories::JobRepo;
use genpipe_db::DbPool;
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::collaborators::{ArtifactGenerator, ArtifactUploader};
use crate::consumer::{ConsumerReport, ConsumerWorker, DEFAULT_POLL_INTERVAL};
use crate::error::PipelineError;
use crate::handoff::HandoffQueue;
use crate::producer::{ProducerReport, ProducerWorker, SecondStage};
use crate::upload::UploadPolicy;

/// Default hand-off queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Default pause between generations.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

/// How long the producer gets to finish its current job after cancellation.
pub const PRODUCER_GRACE: Duration = Duration::from_secs(5);

/// How long the consumer gets to drain the queue after it is stopped.
pub const CONSUMER_GRACE: Duration = Duration::from_secs(10);

/// How the two stages are wired. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Producer and consumer run concurrently, joined by the queue.
    TwoStage,
    /// The producer uploads inline; no queue, no consumer.
    SingleStage,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub variant: PipelineVariant,
    pub queue_capacity: usize,
    pub delay: Duration,
    pub poll_interval: Duration,
    pub upload_policy: UploadPolicy,
    pub producer_grace: Duration,
    pub consumer_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            variant: PipelineVariant::TwoStage,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delay: DEFAULT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            upload_policy: UploadPolicy::default(),
            producer_grace: PRODUCER_GRACE,
            consumer_grace: CONSUMER_GRACE,
        }
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub variant: PipelineVariant,
    pub starting: JobStats,
    pub reconcile: ReconcileReport,
    /// `generated` jobs re-fed from earlier runs.
    pub backlog: usize,
    /// `None` when the producer was abandoned or panicked.
    pub producer: Option<ProducerReport>,
    /// `None` in single-stage mode, or when the consumer was abandoned.
    pub consumer: Option<ConsumerReport>,
    pub final_stats: JobStats,
    pub cancelled: bool,
}

pub struct Coordinator {
    pool: DbPool,
    generator: Arc<dyn ArtifactGenerator>,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    settings: PipelineSettings,
}

impl Coordinator {
    pub fn new(
        pool: DbPool,
        generator: Arc<dyn ArtifactGenerator>,
        uploader: Option<Arc<dyn ArtifactUploader>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            generator,
            uploader,
            settings,
        }
    }

    /// Fail fast when a collaborator is unreachable.
    pub async fn check_collaborators(&self) -> Result<(), PipelineError> {
        self.generator
            .probe()
            .await
            .map_err(PipelineError::GeneratorUnavailable)?;

        if let Some(uploader) = &self.uploader {
            if !uploader.is_connected().await {
                return Err(PipelineError::UploaderUnavailable);
            }
        }
        Ok(())
    }

    /// Execute one run over `payloads` until the work is done or
    /// `cancel` fires.
    pub async fn run(
        &self,
        payloads: &[String],
        cancel: CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        // ── Startup ──────────────────────────────────────────────────
        self.check_collaborators().await?;

        JobRepo::seed(&self.pool, payloads).await?;
        let reconcile = JobRepo::reconcile_interrupted(&self.pool).await?;
        let backlog = JobRepo::list_generated(&self.pool).await?;
        let starting = JobRepo::stats(&self.pool).await?;
        let backlog_len = backlog.len();

        tracing::info!(
            variant = ?self.settings.variant,
            total = starting.total,
            pending = starting.pending,
            generated = starting.generated,
            completed = starting.completed,
            progress = %format!("{:.1}%", starting.progress_percent()),
            uploads = self.uploader.is_some(),
            "Starting run",
        );

        // ── Run / drain / shutdown ───────────────────────────────────
        let (producer, consumer) = match self.settings.variant {
            PipelineVariant::TwoStage => self.run_two_stage(backlog, &cancel).await,
            PipelineVariant::SingleStage => {
                let stage = SecondStage::Inline {
                    uploader: self.uploader.clone(),
                    policy: self.settings.upload_policy,
                };
                let mut handle = tokio::spawn(self.producer(stage, backlog).run(cancel.clone()));
                (self.await_producer(&mut handle, &cancel).await, None)
            }
        };

        let final_stats = JobRepo::stats(&self.pool).await?;
        let cancelled = cancel.is_cancelled();
        tracing::info!(
            completed = final_stats.completed,
            generated = final_stats.generated,
            pending = final_stats.pending,
            total = final_stats.total,
            progress = %format!("{:.1}%", final_stats.progress_percent()),
            cancelled,
            "Run finished",
        );

        Ok(RunSummary {
            variant: self.settings.variant,
            starting,
            reconcile,
            backlog: backlog_len,
            producer,
            consumer,
            final_stats,
            cancelled,
        })
    }

    // ---- private helpers ----

    fn producer(&self, stage: SecondStage, backlog: Vec<Job>) -> ProducerWorker {
        ProducerWorker::new(self.pool.clone(), Arc::clone(&self.generator), stage)
            .with_delay(self.settings.delay)
            .with_backlog(backlog)
    }

    async fn run_two_stage(
        &self,
        backlog: Vec<Job>,
        cancel: &CancellationToken,
    ) -> (Option<ProducerReport>, Option<ConsumerReport>) {
        let queue = Arc::new(HandoffQueue::new(self.settings.queue_capacity));
        // Stopped by us after the drain, or by the parent on cancellation.
        let stop = cancel.child_token();

        let consumer = ConsumerWorker::new(
            self.pool.clone(),
            Arc::clone(&queue),
            self.uploader.clone(),
            self.settings.upload_policy,
        )
        .with_poll_interval(self.settings.poll_interval);
        let mut consumer_handle = tokio::spawn(consumer.run(stop.clone()));

        // Also stopped when the consumer is gone, so a full queue cannot
        // block the producer forever.
        let producer_stop = cancel.child_token();
        let producer = self.producer(SecondStage::Handoff(Arc::clone(&queue)), backlog);
        let mut producer_handle = tokio::spawn(producer.run(producer_stop.clone()));

        let mut consumer_report = None;
        let mut consumer_done = false;
        let producer_report = tokio::select! {
            report = self.await_producer(&mut producer_handle, &producer_stop) => report,
            res = &mut consumer_handle => {
                consumer_report = joined(res, "consumer");
                consumer_done = true;
                if !cancel.is_cancelled() {
                    tracing::error!("Consumer exited before the producer, stopping the producer");
                }
                producer_stop.cancel();
                self.await_producer(&mut producer_handle, &producer_stop).await
            }
        };

        if !consumer_done && !cancel.is_cancelled() {
            tracing::info!(unfinished = queue.unfinished(), "Waiting for upload queue to drain");
            tokio::select! {
                () = queue.join() => {}
                () = cancel.cancelled() => {}
                res = &mut consumer_handle => {
                    consumer_report = joined(res, "consumer");
                    consumer_done = true;
                }
            }
        }
        stop.cancel();

        if !consumer_done {
            consumer_report =
                match tokio::time::timeout(self.settings.consumer_grace, consumer_handle).await {
                    Ok(res) => joined(res, "consumer"),
                    Err(_) => {
                        tracing::warn!(
                            grace_secs = self.settings.consumer_grace.as_secs(),
                            unfinished = queue.unfinished(),
                            "Consumer did not stop in time, abandoning it",
                        );
                        None
                    }
                };
        }

        (producer_report, consumer_report)
    }

    /// Wait for the producer, bounding the wait once `stop` fires.
    async fn await_producer(
        &self,
        handle: &mut JoinHandle<ProducerReport>,
        stop: &CancellationToken,
    ) -> Option<ProducerReport> {
        tokio::select! {
            res = &mut *handle => joined(res, "producer"),
            () = stop.cancelled() => {
                tracing::info!("Stopping producer after its current job");
                match tokio::time::timeout(self.settings.producer_grace, &mut *handle).await {
                    Ok(res) => joined(res, "producer"),
                    Err(_) => {
                        tracing::warn!(
                            grace_secs = self.settings.producer_grace.as_secs(),
                            "Producer did not stop in time, abandoning it",
                        );
                        None
                    }
                }
            }
        }
    }
}

fn joined<T>(res: Result<T, JoinError>, worker: &str) -> Option<T> {
    match res {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!(worker, error = %e, "Worker task failed");
            None
        }
    }
}
