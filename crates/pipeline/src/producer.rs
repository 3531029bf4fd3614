//! The generation stage.
//!
//! Claims pending jobs one at a time and hands each produced artifact to
//! the second stage. Every per-job failure is logged and recorded in the
//! store; only a failed claim (the store itself is unusable) ends the
//! loop early.
//!
//! Claims move forward through the id space: a job requeued after a
//! failed generation stays `pending` for the next run instead of being
//! retried in a tight loop.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use genpipe_core::types::DbId;
use genpipe_db::models::job::Job;
use genpipe_db::repositories::JobRepo;
use genpipe_db::DbPool;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{ArtifactGenerator, ArtifactUploader};
use crate::handoff::{HandoffQueue, PutOutcome};
use crate::progress;
use crate::upload::{deliver, Delivery, UploadPolicy};

/// A generated artifact waiting for upload.
#[derive(Debug, Clone)]
pub struct QueuedArtifact {
    pub job: Job,
    pub artifact_ref: String,
}

/// Where finished generations go.
pub enum SecondStage {
    /// Two-stage mode: mark `generated` and queue for the consumer.
    Handoff(Arc<HandoffQueue<QueuedArtifact>>),
    /// Single-stage mode: upload inline and mark `completed`.
    Inline {
        uploader: Option<Arc<dyn ArtifactUploader>>,
        policy: UploadPolicy,
    },
}

/// Why the producer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerExit {
    /// Every pending job was claimed once.
    Exhausted,
    Cancelled,
    /// Claiming failed; the store is unusable.
    StoreFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerReport {
    pub generated: u64,
    pub failed: u64,
    /// Artifacts from earlier runs sent back into the second stage.
    pub refed: u64,
    pub exit: ProducerExit,
}

pub struct ProducerWorker {
    pool: DbPool,
    generator: Arc<dyn ArtifactGenerator>,
    stage: SecondStage,
    delay: Duration,
    backlog: Vec<Job>,
    /// Id of the last claimed job.
    cursor: DbId,
    generated: u64,
    failed: u64,
    refed: u64,
}

impl ProducerWorker {
    pub fn new(pool: DbPool, generator: Arc<dyn ArtifactGenerator>, stage: SecondStage) -> Self {
        Self {
            pool,
            generator,
            stage,
            delay: Duration::ZERO,
            backlog: Vec::new(),
            cursor: 0,
            generated: 0,
            failed: 0,
            refed: 0,
        }
    }

    /// Pause between generations.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `generated` jobs from earlier runs, re-fed before new work.
    pub fn with_backlog(mut self, backlog: Vec<Job>) -> Self {
        self.backlog = backlog;
        self
    }

    /// Run until no pending job remains or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> ProducerReport {
        tracing::info!(backlog = self.backlog.len(), "Producer started");

        let exit = match self.drive(&cancel).await {
            ControlFlow::Break(exit) => exit,
            ControlFlow::Continue(()) => ProducerExit::Exhausted,
        };

        let report = ProducerReport {
            generated: self.generated,
            failed: self.failed,
            refed: self.refed,
            exit,
        };
        tracing::info!(
            generated = report.generated,
            failed = report.failed,
            refed = report.refed,
            exit = ?report.exit,
            "Producer stopped",
        );
        report
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> ControlFlow<ProducerExit> {
        for job in std::mem::take(&mut self.backlog) {
            if cancel.is_cancelled() {
                return ControlFlow::Break(ProducerExit::Cancelled);
            }
            let Some(artifact_ref) = job.artifact_ref.clone() else {
                tracing::warn!(job_id = job.id, "Generated job has no artifact, skipping");
                continue;
            };
            self.refed += 1;
            self.forward(job, artifact_ref, cancel).await?;
        }

        loop {
            if cancel.is_cancelled() {
                return ControlFlow::Break(ProducerExit::Cancelled);
            }

            let job = match JobRepo::claim_next_pending_after(&self.pool, self.cursor).await {
                Ok(Some(job)) => {
                    self.cursor = job.id;
                    job
                }
                Ok(None) => {
                    tracing::info!("No pending jobs left");
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim next job");
                    return ControlFlow::Break(ProducerExit::StoreFailed);
                }
            };

            self.process(job, cancel).await?;

            if !self.delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return ControlFlow::Break(ProducerExit::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }
    }

    /// Generate one claimed job and pass the result on.
    async fn process(&mut self, job: Job, cancel: &CancellationToken) -> ControlFlow<ProducerExit> {
        let position = progress::snapshot(&self.pool)
            .await
            .map(|stats| format!("{}/{}", stats.next_position(), stats.total));
        tracing::info!(
            job_id = job.id,
            position = position.as_deref().unwrap_or("?"),
            prompt = %job.payload,
            "Generating",
        );

        let artifact = match self.generator.generate(&job).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.failed += 1;
                tracing::warn!(job_id = job.id, error = %e, "Generation failed, requeueing");
                match JobRepo::requeue_pending(&self.pool, job.id).await {
                    Ok(_) => progress::record(&self.pool, job.id, "requeued").await,
                    Err(e) => {
                        tracing::error!(job_id = job.id, error = %e, "Failed to requeue job");
                    }
                }
                return ControlFlow::Continue(());
            }
        };

        self.generated += 1;
        tracing::info!(
            job_id = job.id,
            artifact_ref = %artifact.artifact_ref,
            size_kb = artifact.size / 1024,
            "Generated",
        );

        if let SecondStage::Handoff(_) = self.stage {
            // Persist before queueing: once queued, the consumer may
            // complete the job at any moment.
            match JobRepo::mark_generated(&self.pool, job.id, &artifact.artifact_ref).await {
                Ok(true) => progress::record(&self.pool, job.id, "generated").await,
                Ok(false) => {
                    tracing::warn!(job_id = job.id, "Job no longer in progress, not queueing");
                    return ControlFlow::Continue(());
                }
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Failed to mark job generated");
                    return ControlFlow::Continue(());
                }
            }
        }

        self.forward(job, artifact.artifact_ref, cancel).await
    }

    /// Hand a generated artifact to the second stage.
    async fn forward(
        &self,
        job: Job,
        artifact_ref: String,
        cancel: &CancellationToken,
    ) -> ControlFlow<ProducerExit> {
        match &self.stage {
            SecondStage::Handoff(queue) => {
                let job_id = job.id;
                match queue.put_until(QueuedArtifact { job, artifact_ref }, cancel).await {
                    PutOutcome::Queued => {
                        tracing::debug!(job_id, unfinished = queue.unfinished(), "Queued for upload");
                        ControlFlow::Continue(())
                    }
                    PutOutcome::Cancelled | PutOutcome::Closed => {
                        tracing::info!(job_id, "Stopped while waiting for queue room; job stays generated");
                        ControlFlow::Break(ProducerExit::Cancelled)
                    }
                }
            }
            SecondStage::Inline { uploader, policy } => {
                match deliver(uploader.as_deref(), policy, &job, &artifact_ref).await {
                    Ok(Delivery::Uploaded(receipt)) => {
                        tracing::info!(
                            job_id = job.id,
                            artifact_id = %receipt.artifact_id,
                            confirmation_id = %receipt.confirmation_id,
                            "Uploaded",
                        );
                    }
                    Ok(Delivery::TooLarge { .. } | Delivery::Disabled) => {}
                    Err(e) => {
                        tracing::warn!(job_id = job.id, error = %e, "Upload failed, completing anyway");
                    }
                }
                complete(&self.pool, &job, &artifact_ref).await;
                ControlFlow::Continue(())
            }
        }
    }
}

/// Mark `job` completed, logging instead of failing.
pub(crate) async fn complete(pool: &DbPool, job: &Job, artifact_ref: &str) {
    match JobRepo::mark_completed(pool, job.id, artifact_ref).await {
        Ok(true) => {
            tracing::info!(job_id = job.id, "Completed");
            progress::record(pool, job.id, "completed").await;
        }
        Ok(false) => tracing::warn!(job_id = job.id, "Job already moved on, completion skipped"),
        Err(e) => tracing::error!(job_id = job.id, error = %e, "Failed to mark job completed"),
    }
}
