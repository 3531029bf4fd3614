//! The upload stage.

use std::sync::Arc;
use std::time::Duration;

use genpipe_db::repositories::JobRepo;
use genpipe_db::DbPool;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::collaborators::ArtifactUploader;
use crate::handoff::HandoffQueue;
use crate::producer::{complete, QueuedArtifact};
use crate::progress;
use crate::upload::{deliver, Delivery, UploadPolicy};

/// How long one wait on the queue lasts before the stop flag is checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub uploaded: u64,
    /// Completed without upload (too large, or uploads disabled).
    pub skipped: u64,
    /// Upload failed; the job stays `generated` for a later run.
    pub failed: u64,
}

pub struct ConsumerWorker {
    pool: DbPool,
    queue: Arc<HandoffQueue<QueuedArtifact>>,
    uploader: Option<Arc<dyn ArtifactUploader>>,
    policy: UploadPolicy,
    poll_interval: Duration,
}

impl ConsumerWorker {
    pub fn new(
        pool: DbPool,
        queue: Arc<HandoffQueue<QueuedArtifact>>,
        uploader: Option<Arc<dyn ArtifactUploader>>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            pool,
            queue,
            uploader,
            policy,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Upload queued artifacts until `stop` fires and the queue is empty.
    ///
    /// Items still queued when `stop` fires are drained first.
    pub async fn run(self, stop: CancellationToken) -> ConsumerReport {
        tracing::info!(capacity = self.queue.capacity(), "Consumer started");
        let mut report = ConsumerReport::default();

        loop {
            match self.queue.get_timeout(self.poll_interval).await {
                Some(delivery) => self.handle(&delivery.item, &mut report).await,
                None if stop.is_cancelled() => break,
                None => {}
            }
        }

        tracing::info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            "Consumer stopped",
        );
        report
    }

    async fn handle(&self, queued: &QueuedArtifact, report: &mut ConsumerReport) {
        let job = &queued.job;
        let artifact_ref = queued.artifact_ref.as_str();

        match deliver(self.uploader.as_deref(), &self.policy, job, artifact_ref).await {
            Ok(Delivery::Uploaded(receipt)) => {
                report.uploaded += 1;
                tracing::info!(
                    job_id = job.id,
                    artifact_id = %receipt.artifact_id,
                    confirmation_id = %receipt.confirmation_id,
                    "Uploaded",
                );
                complete(&self.pool, job, artifact_ref).await;
            }
            Ok(Delivery::TooLarge { .. } | Delivery::Disabled) => {
                report.skipped += 1;
                complete(&self.pool, job, artifact_ref).await;
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    job_id = job.id,
                    artifact_ref,
                    error = %e,
                    "Upload failed, job stays generated",
                );
                match JobRepo::requeue_generated(&self.pool, job.id, artifact_ref).await {
                    Ok(_) => progress::record(&self.pool, job.id, "upload_failed").await,
                    Err(e) => {
                        tracing::error!(job_id = job.id, error = %e, "Failed to requeue job");
                    }
                }
            }
        }
    }
}
