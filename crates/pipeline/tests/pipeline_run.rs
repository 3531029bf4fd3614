//! End-to-end runs of the coordinator against a real SQLite store and
//! in-memory collaborators.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use genpipe_db::models::job::Job;
use genpipe_db::models::status::JobStatus;
use genpipe_db::repositories::JobRepo;
use genpipe_db::DbPool;
use genpipe_pipeline::collaborators::{
    ArtifactGenerator, ArtifactUploader, GeneratedArtifact, UploadMetadata, UploadReceipt,
};
use genpipe_pipeline::handoff::HandoffQueue;
use genpipe_pipeline::producer::{ProducerExit, ProducerWorker, SecondStage};
use genpipe_pipeline::upload::UploadPolicy;
use genpipe_pipeline::{
    Coordinator, GenerationError, PipelineError, PipelineSettings, PipelineVariant, UploadError,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeGenerator {
    dir: PathBuf,
    size: usize,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeGenerator {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            size: 64,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, payload: &str) -> Self {
        self.failing.insert(payload.to_string());
        self
    }

    fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

#[async_trait]
impl ArtifactGenerator for FakeGenerator {
    async fn generate(&self, job: &Job) -> Result<GeneratedArtifact, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&job.payload) {
            return Err(GenerationError::Other("renderer crashed".to_string()));
        }
        let path = self.dir.join(format!("img_{}.png", job.id));
        std::fs::write(&path, vec![7u8; self.size]).unwrap();
        Ok(GeneratedArtifact {
            artifact_ref: path.display().to_string(),
            size: self.size as u64,
        })
    }
}

#[derive(Default)]
struct FakeUploader {
    fail: AtomicBool,
    offline: bool,
    panics: bool,
    delay: Duration,
    uploaded: Mutex<Vec<UploadMetadata>>,
}

impl FakeUploader {
    fn failing() -> Self {
        let uploader = Self::default();
        uploader.fail.store(true, Ordering::SeqCst);
        uploader
    }

    fn labels(&self) -> Vec<i64> {
        self.uploaded.lock().unwrap().iter().map(|m| m.label).collect()
    }
}

#[async_trait]
impl ArtifactUploader for FakeUploader {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics {
            panic!("uploader crashed");
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(UploadError::Other("gateway rejected".to_string()));
        }
        assert_eq!(bytes.len() as u64, metadata.size);
        self.uploaded.lock().unwrap().push(metadata.clone());
        Ok(UploadReceipt {
            artifact_id: format!("entity-{}", metadata.label),
            confirmation_id: format!("tx-{}", metadata.label),
        })
    }

    async fn is_connected(&self) -> bool {
        !self.offline
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Env {
    dir: TempDir,
    pool: DbPool,
}

async fn env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let path = genpipe_db::database_path(dir.path(), "test");
    let pool = genpipe_db::open_store(&path).await.unwrap();
    Env { dir, pool }
}

fn payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("a cat number {i}")).collect()
}

fn settings(variant: PipelineVariant) -> PipelineSettings {
    PipelineSettings {
        variant,
        queue_capacity: 2,
        delay: Duration::ZERO,
        poll_interval: Duration::from_millis(20),
        upload_policy: UploadPolicy::default(),
        producer_grace: Duration::from_secs(2),
        consumer_grace: Duration::from_secs(2),
    }
}

fn coordinator(
    env: &Env,
    generator: Arc<FakeGenerator>,
    uploader: Option<Arc<FakeUploader>>,
    settings: PipelineSettings,
) -> Coordinator {
    Coordinator::new(
        env.pool.clone(),
        generator,
        uploader.map(|u| u as Arc<dyn ArtifactUploader>),
        settings,
    )
}

// ---------------------------------------------------------------------------
// Two-stage runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_stage_run_completes_every_job() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let uploader = Arc::new(FakeUploader::default());

    let summary = coordinator(
        &env,
        Arc::clone(&generator),
        Some(Arc::clone(&uploader)),
        settings(PipelineVariant::TwoStage),
    )
    .run(&payloads(6), CancellationToken::new())
    .await
    .unwrap();

    assert!(!summary.cancelled);
    assert_eq!(summary.starting.pending, 6);
    assert_eq!(summary.final_stats.completed, 6);
    assert_eq!(summary.final_stats.progress_percent(), 100.0);
    assert_eq!(summary.producer.unwrap().exit, ProducerExit::Exhausted);
    assert_eq!(summary.consumer.unwrap().uploaded, 6);

    // Claim order is id order, and the queue is FIFO.
    let labels = uploader.labels();
    let mut sorted = labels.clone();
    sorted.sort_unstable();
    assert_eq!(labels, sorted);
}

#[tokio::test]
async fn generation_failure_leaves_job_pending() {
    let env = env().await;
    let jobs = payloads(3);
    let generator =
        Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()).failing_on(&jobs[1]));
    let uploader = Arc::new(FakeUploader::default());

    let coordinator = coordinator(
        &env,
        Arc::clone(&generator),
        Some(uploader),
        settings(PipelineVariant::TwoStage),
    );
    let run = coordinator.run(&jobs, CancellationToken::new());
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run returns despite a failing job")
        .unwrap();

    assert_eq!(summary.final_stats.completed, 2);
    assert_eq!(summary.final_stats.pending, 1);
    assert_eq!(summary.producer.unwrap().failed, 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

    let failed = JobRepo::find_by_payload(&env.pool, &jobs[1]).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Pending);
    assert!(failed.artifact_ref.is_none());
}

#[tokio::test]
async fn failed_upload_is_retried_on_next_run_with_same_artifact() {
    let env = env().await;
    let jobs = payloads(1);
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));

    // First run: the gateway rejects everything.
    let summary = coordinator(
        &env,
        Arc::clone(&generator),
        Some(Arc::new(FakeUploader::failing())),
        settings(PipelineVariant::TwoStage),
    )
    .run(&jobs, CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(summary.final_stats.generated, 1);
    assert_eq!(summary.consumer.unwrap().failed, 1);

    let job = JobRepo::find_by_payload(&env.pool, &jobs[0]).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Generated);
    let artifact_ref = job.artifact_ref.clone().unwrap();

    // Second run: the backlog is re-fed and uploaded without regenerating.
    let uploader = Arc::new(FakeUploader::default());
    let summary = coordinator(
        &env,
        Arc::clone(&generator),
        Some(Arc::clone(&uploader)),
        settings(PipelineVariant::TwoStage),
    )
    .run(&jobs, CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.reconcile.pending_upload_count, 1);
    assert_eq!(summary.backlog, 1);
    assert_eq!(summary.producer.unwrap().refed, 1);
    assert_eq!(summary.final_stats.completed, 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(uploader.labels(), vec![job.id]);

    let done = JobRepo::find_by_id(&env.pool, job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.artifact_ref.as_deref(), Some(artifact_ref.as_str()));
}

#[tokio::test]
async fn oversized_artifacts_complete_without_upload() {
    let env = env().await;
    let generator =
        Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()).with_size(4 * 1024));
    let uploader = Arc::new(FakeUploader::default());
    let mut settings = settings(PipelineVariant::TwoStage);
    settings.upload_policy = UploadPolicy::from_kb(1);

    let summary = coordinator(&env, generator, Some(Arc::clone(&uploader)), settings)
        .run(&payloads(2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.final_stats.completed, 2);
    assert_eq!(summary.consumer.unwrap().skipped, 2);
    assert!(uploader.labels().is_empty());
}

#[tokio::test]
async fn interrupted_claim_is_regenerated() {
    let env = env().await;
    let jobs = payloads(3);
    JobRepo::seed(&env.pool, &jobs).await.unwrap();
    // A previous run died right after claiming the first job.
    JobRepo::claim_next_pending(&env.pool).await.unwrap().unwrap();

    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let summary = coordinator(
        &env,
        Arc::clone(&generator),
        Some(Arc::new(FakeUploader::default())),
        settings(PipelineVariant::TwoStage),
    )
    .run(&jobs, CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.reconcile.reset_count, 1);
    assert_eq!(summary.starting.in_progress, 0);
    assert_eq!(summary.final_stats.completed, 3);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn uploads_disabled_still_completes() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));

    let summary = coordinator(&env, generator, None, settings(PipelineVariant::TwoStage))
        .run(&payloads(2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.final_stats.completed, 2);
    assert_eq!(summary.consumer.unwrap().skipped, 2);
}

// ---------------------------------------------------------------------------
// Single-stage runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_job_does_not_block_later_jobs() {
    let env = env().await;
    let jobs = payloads(3);
    JobRepo::seed(&env.pool, &jobs).await.unwrap();
    let generator =
        Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()).failing_on(&jobs[1]));

    let producer = ProducerWorker::new(
        env.pool.clone(),
        Arc::clone(&generator) as Arc<dyn ArtifactGenerator>,
        SecondStage::Inline {
            uploader: None,
            policy: UploadPolicy::default(),
        },
    );
    let report = tokio::time::timeout(Duration::from_secs(2), producer.run(CancellationToken::new()))
        .await
        .expect("producer moves past the failing job");

    assert_eq!(report.exit, ProducerExit::Exhausted);
    assert_eq!(report.generated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

    let statuses = [
        JobRepo::find_by_payload(&env.pool, &jobs[0]).await.unwrap().unwrap().status,
        JobRepo::find_by_payload(&env.pool, &jobs[1]).await.unwrap().unwrap().status,
        JobRepo::find_by_payload(&env.pool, &jobs[2]).await.unwrap().unwrap().status,
    ];
    assert_eq!(
        statuses,
        [JobStatus::Completed, JobStatus::Pending, JobStatus::Completed]
    );
}

#[tokio::test]
async fn single_stage_completes_even_when_upload_fails() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));

    let summary = coordinator(
        &env,
        generator,
        Some(Arc::new(FakeUploader::failing())),
        settings(PipelineVariant::SingleStage),
    )
    .run(&payloads(3), CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(summary.variant, PipelineVariant::SingleStage);
    assert!(summary.consumer.is_none());
    assert_eq!(summary.final_stats.completed, 3);
    assert_eq!(summary.final_stats.generated, 0);
}

// ---------------------------------------------------------------------------
// Startup and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_uploader_is_fatal_before_seeding() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let uploader = Arc::new(FakeUploader {
        offline: true,
        ..FakeUploader::default()
    });

    let result = coordinator(&env, generator, Some(uploader), settings(PipelineVariant::TwoStage))
        .run(&payloads(2), CancellationToken::new())
        .await;

    assert_matches!(result, Err(PipelineError::UploaderUnavailable));
    assert_eq!(JobRepo::count_all(&env.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn cancelled_run_leaves_work_for_next_time() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = coordinator(
        &env,
        Arc::clone(&generator),
        Some(Arc::new(FakeUploader::default())),
        settings(PipelineVariant::TwoStage),
    )
    .run(&payloads(4), cancel)
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.producer.unwrap().exit, ProducerExit::Cancelled);
    assert_eq!(summary.final_stats.pending, 4);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_uploads_are_drained_before_the_run_ends() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let uploader = Arc::new(FakeUploader {
        delay: Duration::from_millis(30),
        ..FakeUploader::default()
    });
    let mut settings = settings(PipelineVariant::TwoStage);
    settings.queue_capacity = 1;

    let summary = coordinator(&env, generator, Some(Arc::clone(&uploader)), settings)
        .run(&payloads(5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.final_stats.completed, 5);
    assert_eq!(uploader.labels().len(), 5);
}

#[tokio::test]
async fn consumer_crash_stops_the_producer() {
    let env = env().await;
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let uploader = Arc::new(FakeUploader {
        panics: true,
        ..FakeUploader::default()
    });
    let mut settings = settings(PipelineVariant::TwoStage);
    settings.queue_capacity = 1;

    let jobs = payloads(6);
    let coordinator = coordinator(&env, Arc::clone(&generator), Some(uploader), settings);
    let run = coordinator.run(&jobs, CancellationToken::new());
    let summary = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run returns once the consumer is gone")
        .unwrap();

    assert!(!summary.cancelled);
    assert!(summary.consumer.is_none());
    assert_eq!(summary.producer.unwrap().exit, ProducerExit::Cancelled);
    assert_eq!(summary.final_stats.completed, 0);
    assert_eq!(summary.final_stats.in_progress, 0);
    assert!(summary.final_stats.pending > 0);
    assert!(generator.calls.load(Ordering::SeqCst) < 6);
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn producer_holds_at_most_capacity_plus_one_artifacts() {
    let env = env().await;
    JobRepo::seed(&env.pool, payloads(5)).await.unwrap();
    let generator = Arc::new(FakeGenerator::new(env.dir.path().to_path_buf()));
    let queue = Arc::new(HandoffQueue::new(1));
    let cancel = CancellationToken::new();

    // No consumer: the queue fills and the producer blocks.
    let producer = ProducerWorker::new(
        env.pool.clone(),
        Arc::clone(&generator) as Arc<dyn ArtifactGenerator>,
        SecondStage::Handoff(Arc::clone(&queue)),
    );
    let handle = tokio::spawn(producer.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.unfinished(), 2);

    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.exit, ProducerExit::Cancelled);
    assert_eq!(report.generated, 2);

    // The abandoned item was persisted before queueing.
    let stats = JobRepo::stats(&env.pool).await.unwrap();
    assert_eq!(stats.generated, 2);
    assert_eq!(stats.pending, 3);
}
