//! Repository for the `jobs` table.
//!
//! Every transition is a single guarded `UPDATE`: it only fires when the
//! row is in one of the allowed source statuses, so retrying a transition
//! is harmless and a stale transition can never overwrite a newer state.
//! Callers get `true` when a row changed and `false` for a no-op.

use chrono::Utc;
use genpipe_core::types::DbId;
use sqlx::{FromRow, SqlitePool};

use crate::error::JobStoreError;
use crate::models::job::{Job, JobStats, ReconcileReport};
use crate::models::status::{JobStatus, StatusId};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, payload, status_id, artifact_ref, created_at, claimed_at, completed_at";

/// Provides the state-machine operations for jobs.
pub struct JobRepo;

impl JobRepo {
    // ── Seeding ──────────────────────────────────────────────────────

    /// Insert each payload as a `pending` job unless it already exists.
    ///
    /// Runs in one transaction and returns the total row count afterwards,
    /// so calling it on every startup is safe.
    pub async fn seed<I, S>(pool: &SqlitePool, payloads: I) -> Result<i64, JobStoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Utc::now();
        let mut inserted: u64 = 0;

        let mut tx = pool.begin().await?;
        for payload in payloads {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO jobs (payload, status_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(payload.as_ref())
            .bind(JobStatus::Pending.id())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        let total = Self::count_all(pool).await?;
        tracing::info!(inserted, total, "Job store seeded");
        Ok(total)
    }

    // ── Claiming ─────────────────────────────────────────────────────

    /// Atomically claim the lowest-id `pending` job.
    ///
    /// Selection and the move to `in_progress` happen in one statement;
    /// SQLite takes the write lock before reading, so two concurrent
    /// callers can never receive the same job. `None` means the queue is
    /// exhausted.
    pub async fn claim_next_pending(pool: &SqlitePool) -> Result<Option<Job>, JobStoreError> {
        Self::claim_next_pending_after(pool, 0).await
    }

    /// Like [`claim_next_pending`](Self::claim_next_pending), restricted
    /// to ids above `after`.
    ///
    /// A worker passes the id of its previous claim, so a job it requeued
    /// after a failure is not handed straight back within the same run.
    pub async fn claim_next_pending_after(
        pool: &SqlitePool,
        after: DbId,
    ) -> Result<Option<Job>, JobStoreError> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = ?, claimed_at = ? \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = ? AND id > ? \
                 ORDER BY id \
                 LIMIT 1 \
             ) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::InProgress.id())
            .bind(Utc::now())
            .bind(JobStatus::Pending.id())
            .bind(after)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// `in_progress | generated` -> `generated`, recording the artifact.
    pub async fn mark_generated(
        pool: &SqlitePool,
        job_id: DbId,
        artifact_ref: &str,
    ) -> Result<bool, JobStoreError> {
        ensure_artifact_ref(job_id, artifact_ref)?;
        Self::set_artifact_status(
            pool,
            job_id,
            artifact_ref,
            JobStatus::Generated,
            &[JobStatus::InProgress, JobStatus::Generated],
        )
        .await
    }

    /// `in_progress | generated | completed` -> `completed`.
    ///
    /// `completed_at` keeps its first value when the call is repeated.
    pub async fn mark_completed(
        pool: &SqlitePool,
        job_id: DbId,
        artifact_ref: &str,
    ) -> Result<bool, JobStoreError> {
        ensure_artifact_ref(job_id, artifact_ref)?;
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, artifact_ref = ?, completed_at = COALESCE(completed_at, ?) \
             WHERE id = ? AND status_id IN (?, ?, ?)",
        )
        .bind(JobStatus::Completed.id())
        .bind(artifact_ref)
        .bind(Utc::now())
        .bind(job_id)
        .bind(JobStatus::InProgress.id())
        .bind(JobStatus::Generated.id())
        .bind(JobStatus::Completed.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `in_progress | pending` -> `pending` after a failed generation.
    ///
    /// Clears any artifact reference; there is no partial generation state.
    pub async fn requeue_pending(pool: &SqlitePool, job_id: DbId) -> Result<bool, JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, artifact_ref = NULL, claimed_at = NULL \
             WHERE id = ? AND status_id IN (?, ?)",
        )
        .bind(JobStatus::Pending.id())
        .bind(job_id)
        .bind(JobStatus::InProgress.id())
        .bind(JobStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `in_progress | generated` -> `generated` after a failed upload.
    ///
    /// The artifact already exists, so the job is never sent back to
    /// `pending`; a later run only retries the upload.
    pub async fn requeue_generated(
        pool: &SqlitePool,
        job_id: DbId,
        artifact_ref: &str,
    ) -> Result<bool, JobStoreError> {
        ensure_artifact_ref(job_id, artifact_ref)?;
        Self::set_artifact_status(
            pool,
            job_id,
            artifact_ref,
            JobStatus::Generated,
            &[JobStatus::InProgress, JobStatus::Generated],
        )
        .await
    }

    // ── Recovery ─────────────────────────────────────────────────────

    /// Crash recovery, run once at startup before any worker.
    ///
    /// Every `in_progress` job was interrupted mid-generation and goes back
    /// to `pending`. `generated` jobs are only counted: their artifact
    /// survived and just needs uploading.
    pub async fn reconcile_interrupted(pool: &SqlitePool) -> Result<ReconcileReport, JobStoreError> {
        let mut tx = pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, artifact_ref = NULL, claimed_at = NULL \
             WHERE status_id = ?",
        )
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::InProgress.id())
        .execute(&mut *tx)
        .await?;

        let pending_upload_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status_id = ?")
                .bind(JobStatus::Generated.id())
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        let report = ReconcileReport {
            reset_count: reset.rows_affected(),
            pending_upload_count,
        };
        if report.reset_count > 0 {
            tracing::info!(
                reset_count = report.reset_count,
                "Reset interrupted generations back to pending",
            );
        }
        if report.pending_upload_count > 0 {
            tracing::info!(
                pending_upload_count = report.pending_upload_count,
                "Generated artifacts waiting for upload",
            );
        }
        Ok(report)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Per-status counts.
    pub async fn stats(pool: &SqlitePool) -> Result<JobStats, JobStoreError> {
        let rows: Vec<(StatusId, i64)> =
            sqlx::query_as("SELECT status_id, COUNT(*) FROM jobs GROUP BY status_id")
                .fetch_all(pool)
                .await?;

        let mut stats = JobStats::default();
        for (status_id, count) in rows {
            match JobStatus::from_id(status_id) {
                Some(status) => stats.add(status, count),
                None => {
                    tracing::warn!(status_id, count, "Ignoring jobs with unknown status id");
                }
            }
        }
        Ok(stats)
    }

    /// All `generated` jobs in id order.
    ///
    /// Rows that fail to decode are logged and skipped rather than
    /// aborting the whole backlog.
    pub async fn list_generated(pool: &SqlitePool) -> Result<Vec<Job>, JobStoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE status_id = ? ORDER BY id");
        let rows = sqlx::query(&query)
            .bind(JobStatus::Generated.id())
            .fetch_all(pool)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match Job::from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable generated job row");
                }
            }
        }
        Ok(jobs)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<Job>, JobStoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Find a job by its payload.
    pub async fn find_by_payload(
        pool: &SqlitePool,
        payload: &str,
    ) -> Result<Option<Job>, JobStoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE payload = ?");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(payload)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Total number of jobs.
    pub async fn count_all(pool: &SqlitePool) -> Result<i64, JobStoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(pool)
            .await?;
        Ok(total)
    }

    // ---- private helpers ----

    async fn set_artifact_status(
        pool: &SqlitePool,
        job_id: DbId,
        artifact_ref: &str,
        target: JobStatus,
        from: &[JobStatus; 2],
    ) -> Result<bool, JobStoreError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?, artifact_ref = ? \
             WHERE id = ? AND status_id IN (?, ?)",
        )
        .bind(target.id())
        .bind(artifact_ref)
        .bind(job_id)
        .bind(from[0].id())
        .bind(from[1].id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn ensure_artifact_ref(job_id: DbId, artifact_ref: &str) -> Result<(), JobStoreError> {
    if artifact_ref.trim().is_empty() {
        return Err(JobStoreError::EmptyArtifactRef(job_id));
    }
    Ok(())
}
