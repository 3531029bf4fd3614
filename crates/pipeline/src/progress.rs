//! Progress reporting after each job transition.

use genpipe_core::types::DbId;
use genpipe_db::models::job::JobStats;
use genpipe_db::repositories::JobRepo;
use genpipe_db::DbPool;

/// Current job counts, or `None` when the store cannot be read. Progress
/// output never fails a job.
pub async fn snapshot(pool: &DbPool) -> Option<JobStats> {
    match JobRepo::stats(pool).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::debug!(error = %e, "Could not read job counts");
            None
        }
    }
}

/// Log the counts after `job_id` went through `event`.
pub async fn record(pool: &DbPool, job_id: DbId, event: &'static str) {
    let Some(stats) = snapshot(pool).await else {
        return;
    };
    tracing::info!(
        job_id,
        event,
        completed = stats.completed,
        generated = stats.generated,
        pending = stats.pending,
        total = stats.total,
        progress = %format!("{:.1}%", stats.progress_percent()),
        "Progress saved",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_tracks_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let pool = genpipe_db::open_store(&dir.path().join("p.db")).await.unwrap();
        JobRepo::seed(&pool, ["a", "b"]).await.unwrap();

        let job = JobRepo::claim_next_pending(&pool).await.unwrap().unwrap();
        JobRepo::mark_completed(&pool, job.id, "out/a.png").await.unwrap();
        record(&pool, job.id, "completed").await;

        let stats = snapshot(&pool).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.next_position(), 2);
    }

    #[tokio::test]
    async fn unreadable_store_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let pool = genpipe_db::open_store(&dir.path().join("p.db")).await.unwrap();
        pool.close().await;

        assert!(snapshot(&pool).await.is_none());
        record(&pool, 1, "completed").await;
    }
}
