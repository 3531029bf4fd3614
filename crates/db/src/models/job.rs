//! Job row model and the aggregate views derived from the `jobs` table.

use genpipe_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: DbId,
    /// The prompt text; immutable once created.
    pub payload: String,
    pub status: JobStatus,
    /// Local path of the generated artifact. `None` until generation succeeds.
    pub artifact_ref: Option<String>,
    pub created_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl<'r> FromRow<'r, SqliteRow> for Job {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status_id: StatusId = row.try_get("status_id")?;
        let status = JobStatus::try_from(status_id).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status_id".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            status,
            artifact_ref: row.try_get("artifact_ref")?,
            created_at: row.try_get("created_at")?,
            claimed_at: row.try_get("claimed_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Per-status job counts used for progress reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub generated: i64,
    pub completed: i64,
}

impl JobStats {
    /// Share of jobs that reached `completed`, in percent.
    pub fn progress_percent(&self) -> f64 {
        if self.total > 0 {
            self.completed as f64 / self.total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Jobs that have an artifact, whether or not it was uploaded yet.
    pub fn produced(&self) -> i64 {
        self.generated + self.completed
    }

    /// 1-based position of the next job to generate.
    pub fn next_position(&self) -> i64 {
        self.produced() + 1
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::InProgress => self.in_progress += count,
            JobStatus::Generated => self.generated += count,
            JobStatus::Completed => self.completed += count,
        }
        self.total += count;
    }
}

/// Outcome of startup crash recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Jobs moved from `in_progress` back to `pending`.
    pub reset_count: u64,
    /// Jobs already `generated` whose artifact still awaits upload.
    pub pending_upload_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_handles_empty_store() {
        assert_eq!(JobStats::default().progress_percent(), 0.0);
    }

    #[test]
    fn progress_percent_counts_completed_only() {
        let stats = JobStats {
            total: 4,
            pending: 1,
            in_progress: 0,
            generated: 2,
            completed: 1,
        };
        assert_eq!(stats.progress_percent(), 25.0);
        assert_eq!(stats.produced(), 3);
        assert_eq!(stats.next_position(), 4);
    }

    #[test]
    fn add_keeps_total_in_sync() {
        let mut stats = JobStats::default();
        stats.add(JobStatus::Pending, 3);
        stats.add(JobStatus::Completed, 2);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.completed, 2);
    }
}
