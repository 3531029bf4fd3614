//! Job status enum mapping to the `status_id` column.
//!
//! Discriminants are the values stored in the database. Rows are decoded
//! through [`JobStatus::from_id`], so an unknown id surfaces as a decode
//! error instead of being guessed.

use serde::Serialize;

/// Status ID type matching the INTEGER `status_id` column.
pub type StatusId = i16;

/// Lifecycle status of a job.
///
/// Transient failures are never stored: a failed generation goes back to
/// `Pending`, a failed upload goes back to `Generated`.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending = 1,
    InProgress = 2,
    Generated = 3,
    Completed = 4,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Generated,
        JobStatus::Completed,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a stored status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Generated => "generated",
            JobStatus::Completed => "completed",
        }
    }

    /// Whether a job in this status must carry an artifact reference.
    pub fn has_artifact(self) -> bool {
        matches!(self, JobStatus::Generated | JobStatus::Completed)
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status ID has no [`JobStatus`] variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown job status id {0}")]
pub struct UnknownStatus(pub StatusId);

impl TryFrom<StatusId> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(id: StatusId) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(UnknownStatus(id))
    }
}
