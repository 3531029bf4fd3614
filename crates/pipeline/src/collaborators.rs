//! Seams between the worker loops and the outside world.

use async_trait::async_trait;
use genpipe_core::types::DbId;
use genpipe_db::models::job::Job;

use crate::error::{GenerationError, UploadError};

/// A produced artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    /// Path of the artifact, stored verbatim as the job's `artifact_ref`.
    pub artifact_ref: String,
    pub size: u64,
}

/// Turns a job's payload into an artifact.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(&self, job: &Job) -> Result<GeneratedArtifact, GenerationError>;

    /// Startup reachability check.
    async fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// What the remote store records alongside the artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// The payload the artifact was generated from.
    pub source_task: String,
    /// Integer label, the job id.
    pub label: DbId,
    pub size: u64,
    pub content_type: String,
}

impl UploadMetadata {
    pub fn for_job(job: &Job, size: u64, content_type: &str) -> Self {
        Self {
            source_task: job.payload.clone(),
            label: job.id,
            size,
            content_type: content_type.to_string(),
        }
    }
}

/// Proof that an upload was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub artifact_id: String,
    pub confirmation_id: String,
}

/// Pushes an artifact to remote storage. All-or-nothing.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError>;

    async fn is_connected(&self) -> bool;
}
