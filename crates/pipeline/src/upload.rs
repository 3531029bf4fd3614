//! Upload stage: the size policy, the shared delivery step and the
//! Arkiv-backed [`ArtifactUploader`].

use std::path::Path;

use async_trait::async_trait;
use genpipe_arkiv::{image_attributes, ArkivClient, NewEntity, ENTITY_TTL};
use genpipe_db::models::job::Job;

use crate::collaborators::{ArtifactUploader, UploadMetadata, UploadReceipt};
use crate::error::UploadError;

/// Default upload ceiling, in KiB.
pub const DEFAULT_MAX_SIZE_KB: u64 = 117;

/// Decides which artifacts are small enough to upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_size_bytes: u64,
}

impl UploadPolicy {
    pub fn from_kb(max_size_kb: u64) -> Self {
        Self {
            max_size_bytes: max_size_kb.saturating_mul(1024),
        }
    }

    pub fn allows(&self, size: u64) -> bool {
        size <= self.max_size_bytes
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_kb(DEFAULT_MAX_SIZE_KB)
    }
}

/// What happened to an artifact that reached the upload stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Uploaded(UploadReceipt),
    /// Over the size limit. The job still counts as completed.
    TooLarge { size: u64 },
    /// No uploader configured.
    Disabled,
}

/// Read the artifact and push it through `uploader` unless the policy
/// rejects it.
pub async fn deliver(
    uploader: Option<&dyn ArtifactUploader>,
    policy: &UploadPolicy,
    job: &Job,
    artifact_ref: &str,
) -> Result<Delivery, UploadError> {
    let Some(uploader) = uploader else {
        return Ok(Delivery::Disabled);
    };

    let bytes = tokio::fs::read(artifact_ref)
        .await
        .map_err(|source| UploadError::Read {
            path: artifact_ref.to_string(),
            source,
        })?;
    let size = bytes.len() as u64;

    if !policy.allows(size) {
        tracing::info!(
            job_id = job.id,
            size_kb = size / 1024,
            max_kb = policy.max_size_bytes / 1024,
            "Artifact too large, skipping upload",
        );
        return Ok(Delivery::TooLarge { size });
    }

    let metadata = UploadMetadata::for_job(job, size, content_type_for(artifact_ref));
    let receipt = uploader.upload(bytes, &metadata).await?;
    Ok(Delivery::Uploaded(receipt))
}

/// MIME type derived from the artifact's extension.
pub fn content_type_for(artifact_ref: &str) -> &'static str {
    let ext = Path::new(artifact_ref)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Stores each artifact as an Arkiv entity tagged with the theme's app
/// name.
pub struct ArkivUploader {
    client: ArkivClient,
    app_name: String,
}

impl ArkivUploader {
    pub fn new(client: ArkivClient, app_name: String) -> Self {
        Self { client, app_name }
    }
}

#[async_trait]
impl ArtifactUploader for ArkivUploader {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<UploadReceipt, UploadError> {
        let entity = NewEntity {
            payload: bytes,
            content_type: metadata.content_type.clone(),
            attributes: image_attributes(&self.app_name, &metadata.source_task, metadata.label),
            expires_in: ENTITY_TTL,
        };
        let created = self.client.create_entity(&entity).await?;
        Ok(UploadReceipt {
            artifact_id: created.entity_key,
            confirmation_id: created.tx_hash,
        })
    }

    async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_boundary_is_inclusive() {
        let policy = UploadPolicy::from_kb(117);
        assert!(policy.allows(117 * 1024));
        assert!(!policy.allows(117 * 1024 + 1));
        assert_eq!(UploadPolicy::default(), policy);
    }

    #[test]
    fn huge_limit_saturates() {
        let policy = UploadPolicy::from_kb(u64::MAX);
        assert_eq!(policy.max_size_bytes, u64::MAX);
        assert!(policy.allows(u64::MAX));
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("output/cat_1.png"), "image/png");
        assert_eq!(content_type_for("output/cat_1.JPG"), "image/jpeg");
        assert_eq!(content_type_for("output/cat_1"), "application/octet-stream");
    }
}
