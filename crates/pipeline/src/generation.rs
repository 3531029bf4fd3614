//! ComfyUI-backed [`ArtifactGenerator`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use genpipe_comfyui::ImageSession;
use genpipe_core::theme::Theme;
use genpipe_core::types::DbId;
use genpipe_core::workflow::set_prompt;
use genpipe_db::models::job::Job;

use crate::collaborators::{ArtifactGenerator, GeneratedArtifact};
use crate::error::GenerationError;

/// Renders each job's prompt into the workflow template, runs it and
/// writes the first output image to `<output_dir>/<prefix>_<job_id>.png`.
pub struct ComfyGenerator {
    session: ImageSession,
    workflow: serde_json::Value,
    prompt_node_id: String,
    output_dir: PathBuf,
    theme: Theme,
}

impl ComfyGenerator {
    pub fn new(
        session: ImageSession,
        workflow: serde_json::Value,
        prompt_node_id: String,
        output_dir: PathBuf,
        theme: Theme,
    ) -> Self {
        Self {
            session,
            workflow,
            prompt_node_id,
            output_dir,
            theme,
        }
    }

    /// Where the artifact for `job_id` is written.
    pub fn artifact_path(&self, job_id: DbId) -> PathBuf {
        self.output_dir.join(self.theme.artifact_file_name(job_id))
    }
}

#[async_trait]
impl ArtifactGenerator for ComfyGenerator {
    async fn generate(&self, job: &Job) -> Result<GeneratedArtifact, GenerationError> {
        let workflow = set_prompt(&self.workflow, &self.prompt_node_id, &job.payload)?;
        let image = self.session.generate(&workflow).await?;

        let path = self.artifact_path(job.id);
        write_artifact(&path, &image.bytes).await?;

        tracing::debug!(
            job_id = job.id,
            prompt_id = %image.prompt_id,
            source = %image.image.filename,
            "Artifact downloaded",
        );

        Ok(GeneratedArtifact {
            artifact_ref: path.display().to_string(),
            size: image.bytes.len() as u64,
        })
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        self.session.probe().await?;
        Ok(())
    }
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), GenerationError> {
    let to_err = |source: std::io::Error| GenerationError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(path, bytes).await.map_err(to_err)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use genpipe_comfyui::ComfyUIClient;

    use super::*;

    #[test]
    fn artifact_path_uses_theme_prefix() {
        let theme = genpipe_core::theme::builtin("cats").unwrap();
        let generator = ComfyGenerator::new(
            ImageSession::new(
                ComfyUIClient::from_host("127.0.0.1", 8188),
                Duration::from_secs(300),
            )
            .unwrap(),
            serde_json::json!({}),
            "6".to_string(),
            PathBuf::from("output"),
            theme,
        );
        assert_eq!(generator.artifact_path(42), PathBuf::from("output/cat_42.png"));
    }

    #[tokio::test]
    async fn write_artifact_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/cat_1.png");

        write_artifact(&path, b"png").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }
}
