use genpipe_arkiv::ArkivError;
use genpipe_comfyui::ComfyUIClientError;
use genpipe_core::workflow::WorkflowError;
use genpipe_db::JobStoreError;

/// Why a single generation attempt failed. Never fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("ComfyUI: {0}")]
    ComfyUI(#[from] ComfyUIClientError),

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Returned by collaborators that are not backed by ComfyUI.
    #[error("{0}")]
    Other(String),
}

/// Why a single upload attempt failed. Never fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Arkiv: {0}")]
    Arkiv(#[from] ArkivError),

    /// Returned by collaborators that are not backed by Arkiv.
    #[error("{0}")]
    Other(String),
}

/// Errors that end a run before or after the workers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("Generation service unavailable: {0}")]
    GeneratorUnavailable(#[source] GenerationError),

    #[error("Upload service unavailable")]
    UploaderUnavailable,
}
