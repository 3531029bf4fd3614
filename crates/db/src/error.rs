use genpipe_core::types::DbId;

/// Errors raised by the job store.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A transition that records an artifact was given an empty reference.
    #[error("Job {0}: artifact reference must not be empty")]
    EmptyArtifactRef(DbId),
}
