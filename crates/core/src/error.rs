#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Unknown theme: {0}")]
    UnknownTheme(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
