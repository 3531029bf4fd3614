/// Errors from the Arkiv gateway client.
#[derive(Debug, thiserror::Error)]
pub enum ArkivError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway returned a non-2xx status code.
    #[error("Arkiv gateway error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Entity metadata could not be encoded.
    #[error("Failed to encode entity metadata: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid content type {0:?}")]
    InvalidContentType(String),
}
