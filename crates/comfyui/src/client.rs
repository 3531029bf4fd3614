//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance. Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::api::ComfyUIApiError;

/// The WebSocket stream type returned by [`ComfyUIClient::connect`].
pub type ComfyUIStream =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket and HTTP API URLs needed to communicate with
/// one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Unique client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self { ws_url, api_url }
    }

    /// Build both URLs from a plain host and port.
    pub fn from_host(host: &str, port: u16) -> Self {
        Self::new(
            format!("ws://{host}:{port}"),
            format!("http://{host}:{port}"),
        )
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// Generates a unique `client_id` (UUID v4) and appends it as a
    /// query parameter so that ComfyUI can address messages back to
    /// this specific client.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Errors that can occur while running a prompt over the WebSocket.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The REST side of the exchange failed.
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    /// ComfyUI reported an execution error for the prompt.
    #[error("Execution of prompt {prompt_id} failed in node {node_id}: {message}")]
    Execution {
        prompt_id: String,
        node_id: String,
        message: String,
    },

    /// The prompt finished but produced no images.
    #[error("Prompt {0} finished without producing any images")]
    NoOutputs(String),

    /// The socket closed before the prompt finished.
    #[error("WebSocket closed before prompt {0} finished")]
    Closed(String),

    /// The prompt did not finish within the wait budget.
    #[error("Timed out after {secs}s waiting for prompt {prompt_id}")]
    Timeout { prompt_id: String, secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_host_builds_both_urls() {
        let client = ComfyUIClient::from_host("127.0.0.1", 8188);
        assert_eq!(client.ws_url, "ws://127.0.0.1:8188");
        assert_eq!(client.api_url(), "http://127.0.0.1:8188");
    }

    #[test]
    fn timeout_error_names_prompt() {
        let err = ComfyUIClientError::Timeout {
            prompt_id: "p1".to_string(),
            secs: 300,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 300s waiting for prompt p1"
        );
    }
}
