//! One-shot image generation against a ComfyUI instance.
//!
//! A fresh WebSocket is opened per prompt so the `client_id` used for the
//! submission is guaranteed to receive that prompt's messages.

use std::time::Duration;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::messages::ImageRef;
use crate::processor::wait_for_outputs;

/// The first output image of a finished prompt.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub prompt_id: String,
    pub image: ImageRef,
    pub bytes: Vec<u8>,
}

/// Runs workflows to completion and downloads their output.
#[derive(Clone)]
pub struct ImageSession {
    client: ComfyUIClient,
    api: ComfyUIApi,
    timeout: Duration,
}

impl ImageSession {
    /// `timeout` bounds the wait for a submitted prompt to finish; each
    /// REST call is bounded separately by [`crate::api::REQUEST_TIMEOUT`].
    pub fn new(client: ComfyUIClient, timeout: Duration) -> Result<Self, ComfyUIClientError> {
        let api = ComfyUIApi::new(client.api_url().to_string())?;
        Ok(Self {
            client,
            api,
            timeout,
        })
    }

    /// Check that the server answers `/system_stats`.
    pub async fn probe(&self) -> Result<(), ComfyUIClientError> {
        self.api.system_stats().await?;
        Ok(())
    }

    /// Submit `workflow`, wait for it to finish and return the bytes of
    /// its first output image.
    ///
    /// On timeout the server is asked to interrupt the running prompt so
    /// the next submission does not queue behind it.
    pub async fn generate(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<GeneratedImage, ComfyUIClientError> {
        let mut conn = self.client.connect().await?;
        let submitted = self.api.submit_workflow(workflow, &conn.client_id).await?;
        tracing::debug!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Workflow queued",
        );

        let outcome =
            wait_for_outputs(&mut conn.ws_stream, &submitted.prompt_id, self.timeout).await;
        if let Err(e) = conn.ws_stream.close(None).await {
            tracing::trace!(error = %e, "Closing ComfyUI WebSocket failed");
        }

        let images = match outcome {
            Ok(images) => images,
            Err(e @ ComfyUIClientError::Timeout { .. }) => {
                if let Err(interrupt_err) = self.api.interrupt().await {
                    tracing::warn!(error = %interrupt_err, "Failed to interrupt timed-out prompt");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let image = images
            .into_iter()
            .next()
            .ok_or_else(|| ComfyUIClientError::NoOutputs(submitted.prompt_id.clone()))?;
        let bytes = self.api.view_image(&image).await?;

        Ok(GeneratedImage {
            prompt_id: submitted.prompt_id,
            image,
            bytes,
        })
    }
}
