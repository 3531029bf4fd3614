//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants and feeds them to an
//! [`OutputCollector`] until the watched prompt finishes, fails, or the
//! wait budget runs out.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::ComfyUIClientError;
use crate::messages::{parse_message, ComfyUIMessage, ExecutingData, ImageRef, ProgressData};

/// Tracks the messages of a single prompt and decides when it is done.
///
/// Messages for other prompts (other clients share the server) are
/// ignored. Images are collected from every `executed` message; the
/// prompt is finished on `execution_success` or on `executing` with a
/// null node, whichever comes first.
#[derive(Debug)]
pub struct OutputCollector {
    prompt_id: String,
    images: Vec<ImageRef>,
}

impl OutputCollector {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            images: Vec::new(),
        }
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    /// Feed one message. Returns `Some` once the prompt reached a
    /// terminal state.
    pub fn observe(
        &mut self,
        msg: ComfyUIMessage,
    ) -> Option<Result<Vec<ImageRef>, ComfyUIClientError>> {
        if let ComfyUIMessage::Progress(data) = &msg {
            log_progress(&self.prompt_id, data);
            return None;
        }
        if msg.prompt_id() != Some(self.prompt_id.as_str()) {
            return None;
        }

        match msg {
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(
                    prompt_id = %self.prompt_id,
                    node = %data.node,
                    images = data.output.images.len(),
                    "Node executed with output",
                );
                self.images.extend(data.output.images);
                None
            }
            ComfyUIMessage::ExecutionSuccess(_)
            | ComfyUIMessage::Executing(ExecutingData { node: None, .. }) => {
                Some(self.finish())
            }
            ComfyUIMessage::ExecutionError(data) => Some(Err(ComfyUIClientError::Execution {
                prompt_id: data.prompt_id,
                node_id: data.node_id,
                message: format!("{}: {}", data.exception_type, data.exception_message),
            })),
            ComfyUIMessage::ExecutionInterrupted(data) => Some(Err(ComfyUIClientError::Execution {
                prompt_id: data.prompt_id,
                node_id: String::new(),
                message: "execution interrupted".to_string(),
            })),
            ComfyUIMessage::ExecutionStart(_) => {
                tracing::debug!(prompt_id = %self.prompt_id, "Execution started");
                None
            }
            _ => None,
        }
    }

    fn finish(&mut self) -> Result<Vec<ImageRef>, ComfyUIClientError> {
        if self.images.is_empty() {
            return Err(ComfyUIClientError::NoOutputs(self.prompt_id.clone()));
        }
        Ok(std::mem::take(&mut self.images))
    }
}

/// Wait until `prompt_id` finishes and return its output images.
///
/// The whole wait is bounded by `timeout`. Unknown message types and
/// binary preview frames are skipped.
pub async fn wait_for_outputs<S>(
    stream: &mut S,
    prompt_id: &str,
    timeout: Duration,
) -> Result<Vec<ImageRef>, ComfyUIClientError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let collect = async {
        let mut collector = OutputCollector::new(prompt_id);

        while let Some(msg_result) = stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match parse_message(&text) {
                    Ok(msg) => {
                        if let Some(outcome) = collector.observe(msg) {
                            return outcome;
                        }
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, "Skipping unrecognised ComfyUI message");
                    }
                },
                Ok(Message::Binary(_)) => {
                    tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(ComfyUIClientError::Protocol(e.to_string())),
            }
        }

        Err(ComfyUIClientError::Closed(prompt_id.to_string()))
    };

    tokio::time::timeout(timeout, collect)
        .await
        .map_err(|_| ComfyUIClientError::Timeout {
            prompt_id: prompt_id.to_string(),
            secs: timeout.as_secs(),
        })?
}

fn log_progress(prompt_id: &str, data: &ProgressData) {
    let percent = if data.max > 0 {
        ((data.value as f64 / data.max as f64) * 100.0) as i16
    } else {
        0
    };
    tracing::trace!(
        prompt_id,
        value = data.value,
        max = data.max,
        percent,
        "Generation progress",
    );
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use futures::stream;

    use super::*;

    fn text(json: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(json.to_string()))
    }

    fn executed(prompt_id: &str, filename: &str) -> Result<Message, tungstenite::Error> {
        text(&format!(
            r#"{{"type":"executed","data":{{"node":"9","prompt_id":"{prompt_id}","output":{{"images":[{{"filename":"{filename}","subfolder":"","type":"output"}}]}}}}}}"#
        ))
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn collects_images_until_success() {
        let mut frames = stream::iter(vec![
            text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#),
            text(r#"{"type":"progress","data":{"value":3,"max":20}}"#),
            executed("p1", "a.png"),
            text(r#"{"type":"execution_success","data":{"prompt_id":"p1"}}"#),
        ]);

        let images = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "a.png");
    }

    #[tokio::test]
    async fn null_node_also_finishes() {
        let mut frames = stream::iter(vec![
            executed("p1", "a.png"),
            text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#),
        ]);

        let images = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap();
        assert_eq!(images[0].filename, "a.png");
    }

    #[tokio::test]
    async fn ignores_other_prompts_and_unknown_types() {
        let mut frames = stream::iter(vec![
            executed("other", "wrong.png"),
            text(r#"{"type":"execution_success","data":{"prompt_id":"other"}}"#),
            text(r#"{"type":"crystools.monitor","data":{"cpu":3}}"#),
            Ok(Message::Binary(vec![0, 1, 2])),
            executed("p1", "right.png"),
            text(r#"{"type":"execution_success","data":{"prompt_id":"p1"}}"#),
        ]);

        let images = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "right.png");
    }

    #[tokio::test]
    async fn execution_error_fails_the_wait() {
        let mut frames = stream::iter(vec![text(
            r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"3","exception_message":"OOM","exception_type":"RuntimeError"}}"#,
        )]);

        let err = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap_err();
        assert_matches!(err, ComfyUIClientError::Execution { node_id, .. } if node_id == "3");
    }

    #[tokio::test]
    async fn success_without_images_is_an_error() {
        let mut frames = stream::iter(vec![text(
            r#"{"type":"execution_success","data":{"prompt_id":"p1"}}"#,
        )]);

        let err = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap_err();
        assert_matches!(err, ComfyUIClientError::NoOutputs(id) if id == "p1");
    }

    #[tokio::test]
    async fn closed_stream_is_an_error() {
        let mut frames = stream::iter(vec![executed("p1", "a.png")]);

        let err = wait_for_outputs(&mut frames, "p1", WAIT).await.unwrap_err();
        assert_matches!(err, ComfyUIClientError::Closed(_));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let mut frames = stream::pending::<Result<Message, tungstenite::Error>>();

        let err = wait_for_outputs(&mut frames, "p1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_matches!(err, ComfyUIClientError::Timeout { prompt_id, .. } if prompt_id == "p1");
    }

    #[test]
    fn collector_keeps_images_from_several_nodes() {
        let mut collector = OutputCollector::new("p1");
        for name in ["a.png", "b.png"] {
            let msg = parse_message(&format!(
                r#"{{"type":"executed","data":{{"node":"9","prompt_id":"p1","output":{{"images":[{{"filename":"{name}"}}]}}}}}}"#
            ))
            .unwrap();
            assert!(collector.observe(msg).is_none());
        }
        assert_eq!(collector.images().len(), 2);
        assert_eq!(collector.images()[1].kind, "output");
    }
}
