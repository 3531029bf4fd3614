//! ComfyUI workflow templates.
//!
//! A workflow is the API-format JSON exported from ComfyUI: an object
//! keyed by node id. The prompt text lives in `<node_id>.inputs.text` of
//! the text-encode node.

use std::path::Path;

use serde_json::Value;

/// Node that carries the positive prompt in the default workflow.
pub const DEFAULT_PROMPT_NODE_ID: &str = "6";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Node with id {0} not found in workflow")]
    NodeNotFound(String),

    #[error("Node {0} does not have an inputs.text field")]
    MissingTextInput(String),
}

/// Read a workflow template from disk.
pub fn load_workflow(path: &Path) -> Result<Value, WorkflowError> {
    let raw = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| WorkflowError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Return a copy of `workflow` with the prompt written into `node_id`.
///
/// The template itself is never modified, so one loaded template can be
/// reused for every job.
pub fn set_prompt(workflow: &Value, node_id: &str, prompt: &str) -> Result<Value, WorkflowError> {
    let mut wf = workflow.clone();

    let node = wf
        .get_mut(node_id)
        .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;

    let text = node
        .get_mut("inputs")
        .and_then(|inputs| inputs.get_mut("text"))
        .ok_or_else(|| WorkflowError::MissingTextInput(node_id.to_string()))?;

    *text = Value::String(prompt.to_string());
    Ok(wf)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn template() -> Value {
        json!({
            "3": { "class_type": "KSampler", "inputs": { "seed": 1 } },
            "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "placeholder", "clip": ["4", 1] } }
        })
    }

    #[test]
    fn set_prompt_replaces_text_and_keeps_template() {
        let wf = template();
        let updated = set_prompt(&wf, DEFAULT_PROMPT_NODE_ID, "a cat, 4k").unwrap();

        assert_eq!(updated["6"]["inputs"]["text"], "a cat, 4k");
        assert_eq!(updated["6"]["inputs"]["clip"], json!(["4", 1]));
        assert_eq!(wf["6"]["inputs"]["text"], "placeholder");
    }

    #[test]
    fn set_prompt_missing_node() {
        let err = set_prompt(&template(), "99", "x").unwrap_err();
        assert!(matches!(err, WorkflowError::NodeNotFound(id) if id == "99"));
    }

    #[test]
    fn set_prompt_node_without_text_input() {
        let err = set_prompt(&template(), "3", "x").unwrap_err();
        assert!(matches!(err, WorkflowError::MissingTextInput(id) if id == "3"));
    }

    #[test]
    fn load_workflow_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, template().to_string()).unwrap();

        let wf = load_workflow(&path).unwrap();
        assert_eq!(wf, template());
    }

    #[test]
    fn load_workflow_missing_file() {
        let err = load_workflow(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, WorkflowError::Io { .. }));
    }
}
