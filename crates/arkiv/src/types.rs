//! Entity and attribute types exchanged with the gateway.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Entities created by the pipeline expire after 128 days.
pub const ENTITY_TTL: Duration = Duration::from_secs(128 * 24 * 60 * 60);

/// Prompts longer than this are cut before being stored as an attribute.
pub const MAX_PROMPT_CHARS: usize = 500;

/// Attribute values are either numeric or string; numeric attributes
/// support range queries on the chain, string attributes do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Text(String),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Int(_) => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Attributes attached to every uploaded image.
///
/// `id` is stored as an integer so it can be range-queried; the prompt
/// is truncated to [`MAX_PROMPT_CHARS`] characters.
pub fn image_attributes(app: &str, prompt: &str, image_id: i64) -> Attributes {
    let prompt: String = prompt.chars().take(MAX_PROMPT_CHARS).collect();
    let mut attrs = Attributes::new();
    attrs.insert("type".to_string(), "image".into());
    attrs.insert("app".to_string(), app.into());
    attrs.insert("prompt".to_string(), prompt.into());
    attrs.insert("id".to_string(), image_id.into());
    attrs
}

/// An entity to create.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub payload: Vec<u8>,
    pub content_type: String,
    pub attributes: Attributes,
    pub expires_in: Duration,
}

/// The non-payload part of a create request, sent as JSON.
#[derive(Debug, Serialize)]
pub(crate) struct EntityMetadata<'a> {
    pub content_type: &'a str,
    pub attributes: &'a Attributes,
    pub expires_in_secs: u64,
}

/// Returned by the gateway once the create transaction is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEntity {
    pub entity_key: String,
    pub tx_hash: String,
}

/// An entity as returned by queries. Payloads are not included.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_key: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// One page of query results.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryPage {
    #[serde(default)]
    pub entities: Vec<Entity>,
    pub cursor: Option<String>,
}

/// Body of an attribute update.
#[derive(Debug, Serialize)]
pub(crate) struct AttributeUpdate<'a> {
    pub attributes: &'a Attributes,
    pub expires_in_secs: u64,
}
