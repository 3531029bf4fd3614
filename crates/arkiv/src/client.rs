//! HTTP client for the Arkiv gateway.
//!
//! Every request carries the API key as a bearer token. Non-2xx
//! responses are turned into [`ArkivError::Api`] with the body kept for
//! debugging.

use std::time::Duration;

use reqwest::multipart::{Form, Part};

use crate::error::ArkivError;
use crate::types::{
    AttributeUpdate, Attributes, CreatedEntity, Entity, EntityMetadata, NewEntity, QueryPage,
};

/// Requests that get no answer within this window are failed.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct ArkivClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ArkivClient {
    /// * `base_url` - gateway root, e.g. `https://gateway.example/v1`.
    /// * `api_key`  - bearer token authorizing writes for one account.
    pub fn new(base_url: &str, api_key: String) -> Result<Self, ArkivError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create an entity and wait for its transaction to be confirmed.
    ///
    /// The payload is sent as a binary multipart part; attributes,
    /// content type and expiry as a JSON `metadata` part.
    pub async fn create_entity(&self, entity: &NewEntity) -> Result<CreatedEntity, ArkivError> {
        let metadata = serde_json::to_string(&EntityMetadata {
            content_type: &entity.content_type,
            attributes: &entity.attributes,
            expires_in_secs: entity.expires_in.as_secs(),
        })?;

        let payload = Part::bytes(entity.payload.clone())
            .file_name("payload")
            .mime_str(&entity.content_type)
            .map_err(|_| ArkivError::InvalidContentType(entity.content_type.clone()))?;
        let form = Form::new()
            .part("payload", payload)
            .text("metadata", metadata);

        let response = self
            .client
            .post(format!("{}/entities", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let created: CreatedEntity = Self::parse_response(response).await?;
        tracing::debug!(
            entity_key = %created.entity_key,
            tx_hash = %created.tx_hash,
            size = entity.payload.len(),
            "Arkiv entity created",
        );
        Ok(created)
    }

    /// Run an attribute query such as `app = "CCats" && type = "image"`
    /// and return every matching entity, following result cursors.
    pub async fn query_entities(&self, query: &str) -> Result<Vec<Entity>, ArkivError> {
        let mut entities = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self.query_page(query, cursor.as_deref()).await?;
            entities.extend(page.entities);
            match page.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(entities)
    }

    /// Replace the attributes of an existing entity.
    ///
    /// The gateway requires the expiry to be restated on every update.
    pub async fn update_entity(
        &self,
        entity_key: &str,
        attributes: &Attributes,
        expires_in: Duration,
    ) -> Result<(), ArkivError> {
        let body = AttributeUpdate {
            attributes,
            expires_in_secs: expires_in.as_secs(),
        };

        let response = self
            .client
            .put(format!("{}/entities/{}", self.base_url, entity_key))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Whether the gateway answers its health endpoint.
    pub async fn is_connected(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Arkiv health check failed");
                false
            }
        }
    }

    // ---- private helpers ----

    async fn query_page(&self, query: &str, cursor: Option<&str>) -> Result<QueryPage, ArkivError> {
        let mut request = self
            .client
            .get(format!("{}/entities", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("query", query)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await?;
        Self::parse_response(response).await
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ArkivError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ArkivError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ArkivError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
