//! Repair of remote image entities whose `id` attribute was stored as a
//! string instead of an integer.
//!
//! The repair is split into [`scan`] (read-only, produces a
//! [`RepairPlan`]) and [`apply`], so the caller can show the plan and ask
//! for confirmation in between.

use async_trait::async_trait;
use genpipe_arkiv::{ArkivClient, ArkivError, AttributeValue, Attributes, Entity, ENTITY_TTL};
use serde::Serialize;

/// Read/update access to the remote entity catalog.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    /// All image entities belonging to `app`.
    async fn find_images(&self, app: &str) -> Result<Vec<Entity>, ArkivError>;

    async fn set_attributes(&self, entity_key: &str, attributes: &Attributes)
        -> Result<(), ArkivError>;
}

#[async_trait]
impl EntityCatalog for ArkivClient {
    async fn find_images(&self, app: &str) -> Result<Vec<Entity>, ArkivError> {
        let query = format!("app = \"{app}\" && type = \"image\"");
        self.query_entities(&query).await
    }

    async fn set_attributes(
        &self,
        entity_key: &str,
        attributes: &Attributes,
    ) -> Result<(), ArkivError> {
        self.update_entity(entity_key, attributes, ENTITY_TTL).await
    }
}

/// How an entity's `id` attribute is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdForm {
    Integer(i64),
    /// A string that parses as an integer; needs fixing.
    NumericString(i64),
    /// A string that is not a number; cannot be fixed automatically.
    NonNumeric(String),
    Missing,
}

pub fn classify(attributes: &Attributes) -> IdForm {
    match attributes.get("id") {
        None => IdForm::Missing,
        Some(AttributeValue::Int(v)) => IdForm::Integer(*v),
        Some(AttributeValue::Text(raw)) => match raw.trim().parse::<i64>() {
            Ok(v) => IdForm::NumericString(v),
            Err(_) => IdForm::NonNumeric(raw.clone()),
        },
    }
}

/// One entity that will be rewritten.
#[derive(Debug, Clone)]
pub struct RepairCandidate {
    pub entity_key: String,
    pub old_id: String,
    pub new_id: i64,
    /// The full attribute set with `id` already converted.
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default)]
pub struct RepairPlan {
    pub scanned: usize,
    pub candidates: Vec<RepairCandidate>,
    /// Entity keys whose `id` is a non-numeric string.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub scanned: usize,
    pub to_fix: usize,
    pub fixed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Find every image entity of `app` whose `id` needs converting.
pub async fn scan(catalog: &dyn EntityCatalog, app: &str) -> Result<RepairPlan, ArkivError> {
    let entities = catalog.find_images(app).await?;
    let mut plan = RepairPlan {
        scanned: entities.len(),
        ..RepairPlan::default()
    };

    for entity in entities {
        match classify(&entity.attributes) {
            IdForm::NumericString(new_id) => {
                let old_id = entity.attributes["id"].as_text().unwrap_or_default().to_string();
                let mut attributes = entity.attributes;
                attributes.insert("id".to_string(), AttributeValue::Int(new_id));
                plan.candidates.push(RepairCandidate {
                    entity_key: entity.entity_key,
                    old_id,
                    new_id,
                    attributes,
                });
            }
            IdForm::NonNumeric(raw) => {
                tracing::warn!(
                    entity_key = %entity.entity_key,
                    id = %raw,
                    "Entity id is not a number, skipping",
                );
                plan.skipped.push(entity.entity_key);
            }
            IdForm::Integer(_) | IdForm::Missing => {}
        }
    }

    tracing::info!(
        scanned = plan.scanned,
        to_fix = plan.candidates.len(),
        skipped = plan.skipped.len(),
        "Entity scan complete",
    );
    Ok(plan)
}

/// Rewrite every candidate in `plan`. Individual failures are counted,
/// not returned.
pub async fn apply(catalog: &dyn EntityCatalog, plan: &RepairPlan) -> RepairReport {
    let mut report = RepairReport {
        scanned: plan.scanned,
        to_fix: plan.candidates.len(),
        skipped: plan.skipped.len(),
        ..RepairReport::default()
    };

    for (i, candidate) in plan.candidates.iter().enumerate() {
        match catalog
            .set_attributes(&candidate.entity_key, &candidate.attributes)
            .await
        {
            Ok(()) => {
                report.fixed += 1;
                tracing::info!(
                    entity_key = %candidate.entity_key,
                    new_id = candidate.new_id,
                    progress = %format!("{}/{}", i + 1, report.to_fix),
                    "Fixed entity id",
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    entity_key = %candidate.entity_key,
                    error = %e,
                    "Failed to fix entity id",
                );
            }
        }
    }

    report
}
