use std::sync::Mutex;

use async_trait::async_trait;
use genpipe_arkiv::{ArkivError, AttributeValue, Attributes, Entity};
use genpipe_pipeline::repair::{self, EntityCatalog, RepairReport};

struct FakeCatalog {
    entities: Vec<Entity>,
    reject: Option<String>,
    updates: Mutex<Vec<(String, Attributes)>>,
}

impl FakeCatalog {
    fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            reject: None,
            updates: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EntityCatalog for FakeCatalog {
    async fn find_images(&self, app: &str) -> Result<Vec<Entity>, ArkivError> {
        Ok(self
            .entities
            .iter()
            .filter(|e| e.attributes.get("app") == Some(&AttributeValue::from(app)))
            .cloned()
            .collect())
    }

    async fn set_attributes(
        &self,
        entity_key: &str,
        attributes: &Attributes,
    ) -> Result<(), ArkivError> {
        if self.reject.as_deref() == Some(entity_key) {
            return Err(ArkivError::Api {
                status: 500,
                body: "nonce too low".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((entity_key.to_string(), attributes.clone()));
        Ok(())
    }
}

fn entity(key: &str, app: &str, id: Option<AttributeValue>) -> Entity {
    let mut attributes = genpipe_arkiv::image_attributes(app, "a cat", 0);
    attributes.remove("id");
    if let Some(id) = id {
        attributes.insert("id".to_string(), id);
    }
    Entity {
        entity_key: key.to_string(),
        attributes,
    }
}

fn mixed_catalog() -> FakeCatalog {
    FakeCatalog::new(vec![
        entity("0x01", "CCats", Some(AttributeValue::Int(1))),
        entity("0x02", "CCats", Some(AttributeValue::Text("2".into()))),
        entity("0x03", "CCats", Some(AttributeValue::Text("three".into()))),
        entity("0x04", "CCats", None),
        entity("0x05", "CCats", Some(AttributeValue::Text("5".into()))),
        entity("0x06", "OtherApp", Some(AttributeValue::Text("6".into()))),
    ])
}

#[tokio::test]
async fn scan_finds_only_numeric_string_ids_of_the_app() {
    let catalog = mixed_catalog();

    let plan = repair::scan(&catalog, "CCats").await.unwrap();

    assert_eq!(plan.scanned, 5);
    let keys: Vec<_> = plan.candidates.iter().map(|c| c.entity_key.as_str()).collect();
    assert_eq!(keys, ["0x02", "0x05"]);
    assert_eq!(plan.skipped, vec!["0x03".to_string()]);
    assert_eq!(plan.candidates[0].old_id, "2");
    assert_eq!(plan.candidates[0].new_id, 2);
    assert!(catalog.updates.lock().unwrap().is_empty(), "scan never writes");
}

#[tokio::test]
async fn apply_rewrites_ids_and_keeps_other_attributes() {
    let catalog = mixed_catalog();
    let plan = repair::scan(&catalog, "CCats").await.unwrap();

    let report = repair::apply(&catalog, &plan).await;

    assert_eq!(
        report,
        RepairReport {
            scanned: 5,
            to_fix: 2,
            fixed: 2,
            failed: 0,
            skipped: 1,
        }
    );
    let updates = catalog.updates.lock().unwrap();
    let (key, attrs) = &updates[0];
    assert_eq!(key, "0x02");
    assert_eq!(attrs["id"], AttributeValue::Int(2));
    assert_eq!(attrs["app"], AttributeValue::from("CCats"));
    assert_eq!(attrs["prompt"], AttributeValue::from("a cat"));
}

#[tokio::test]
async fn apply_counts_failures_and_continues() {
    let mut catalog = mixed_catalog();
    catalog.reject = Some("0x02".to_string());
    let plan = repair::scan(&catalog, "CCats").await.unwrap();

    let report = repair::apply(&catalog, &plan).await;

    assert_eq!(report.fixed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(catalog.updates.lock().unwrap()[0].0, "0x05");
}
