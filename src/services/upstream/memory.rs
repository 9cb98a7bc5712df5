//! In-process resource store.
//!
//! Used when no upstream is configured (local development) and by the router tests.
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::{ResourceStore, StoreError, StoreResult};
use crate::services::resources::ResourceKind;

#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    items: RwLock<HashMap<ResourceKind, BTreeMap<String, Value>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert items as-is; items without an identifier are skipped.
    pub fn seed(&self, kind: ResourceKind, items: impl IntoIterator<Item = Value>) {
        let mut guard = self.items.write();
        let bucket = guard.entry(kind).or_default();
        for item in items {
            if let Some(id) = kind.item_id(&item) {
                bucket.insert(id, item);
            }
        }
    }
}

fn with_id(kind: ResourceKind, mut item: Value, id: &str) -> StoreResult<Value> {
    match item.as_object_mut() {
        Some(obj) => {
            obj.insert(kind.id_field().to_string(), Value::String(id.to_string()));
            Ok(item)
        }
        None => Err(StoreError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        )),
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list(&self, kind: ResourceKind) -> StoreResult<Vec<Value>> {
        Ok(self
            .items
            .read()
            .get(&kind)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> StoreResult<Value> {
        self.items
            .read()
            .get(&kind)
            .and_then(|bucket| bucket.get(id))
            .cloned()
            .ok_or(StoreError::NotFound(kind))
    }

    async fn create(&self, kind: ResourceKind, item: Value) -> StoreResult<Value> {
        let id = kind
            .item_id(&item)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let item = with_id(kind, item, &id)?;

        let mut guard = self.items.write();
        let bucket = guard.entry(kind).or_default();
        if bucket.contains_key(&id) {
            return Err(StoreError::Conflict);
        }
        bucket.insert(id, item.clone());
        Ok(item)
    }

    async fn update(&self, kind: ResourceKind, id: &str, item: Value) -> StoreResult<Value> {
        let item = with_id(kind, item, id)?;

        let mut guard = self.items.write();
        let slot = guard
            .get_mut(&kind)
            .and_then(|bucket| bucket.get_mut(id))
            .ok_or(StoreError::NotFound(kind))?;
        *slot = item.clone();
        Ok(item)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> StoreResult<()> {
        self.items
            .write()
            .get_mut(&kind)
            .and_then(|bucket| bucket.remove(id))
            .map(|_| ())
            .ok_or(StoreError::NotFound(kind))
    }
}
