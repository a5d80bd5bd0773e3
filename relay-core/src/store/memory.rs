use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{CollectionStatus, CollectionStore};
use crate::error::StoreError;

/// Volatile backend, used for `--in-memory` runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn read_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    async fn append(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError> {
        self.collections.insert(collection.to_string(), records);
        Ok(())
    }

    async fn status(&self, collection: &str) -> CollectionStatus {
        let records = self.collections.get(collection);
        let size_bytes = records
            .as_ref()
            .and_then(|records| serde_json::to_vec(records.value()).ok())
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);

        CollectionStatus {
            collection: collection.to_string(),
            location: None,
            exists: records.is_some(),
            size_bytes,
        }
    }
}
