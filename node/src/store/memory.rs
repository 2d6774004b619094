use std::sync::Arc;

use dashmap::DashMap;
use pharmachain_common::TrackerError;
use serde_json::{Map, Value};

use super::{matches, merge_fields, stored_version, DocumentStore};

/// Process-local document store, one vector of documents per collection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<DashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn write(&self, collection: &str, filter: &Value, patch: &Value, version: Option<u64>) {
        // The entry guard holds the shard lock, so concurrent upserts on one
        // collection serialize here.
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| matches(d, filter)) {
            Some(doc) => {
                if version.is_none() || stored_version(doc) < version {
                    merge_fields(doc, patch);
                }
            }
            None => {
                let mut doc = Value::Object(Map::new());
                merge_fields(&mut doc, filter);
                merge_fields(&mut doc, patch);
                docs.push(doc);
            }
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>, TrackerError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, &filter)).cloned()))
    }

    async fn upsert(&self, collection: &str, filter: Value, patch: Value) -> Result<(), TrackerError> {
        self.write(collection, &filter, &patch, None);
        Ok(())
    }

    async fn upsert_versioned(
        &self,
        collection: &str,
        filter: Value,
        patch: Value,
        version: u64,
    ) -> Result<(), TrackerError> {
        self.write(collection, &filter, &patch, Some(version));
        Ok(())
    }
}
