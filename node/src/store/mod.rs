//! Document mirror of confirmed ledger records.
//!
//! Documents are JSON objects. A filter matches a document when the document
//! contains it, with the semantics of the Postgres `@>` operator. Upserts
//! merge the patch field by field; versioned upserts skip documents that are
//! already as new as the patch.

mod memory;
mod postgres;

use std::future::Future;

use pharmachain_common::TrackerError;
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub trait DocumentStore: Send + Sync + 'static {
    fn find_one(
        &self,
        collection: &str,
        filter: Value,
    ) -> impl Future<Output = Result<Option<Value>, TrackerError>> + Send;

    fn upsert(
        &self,
        collection: &str,
        filter: Value,
        patch: Value,
    ) -> impl Future<Output = Result<(), TrackerError>> + Send;

    /// Upsert that leaves a matching document alone unless its `version`
    /// field is missing or lower than `version`.
    fn upsert_versioned(
        &self,
        collection: &str,
        filter: Value,
        patch: Value,
        version: u64,
    ) -> impl Future<Output = Result<(), TrackerError>> + Send;
}

/// JSON containment: objects contain every filter key with a contained
/// value, arrays contain every filter element somewhere, scalars are equal.
pub(crate) fn matches(doc: &Value, filter: &Value) -> bool {
    match (doc, filter) {
        (Value::Object(doc), Value::Object(filter)) => filter
            .iter()
            .all(|(k, v)| doc.get(k).is_some_and(|d| matches(d, v))),
        (Value::Array(doc), Value::Array(filter)) => filter
            .iter()
            .all(|v| doc.iter().any(|d| matches(d, v))),
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (doc, filter) => doc == filter,
    }
}

pub(crate) fn stored_version(doc: &Value) -> Option<u64> {
    doc.get("version").and_then(Value::as_u64)
}

/// Merge the top-level fields of `patch` into `doc`.
pub(crate) fn merge_fields(doc: &mut Value, patch: &Value) {
    if let (Some(doc), Some(patch)) = (doc.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            doc.insert(k.clone(), v.clone());
        }
    }
}

fn require_object(what: &str, value: &Value) -> Result<(), TrackerError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(TrackerError::StoreFailed(format!("{what} must be a JSON object")))
    }
}

/// Store selected at start-up.
#[derive(Clone)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl DocumentStore for StoreBackend {
    async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>, TrackerError> {
        require_object("filter", &filter)?;
        match self {
            StoreBackend::Memory(store) => store.find_one(collection, filter).await,
            StoreBackend::Postgres(store) => store.find_one(collection, filter).await,
        }
    }

    async fn upsert(&self, collection: &str, filter: Value, patch: Value) -> Result<(), TrackerError> {
        require_object("filter", &filter)?;
        require_object("patch", &patch)?;
        match self {
            StoreBackend::Memory(store) => store.upsert(collection, filter, patch).await,
            StoreBackend::Postgres(store) => store.upsert(collection, filter, patch).await,
        }
    }

    async fn upsert_versioned(
        &self,
        collection: &str,
        filter: Value,
        patch: Value,
        version: u64,
    ) -> Result<(), TrackerError> {
        require_object("filter", &filter)?;
        require_object("patch", &patch)?;
        match self {
            StoreBackend::Memory(store) => {
                store.upsert_versioned(collection, filter, patch, version).await
            }
            StoreBackend::Postgres(store) => {
                store.upsert_versioned(collection, filter, patch, version).await
            }
        }
    }
}
