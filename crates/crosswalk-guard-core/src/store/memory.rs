//! In-process store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{apply_patch, Collection, CreateOutcome, DocumentStore, FieldPatch};
use crate::error::StoreError;

/// Process-local [`DocumentStore`] for single-instance deployments and
/// tests.
///
/// Holds the same document schema a shared store would, with the same
/// patch semantics; swapping it for a networked implementation changes no
/// caller. Keys are kept sorted so enumeration order is deterministic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    crosswalks: RwLock<BTreeMap<String, Value>>,
    leases: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, collection: Collection) -> &RwLock<BTreeMap<String, Value>> {
        match collection {
            Collection::Crosswalks => &self.crosswalks,
            Collection::Leases => &self.leases,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.collection(collection).read().get(key).cloned())
    }

    async fn create_if_absent(
        &self,
        collection: Collection,
        key: &str,
        initial: Value,
    ) -> Result<CreateOutcome, StoreError> {
        let mut documents = self.collection(collection).write();
        if documents.contains_key(key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        documents.insert(key.to_owned(), initial);
        Ok(CreateOutcome::Created)
    }

    async fn update(
        &self,
        collection: Collection,
        key: &str,
        patches: &[FieldPatch],
    ) -> Result<(), StoreError> {
        let mut documents = self.collection(collection).write();
        let doc = documents
            .entry(key.to_owned())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        for patch in patches {
            apply_patch(doc, patch);
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        Ok(self.collection(collection).write().remove(key).is_some())
    }

    async fn list_keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        Ok(self.collection(collection).read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_if_absent_outcomes() {
        let store = MemoryStore::new();
        let first = store
            .create_if_absent(Collection::Leases, "1", json!({"acquired_at": 1}))
            .await
            .unwrap();
        assert_eq!(first, CreateOutcome::Created);

        let second = store
            .create_if_absent(Collection::Leases, "1", json!({"acquired_at": 2}))
            .await
            .unwrap();
        assert_eq!(second, CreateOutcome::AlreadyExists);

        // The losing create must not have replaced the document.
        let doc = store.get(Collection::Leases, "1").await.unwrap().unwrap();
        assert_eq!(doc["acquired_at"], 1);
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let store = MemoryStore::new();
        assert!(!store.delete(Collection::Leases, "1").await.unwrap());
        store
            .create_if_absent(Collection::Leases, "1", json!({}))
            .await
            .unwrap();
        assert!(store.delete(Collection::Leases, "1").await.unwrap());
        assert!(store.get(Collection::Leases, "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_creates_and_merges() {
        let store = MemoryStore::new();
        store
            .update(
                Collection::Crosswalks,
                "7",
                &[
                    FieldPatch::array_union("peds", json!("p1")),
                    FieldPatch::set("drivers.d1.distance", json!(40.0)),
                ],
            )
            .await
            .unwrap();

        let doc = store
            .get(Collection::Crosswalks, "7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"peds": ["p1"], "drivers": {"d1": {"distance": 40.0}}}));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = MemoryStore::new();
        store
            .create_if_absent(Collection::Crosswalks, "1", json!({}))
            .await
            .unwrap();
        assert!(store.get(Collection::Leases, "1").await.unwrap().is_none());
        assert_eq!(
            store.list_keys(Collection::Crosswalks).await.unwrap(),
            vec!["1"]
        );
        assert!(store.list_keys(Collection::Leases).await.unwrap().is_empty());
    }
}
