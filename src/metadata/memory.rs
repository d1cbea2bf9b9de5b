//! In-memory document store.
//!
//! Stores all documents in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access;
//! each collection is a `Vec` so insertion order is list order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{Document, DocumentStore, Fields};

pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of a collection (test helper).
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().expect("rwlock poisoned");
        collections.get(collection).cloned().unwrap_or_default()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn append(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let collection = collection.to_string();
        Box::pin(async move {
            let id = uuid::Uuid::new_v4().simple().to_string();
            let mut collections = self.collections.write().expect("rwlock poisoned");
            collections.entry(collection).or_default().push(Document {
                id: id.clone(),
                fields,
            });
            Ok(id)
        })
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Document>>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let collections = self.collections.read().expect("rwlock poisoned");
            Ok(collections
                .get(&collection)
                .and_then(|docs| docs.iter().find(|d| d.id == id).cloned()))
        })
    }

    fn list(
        &self,
        collection: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Document>>> + Send + '_>> {
        let collection = collection.to_string();
        Box::pin(async move { Ok(self.documents(&collection)) })
    }

    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut collections = self.collections.write().expect("rwlock poisoned");
            if let Some(docs) = collections.get_mut(&collection) {
                docs.retain(|d| d.id != id);
            }
            Ok(())
        })
    }

    fn put(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut collections = self.collections.write().expect("rwlock poisoned");
            let docs = collections.entry(collection).or_default();
            match docs.iter_mut().find(|d| d.id == id) {
                Some(existing) => existing.fields = fields,
                None => docs.push(Document { id, fields }),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(key: &str, value: &str) -> Fields {
        let mut f = Fields::new();
        f.insert(key.to_string(), json!(value));
        f
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryDocumentStore::new();
        let a = store.append("images", fields("n", "a")).await.unwrap();
        let b = store.append("images", fields("n", "b")).await.unwrap();
        assert_ne!(a, b);

        let docs = store.list("images").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, a);
        assert_eq!(docs[1].str_field("n"), Some("b"));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryDocumentStore::new();
        store
            .put("ProfileAssociated", "p1", fields("paAssociatedId", "u1"))
            .await
            .unwrap();
        let doc = store.get("ProfileAssociated", "p1").await.unwrap().unwrap();
        assert_eq!(doc.str_field("paAssociatedId"), Some("u1"));

        store
            .put("ProfileAssociated", "p1", fields("paAssociatedId", "u2"))
            .await
            .unwrap();
        assert_eq!(store.documents("ProfileAssociated").len(), 1);

        store.delete("ProfileAssociated", "p1").await.unwrap();
        assert!(store.get("ProfileAssociated", "p1").await.unwrap().is_none());
        // Idempotent.
        store.delete("ProfileAssociated", "p1").await.unwrap();
        store.delete("Nope", "p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_collection_is_empty() {
        let store = MemoryDocumentStore::new();
        assert!(store.list("InfoDevice").await.unwrap().is_empty());
    }
}
