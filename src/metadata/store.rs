//! Abstract document store trait.
//!
//! Any database backend must implement [`DocumentStore`].  Documents are
//! flat-ish JSON objects grouped into named collections; the trait uses
//! manually desugared async methods (pinned futures) like the storage
//! layer so backends can be held as `Arc<dyn DocumentStore>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// Document body: a JSON object.
pub type Fields = Map<String, Value>;

/// A document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// String value of `field`, if present and a string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// A `{path, thumbnail}` entry in the images list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Signed URL of the original object.
    pub path: String,
    /// Signed URL of the generated thumbnail.
    pub thumbnail: String,
}

impl ImageRecord {
    /// Convert into document fields.
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("path".to_string(), Value::String(self.path.clone()));
        fields.insert(
            "thumbnail".to_string(),
            Value::String(self.thumbnail.clone()),
        );
        fields
    }

    /// Parse from document fields.
    pub fn from_fields(fields: &Fields) -> Option<Self> {
        Some(Self {
            path: fields.get("path")?.as_str()?.to_string(),
            thumbnail: fields.get("thumbnail")?.as_str()?.to_string(),
        })
    }
}

/// Async document store contract.
pub trait DocumentStore: Send + Sync + 'static {
    /// Append a new document with a generated id to `collection`,
    /// returning the id.  Existing documents are never touched.
    fn append(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Fetch a document by id.
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Document>>> + Send + '_>>;

    /// List every document in `collection` in insertion order.
    fn list(
        &self,
        collection: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Document>>> + Send + '_>>;

    /// Delete a document. Deleting a missing document succeeds.
    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Write a document under a caller-chosen id, replacing any existing one.
    fn put(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
