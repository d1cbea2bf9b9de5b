//! In-memory storage backend.
//!
//! Keeps objects in a `RwLock<HashMap>`.  Used for tests and ephemeral
//! runs; signed URLs use a `memory://` scheme and are never verified.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::SystemTime;

use super::backend::{unix_seconds, ObjectStorage};

/// A stored object and its content type.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Object storage held entirely in memory.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<(String, String), MemoryObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing the trait (test setup).
    pub fn insert(&self, bucket: &str, path: &str, data: impl Into<Bytes>, content_type: &str) {
        let mut objects = self.objects.write().expect("rwlock poisoned");
        objects.insert(
            (bucket.to_string(), path.to_string()),
            MemoryObject {
                data: data.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// Fetch a copy of an object, if present.
    pub fn object(&self, bucket: &str, path: &str) -> Option<MemoryObject> {
        let objects = self.objects.read().expect("rwlock poisoned");
        objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStorage for MemoryBackend {
    fn download(
        &self,
        bucket: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>> {
        let bucket = bucket.to_string();
        let path = path.to_string();
        Box::pin(async move {
            match self.object(&bucket, &path) {
                Some(obj) => Ok(obj.data),
                None => anyhow::bail!("Object not found: {}/{}", bucket, path),
            }
        })
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let path = path.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            self.insert(&bucket, &path, data, &content_type);
            Ok(())
        })
    }

    fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_at: SystemTime,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let url = format!(
            "memory://{}/{}?expires={}",
            bucket,
            path,
            unix_seconds(expires_at)
        );
        Box::pin(async move { Ok(url) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_upload_and_download() {
        let backend = MemoryBackend::new();
        backend
            .upload("b", "images/cat.png", Bytes::from("png"), "image/png")
            .await
            .unwrap();

        let data = backend.download("b", "images/cat.png").await.unwrap();
        assert_eq!(data, Bytes::from("png"));
        assert_eq!(
            backend.object("b", "images/cat.png").unwrap().content_type,
            "image/png"
        );
    }

    #[tokio::test]
    async fn test_download_missing_errors() {
        let backend = MemoryBackend::new();
        assert!(backend.download("b", "nope").await.is_err());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_embeds_expiry() {
        let backend = MemoryBackend::new();
        let expires = std::time::UNIX_EPOCH + Duration::from_secs(42);
        let url = backend.signed_url("b", "a/b.png", expires).await.unwrap();
        assert_eq!(url, "memory://b/a/b.png?expires=42");
    }
}
