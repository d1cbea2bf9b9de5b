//! Local filesystem storage backend.
//!
//! Objects are stored as files at `{root}/{bucket}/{path}`; the content type
//! of each object lives in a sidecar file at `{root}/.meta/{bucket}/{path}`.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.
//!
//! Signed URLs are issued against a configurable public base URL and carry
//! an HMAC-SHA256 signature over `GET\n{expires}\n/{bucket}/{path}`.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use std::future::Future;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use super::backend::{unix_seconds, ObjectStorage};

/// Characters left unescaped in a URL path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Stores objects on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all stored objects.
    root: PathBuf,
    /// HMAC key for signed URLs.
    signing_secret: Vec<u8>,
    /// Base URL signed links point at (no trailing slash).
    public_base_url: String,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(
        root: impl Into<PathBuf>,
        signing_secret: &str,
        public_base_url: &str,
    ) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            signing_secret: signing_secret.as_bytes().to_vec(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve `(bucket, path)` below `base`, rejecting traversal.
    fn resolve_under(base: &Path, bucket: &str, path: &str) -> anyhow::Result<PathBuf> {
        for part in [bucket, path] {
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(_) | Component::CurDir => {}
                    _ => anyhow::bail!("Path traversal detected in object path: {}/{}", bucket, path),
                }
            }
        }
        if bucket.is_empty() || path.is_empty() {
            anyhow::bail!("Empty bucket or object path");
        }
        Ok(base.join(bucket).join(path))
    }

    fn object_path(&self, bucket: &str, path: &str) -> anyhow::Result<PathBuf> {
        Self::resolve_under(&self.root, bucket, path)
    }

    fn meta_path(&self, bucket: &str, path: &str) -> anyhow::Result<PathBuf> {
        Self::resolve_under(&self.root.join(".meta"), bucket, path)
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }

    /// Crash-only write: temp file, fsync, rename.
    fn write_atomic(&self, final_path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, final_path)?;
        Ok(())
    }

    /// Content type recorded for an object, if any.
    pub fn content_type(&self, bucket: &str, path: &str) -> anyhow::Result<Option<String>> {
        let meta = self.meta_path(bucket, path)?;
        if !meta.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(meta)?))
    }

    /// Compute the hex HMAC-SHA256 signature for a link.
    fn sign(&self, bucket: &str, path: &str, expires: u64) -> String {
        let string_to_sign = format!("GET\n{expires}\n/{bucket}/{path}");
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.signing_secret)
            .expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a link signature.  Expired links never verify.
    pub fn verify_signature(
        &self,
        bucket: &str,
        path: &str,
        expires: u64,
        signature: &str,
        now: SystemTime,
    ) -> bool {
        if expires < unix_seconds(now) {
            return false;
        }
        let expected = self.sign(bucket, path, expires);
        expected
            .as_bytes()
            .ct_eq(signature.to_ascii_lowercase().as_bytes())
            .into()
    }

    /// Build the signed link for `(bucket, path)` expiring at `expires`.
    fn build_signed_url(&self, bucket: &str, path: &str, expires: u64) -> String {
        let encoded_path = path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}?expires={}&signature={}",
            self.public_base_url,
            utf8_percent_encode(bucket, PATH_SEGMENT),
            encoded_path,
            expires,
            self.sign(bucket, path, expires)
        )
    }
}

impl ObjectStorage for LocalBackend {
    fn download(
        &self,
        bucket: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>> {
        let bucket = bucket.to_string();
        let path = path.to_string();
        Box::pin(async move {
            let file = self.object_path(&bucket, &path)?;
            if !file.is_file() {
                anyhow::bail!("Object not found: {}/{}", bucket, path);
            }
            let data = tokio::fs::read(&file).await?;
            Ok(Bytes::from(data))
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
            let file = self.object_path(&bucket, &path)?;
            let meta = self.meta_path(&bucket, &path)?;
            self.write_atomic(&file, &data)?;
            self.write_atomic(&meta, content_type.as_bytes())?;
            Ok(())
        })
    }

    fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_at: SystemTime,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let bucket = bucket.to_string();
        let path = path.to_string();
        Box::pin(async move {
            // Validate the path even though nothing is read.
            self.object_path(&bucket, &path)?;
            Ok(self.build_signed_url(&bucket, &path, unix_seconds(expires_at)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend =
            LocalBackend::new(dir.path(), "secret", "http://localhost:8080/objects/").unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn test_upload_and_download_roundtrip() {
        let (_dir, backend) = test_backend();
        let data = Bytes::from("fake png bytes");
        backend
            .upload("photos", "images/cat.png", data.clone(), "image/png")
            .await
            .unwrap();

        let read = backend.download("photos", "images/cat.png").await.unwrap();
        assert_eq!(read, data);
        assert_eq!(
            backend.content_type("photos", "images/cat.png").unwrap(),
            Some("image/png".to_string())
        );
        assert!(backend.root.join("photos/images/cat.png").is_file());
    }

    #[tokio::test]
    async fn test_download_missing_errors() {
        let (_dir, backend) = test_backend();
        assert!(backend.download("photos", "missing.png").await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, backend) = test_backend();
        let result = backend
            .upload("photos", "../escape.png", Bytes::from("x"), "image/png")
            .await;
        assert!(result.is_err());
        assert!(backend.download("..", "x.png").await.is_err());
        assert!(backend.download("photos", "/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_signed_url_is_deterministic() {
        let (_dir, backend) = test_backend();
        let expires = std::time::UNIX_EPOCH + Duration::from_secs(1_000);
        let a = backend
            .signed_url("photos", "images/my cat.png", expires)
            .await
            .unwrap();
        let b = backend
            .signed_url("photos", "images/my cat.png", expires)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("http://localhost:8080/objects/photos/images/my%20cat.png?expires=1000&signature="));
    }

    #[test]
    fn test_signature_depends_on_path_and_expiry() {
        let (_dir, backend) = test_backend();
        let base = backend.sign("photos", "a.png", 10);
        assert_eq!(base.len(), 64);
        assert_ne!(base, backend.sign("photos", "b.png", 10));
        assert_ne!(base, backend.sign("photos", "a.png", 11));
    }

    #[test]
    fn test_verify_signature() {
        let (_dir, backend) = test_backend();
        let now = std::time::UNIX_EPOCH + Duration::from_secs(100);
        let sig = backend.sign("photos", "a.png", 1_000);
        assert!(backend.verify_signature("photos", "a.png", 1_000, &sig, now));
        assert!(!backend.verify_signature("photos", "b.png", 1_000, &sig, now));
        assert!(!backend.verify_signature("photos", "a.png", 1_001, &sig, now));
        assert!(!backend.verify_signature("photos", "a.png", 1_000, "zz", now));

        let later = std::time::UNIX_EPOCH + Duration::from_secs(2_000);
        assert!(!backend.verify_signature("photos", "a.png", 1_000, &sig, later));
    }
}
