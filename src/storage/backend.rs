//! Abstract object storage trait.
//!
//! Every storage backend must implement [`ObjectStorage`].  Objects are
//! addressed by `(bucket, path)` exactly as the storage platform reports
//! them in finalize events; backends never rewrite paths.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

/// Async object storage contract consumed by the thumbnail pipeline.
pub trait ObjectStorage: Send + Sync + 'static {
    /// Read the full object at `path` in `bucket`.
    fn download(
        &self,
        bucket: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>>;

    /// Write `data` to `path` in `bucket`, recording `content_type` as the
    /// object's content type metadata.
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Issue a read-only signed URL for `path` valid until `expires_at`.
    fn signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_at: SystemTime,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// Seconds since the Unix epoch for `time`, clamped at zero.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unix_seconds() {
        let t = std::time::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(unix_seconds(t), 1_700_000_000);
        assert_eq!(unix_seconds(std::time::UNIX_EPOCH), 0);
    }
}
