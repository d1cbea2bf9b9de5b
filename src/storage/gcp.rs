//! GCP Cloud Storage backend.
//!
//! Talks to the GCS JSON API using `reqwest`.  Unlike a single-bucket
//! gateway, the bucket comes from each finalize event, so one backend
//! serves every bucket the service account can reach.
//!
//! Signed URLs use the V2 scheme (`GoogleAccessId`/`Expires`/`Signature`)
//! because V4 caps lifetimes at seven days and links recorded by the
//! thumbnail pipeline are meant to be effectively permanent.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use super::backend::{unix_seconds, ObjectStorage};
use crate::credentials::GoogleCredentials;

/// GCS JSON API base URL.
const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// GCS upload base URL (for media uploads).
const GCS_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Characters left unescaped in object names inside URL paths (`/` kept).
const OBJECT_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
struct GcsObject {
    #[serde(rename = "md5Hash")]
    md5_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

/// Object storage backed by Google Cloud Storage.
pub struct GcsBackend {
    credentials: Arc<GoogleCredentials>,
}

impl GcsBackend {
    pub fn new(credentials: Arc<GoogleCredentials>) -> Self {
        Self { credentials }
    }

    /// URL-encode a GCS name for use as a single API path segment.
    fn url_encode_object_name(name: &str) -> String {
        utf8_percent_encode(name, NON_ALPHANUMERIC).to_string()
    }

    /// Base64-encoded MD5 digest, the form GCS reports in `md5Hash`.
    fn compute_md5_base64(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        STANDARD.encode(hasher.finalize())
    }

    /// Map a GCS HTTP error to an anyhow error with context.
    fn map_gcs_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        if let Ok(err_resp) = serde_json::from_str::<GcsErrorResponse>(body) {
            if let Some(err) = err_resp.error {
                return anyhow::anyhow!(
                    "GCS {}: {} (code {})",
                    context,
                    err.message.unwrap_or_default(),
                    err.code.unwrap_or(status.as_u16())
                );
            }
        }
        anyhow::anyhow!("GCS {context}: HTTP {status} - {body}")
    }

    /// V2 string-to-sign for a GET link.
    fn v2_string_to_sign(bucket: &str, path: &str, expires: u64) -> String {
        format!(
            "GET\n\n\n{}\n/{}/{}",
            expires,
            bucket,
            utf8_percent_encode(path, OBJECT_PATH)
        )
    }

    /// Assemble the final V2 signed URL.
    fn v2_signed_url(
        bucket: &str,
        path: &str,
        expires: u64,
        access_id: &str,
        signature: &[u8],
    ) -> String {
        format!(
            "{}/{}/{}?GoogleAccessId={}&Expires={}&Signature={}",
            GCS_API_BASE,
            bucket,
            utf8_percent_encode(path, OBJECT_PATH),
            utf8_percent_encode(access_id, NON_ALPHANUMERIC),
            expires,
            utf8_percent_encode(&STANDARD.encode(signature), NON_ALPHANUMERIC)
        )
    }
}

impl ObjectStorage for GcsBackend {
    fn download(
        &self,
        bucket: &str,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Bytes>> + Send + '_>> {
        let url = format!(
            "{}/storage/v1/b/{}/o/{}?alt=media",
            GCS_API_BASE,
            Self::url_encode_object_name(bucket),
            Self::url_encode_object_name(path)
        );
        let object = format!("{bucket}/{path}");
        Box::pin(async move {
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .get(&url)
                .headers(auth)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS download request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                if status == StatusCode::NOT_FOUND {
                    return Err(anyhow::anyhow!("Object not found: {object}"));
                }
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("download", status, &body));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| anyhow::anyhow!("GCS download body read failed: {e}"))?;
            debug!("Downloaded {} bytes from gs://{}", body.len(), object);
            Ok(body)
        })
    }

    fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let url = format!(
            "{}/b/{}/o?uploadType=media&name={}",
            GCS_UPLOAD_BASE,
            Self::url_encode_object_name(bucket),
            Self::url_encode_object_name(path)
        );
        let content_type = content_type.to_string();
        let object = format!("{bucket}/{path}");
        Box::pin(async move {
            let expected_md5 = Self::compute_md5_base64(&data);
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .post(&url)
                .headers(auth)
                .header(CONTENT_TYPE, content_type)
                .body(data)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS upload request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("upload", status, &body));
            }

            let stored: GcsObject = resp.json().await?;
            if let Some(md5_hash) = stored.md5_hash {
                if md5_hash != expected_md5 {
                    anyhow::bail!(
                        "GCS upload integrity check failed for {object}: expected md5 {expected_md5}, got {md5_hash}"
                    );
                }
            }
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
            let expires = unix_seconds(expires_at);
            let string_to_sign = Self::v2_string_to_sign(&bucket, &path, expires);
            let (access_id, signature) = self
                .credentials
                .sign_bytes(string_to_sign.as_bytes())
                .await?;
            Ok(Self::v2_signed_url(
                &bucket, &path, expires, &access_id, &signature,
            ))
        })
    }
}
