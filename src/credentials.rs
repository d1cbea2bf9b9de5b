//! Google Cloud credential resolution shared by every Google-backed
//! collaborator (Cloud Storage, Firestore, Firebase Auth, FCM).
//!
//! Access tokens are resolved in this order:
//!   1. An explicit service account / ADC file from the config
//!   2. `GOOGLE_APPLICATION_CREDENTIALS`
//!   3. gcloud application-default credentials
//!   4. `GOOGLE_OAUTH_ACCESS_TOKEN`, then the GCE metadata server
//!
//! Tokens are cached until 60 seconds before they expire.  The same handle
//! signs arbitrary bytes (for signed URLs) with the service account private
//! key when one is available, or through the IAM Credentials `signBlob` API
//! otherwise.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// OAuth2 scope requested for every token.
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default OAuth2 token endpoint.
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// GCE metadata server base.
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// IAM Credentials API base.
const IAM_CREDENTIALS_BASE: &str = "https://iamcredentials.googleapis.com/v1";

/// Fields of a service account or ADC JSON file that we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsFile {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub client_email: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Claims of the JWT bearer assertion exchanged for an access token.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Resolves and caches Google OAuth2 access tokens.
pub struct GoogleCredentials {
    client: reqwest::Client,
    /// Explicit credentials file from configuration, if any.
    credentials_file: Option<String>,
    /// Service account used for IAM `signBlob` when no key is on hand.
    signing_account: Option<String>,
    token_cache: Mutex<Option<CachedToken>>,
}

impl GoogleCredentials {
    /// Create a credential resolver. Empty strings are treated as unset.
    pub fn new(
        client: reqwest::Client,
        credentials_file: &str,
        signing_account: &str,
    ) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            client,
            credentials_file: non_empty(credentials_file),
            signing_account: non_empty(signing_account),
            token_cache: Mutex::new(None),
        }
    }

    /// Build the shared HTTP client used by the Google-backed collaborators.
    pub fn http_client() -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))
    }

    /// The HTTP client this handle authenticates for.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Return a valid access token, refreshing it when the cached one expired.
    pub async fn access_token(&self) -> anyhow::Result<String> {
        {
            let cache = self.token_cache.lock().expect("token cache mutex poisoned");
            if let Some(ref cached) = *cache {
                if cached.expiry > Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let (token, expires_in) = self.fetch_access_token().await?;
        let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        {
            let mut cache = self.token_cache.lock().expect("token cache mutex poisoned");
            *cache = Some(CachedToken {
                access_token: token.clone(),
                expiry,
            });
        }

        Ok(token)
    }

    /// Build an `Authorization: Bearer` header map.
    pub async fn auth_headers(&self) -> anyhow::Result<HeaderMap> {
        let token = self.access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid auth header value: {e}"))?,
        );
        Ok(headers)
    }

    /// Sign `data` with RSA-SHA256 as the service account.
    ///
    /// Returns the signing account's email and the raw signature bytes.
    pub async fn sign_bytes(&self, data: &[u8]) -> anyhow::Result<(String, Vec<u8>)> {
        if let Some(creds) = self.load_credentials_file().await? {
            if let (Some(email), Some(pem)) = (creds.client_email, creds.private_key) {
                let signature = sign_rs256(data, &pem)?;
                return Ok((email, signature));
            }
        }

        let account = match &self.signing_account {
            Some(account) => account.clone(),
            None => self.metadata_service_account_email().await?,
        };
        let signature = self.sign_blob(&account, data).await?;
        Ok((account, signature))
    }

    // -- Token sources --------------------------------------------------------

    async fn fetch_access_token(&self) -> anyhow::Result<(String, u64)> {
        if let Some(creds) = self.load_credentials_file().await? {
            return self.token_from_credentials(creds).await;
        }
        self.token_from_metadata_server().await
    }

    /// Locate and parse the first available credentials file.
    async fn load_credentials_file(&self) -> anyhow::Result<Option<CredentialsFile>> {
        let path = match &self.credentials_file {
            Some(path) => Some(path.clone()),
            None => match std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
                Ok(path) => Some(path),
                Err(_) => {
                    let adc_path = application_default_credentials_path();
                    match tokio::fs::try_exists(&adc_path).await {
                        Ok(true) => Some(adc_path),
                        _ => None,
                    }
                }
            },
        };

        let Some(path) = path else {
            return Ok(None);
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read credentials file {path}: {e}"))?;
        let creds = parse_credentials(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse credentials file {path}: {e}"))?;
        Ok(Some(creds))
    }

    async fn token_from_credentials(&self, creds: CredentialsFile) -> anyhow::Result<(String, u64)> {
        match creds.kind.as_str() {
            "service_account" => {
                let email = creds
                    .client_email
                    .ok_or_else(|| anyhow::anyhow!("Missing client_email in service account key"))?;
                let pem = creds
                    .private_key
                    .ok_or_else(|| anyhow::anyhow!("Missing private_key in service account key"))?;
                let token_uri = creds
                    .token_uri
                    .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());
                self.exchange_jwt_for_token(&email, &pem, &token_uri).await
            }
            "authorized_user" => {
                self.token_from_refresh(
                    creds.client_id.as_deref().unwrap_or(""),
                    creds.client_secret.as_deref().unwrap_or(""),
                    creds.refresh_token.as_deref().unwrap_or(""),
                )
                .await
            }
            other => Err(anyhow::anyhow!("Unsupported credential type: {other}")),
        }
    }

    /// Exchange a signed JWT assertion for an access token.
    async fn exchange_jwt_for_token(
        &self,
        client_email: &str,
        private_key_pem: &str,
        token_uri: &str,
    ) -> anyhow::Result<(String, u64)> {
        let assertion = build_assertion(client_email, private_key_pem, token_uri, unix_now())?;

        let resp = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("JWT token exchange request failed: {e}"))?;

        parse_token_response(resp, "JWT token exchange").await
    }

    /// Exchange a refresh token for an access token.
    async fn token_from_refresh(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> anyhow::Result<(String, u64)> {
        let resp = self
            .client
            .post(DEFAULT_TOKEN_URI)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token refresh request failed: {e}"))?;

        parse_token_response(resp, "Token refresh").await
    }

    async fn token_from_metadata_server(&self) -> anyhow::Result<(String, u64)> {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            return Ok((token, 3600));
        }

        let resp = self
            .client
            .get(format!(
                "{METADATA_BASE}/instance/service-accounts/default/token"
            ))
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Metadata server request failed: {e}. \
                     Set GOOGLE_APPLICATION_CREDENTIALS, run 'gcloud auth application-default login', \
                     or set GOOGLE_OAUTH_ACCESS_TOKEN."
                )
            })?;

        parse_token_response(resp, "Metadata server").await
    }

    // -- Signing --------------------------------------------------------------

    async fn metadata_service_account_email(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(format!(
                "{METADATA_BASE}/instance/service-accounts/default/email"
            ))
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Metadata email request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "Metadata server returned {} for service account email; \
                 set storage.gcp.signing_service_account",
                resp.status()
            ));
        }
        Ok(resp.text().await?.trim().to_string())
    }

    async fn sign_blob(&self, account: &str, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        debug!("Signing {} bytes via IAM signBlob as {}", data.len(), account);
        let auth = self.auth_headers().await?;
        let url = format!("{IAM_CREDENTIALS_BASE}/projects/-/serviceAccounts/{account}:signBlob");

        let resp = self
            .client
            .post(&url)
            .headers(auth)
            .json(&serde_json::json!({ "payload": STANDARD.encode(data) }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("signBlob request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("signBlob failed ({status}): {body}"));
        }

        let body: serde_json::Value = resp.json().await?;
        let signed = body
            .get("signedBlob")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No signedBlob in signBlob response"))?;
        STANDARD
            .decode(signed)
            .map_err(|e| anyhow::anyhow!("Invalid signedBlob encoding: {e}"))
    }
}

// -- Helpers ------------------------------------------------------------------

/// Parse a credentials JSON document.
pub fn parse_credentials(contents: &str) -> anyhow::Result<CredentialsFile> {
    Ok(serde_json::from_str(contents)?)
}

/// Get the path to gcloud application-default credentials.
fn application_default_credentials_path() -> String {
    if let Ok(config_dir) = std::env::var("CLOUDSDK_CONFIG") {
        return format!("{config_dir}/application_default_credentials.json");
    }
    if let Ok(home) = std::env::var("HOME") {
        return format!("{home}/.config/gcloud/application_default_credentials.json");
    }
    ".config/gcloud/application_default_credentials.json".to_string()
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn assertion_claims(client_email: &str, token_uri: &str, now: u64) -> AssertionClaims {
    AssertionClaims {
        iss: client_email.to_string(),
        scope: CLOUD_PLATFORM_SCOPE.to_string(),
        aud: token_uri.to_string(),
        iat: now,
        exp: now + 3600,
    }
}

fn build_assertion(
    client_email: &str,
    private_key_pem: &str,
    token_uri: &str,
    now: u64,
) -> anyhow::Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid service account private key: {e}"))?;
    let claims = assertion_claims(client_email, token_uri, now);
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| anyhow::anyhow!("Failed to sign JWT assertion: {e}"))
}

/// RSA-SHA256 signature over `data` with a PEM private key.
fn sign_rs256(data: &[u8], private_key_pem: &str) -> anyhow::Result<Vec<u8>> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid service account private key: {e}"))?;
    let encoded = jsonwebtoken::crypto::sign(data, &key, Algorithm::RS256)
        .map_err(|e| anyhow::anyhow!("RSA signing failed: {e}"))?;
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| anyhow::anyhow!("Invalid signature encoding: {e}"))
}

async fn parse_token_response(resp: reqwest::Response, context: &str) -> anyhow::Result<(String, u64)> {
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        warn!("{context} failed ({status})");
        return Err(anyhow::anyhow!("{context} failed ({status}): {body}"));
    }

    let token_resp: serde_json::Value = resp.json().await?;
    let access_token = token_resp
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("No access_token in {context} response"))?
        .to_string();
    let expires_in = token_resp
        .get("expires_in")
        .and_then(|v| v.as_u64())
        .unwrap_or(3600);

    Ok((access_token, expires_in))
}
