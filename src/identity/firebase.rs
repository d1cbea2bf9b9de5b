//! Firebase Authentication user directory.
//!
//! Uses the Identity Toolkit admin endpoint
//! `projects/{project}/accounts:lookup` with OAuth2 credentials.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use super::directory::{UserDirectory, UserRecord};
use crate::credentials::GoogleCredentials;

const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    display_name: Option<String>,
    photo_url: Option<String>,
}

pub struct FirebaseUserDirectory {
    credentials: Arc<GoogleCredentials>,
    lookup_url: String,
}

impl FirebaseUserDirectory {
    pub fn new(project: &str, credentials: Arc<GoogleCredentials>) -> Self {
        Self {
            credentials,
            lookup_url: format!("{IDENTITY_TOOLKIT_BASE}/projects/{project}/accounts:lookup"),
        }
    }
}

fn first_user(body: &str) -> anyhow::Result<Option<UserRecord>> {
    let parsed: LookupResponse = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("Invalid accounts:lookup response: {e}"))?;
    Ok(parsed.users.into_iter().next().map(|u| UserRecord {
        uid: u.local_id,
        display_name: u.display_name,
        photo_url: u.photo_url,
    }))
}

impl UserDirectory for FirebaseUserDirectory {
    fn get_user(
        &self,
        uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserRecord>>> + Send + '_>> {
        let body = json!({ "localId": [uid] });
        Box::pin(async move {
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .post(&self.lookup_url)
                .headers(auth)
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("accounts:lookup request failed: {e}"))?;

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                anyhow::bail!("accounts:lookup: HTTP {status} - {text}");
            }
            first_user(&text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_user_parses_profile() {
        let body = r#"{"kind":"identitytoolkit#GetAccountInfoResponse","users":[
            {"localId":"u1","displayName":"Ana","photoUrl":"https://example.com/a.png","email":"a@example.com"}]}"#;
        let user = first_user(body).unwrap().unwrap();
        assert_eq!(user.uid, "u1");
        assert_eq!(user.display_name.as_deref(), Some("Ana"));
        assert_eq!(user.photo_url.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn test_first_user_missing() {
        let body = r#"{"kind":"identitytoolkit#GetAccountInfoResponse"}"#;
        assert!(first_user(body).unwrap().is_none());
        assert!(first_user("not json").is_err());
    }
}
