//! GCP Firestore document store backend.
//!
//! Collection/document design using the Firestore REST API via reqwest.
//! Plain JSON fields are translated to and from Firestore's typed value
//! representation (`stringValue`, `integerValue`, `mapValue`, ...).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::store::{Document, DocumentStore, Fields};
use crate::config::FirestoreConfig;
use crate::credentials::GoogleCredentials;

/// Firestore REST API base URL.
const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";

/// Characters left unescaped in a document id.
const DOCUMENT_ID: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Page size used when listing collections.
const LIST_PAGE_SIZE: u32 = 300;

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(rename = "createTime", default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct FirestoreDocumentStore {
    credentials: Arc<GoogleCredentials>,
    /// `projects/{project}/databases/{database}/documents`
    documents_root: String,
}

impl FirestoreDocumentStore {
    pub fn new(config: &FirestoreConfig, credentials: Arc<GoogleCredentials>) -> Self {
        Self {
            credentials,
            documents_root: format!(
                "projects/{}/databases/{}/documents",
                config.project, config.database
            ),
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{FIRESTORE_API_BASE}/{}/{collection}", self.documents_root)
    }

    /// The id is escaped as a single path segment.
    fn document_url(&self, collection: &str, id: &str) -> anyhow::Result<String> {
        if id.is_empty() || id == "." || id == ".." {
            anyhow::bail!("invalid Firestore document id {id:?}");
        }
        Ok(format!(
            "{FIRESTORE_API_BASE}/{}/{collection}/{}",
            self.documents_root,
            utf8_percent_encode(id, DOCUMENT_ID)
        ))
    }

    async fn error_for(context: &str, resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::anyhow!("Firestore {context}: HTTP {status} - {body}")
    }
}

/// Last path segment of a Firestore resource name (the document id).
pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Encode a JSON value as a Firestore typed value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

/// Encode a JSON object as a Firestore `fields` map.
pub fn encode_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    )
}

/// Decode a Firestore typed value into plain JSON.
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };
    match kind.as_str() {
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "booleanValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        },
        "doubleValue" => inner.clone(),
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

/// Decode a Firestore `fields` map into a plain JSON object.
pub fn decode_fields(fields: &Map<String, Value>) -> Fields {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

fn into_document(doc: FirestoreDocument) -> Document {
    Document {
        id: document_id(&doc.name).to_string(),
        fields: decode_fields(&doc.fields),
    }
}

fn create_time_key(doc: &FirestoreDocument) -> Option<chrono::DateTime<chrono::Utc>> {
    doc.create_time
        .as_deref()
        .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&chrono::Utc))
}

impl DocumentStore for FirestoreDocumentStore {
    fn append(
        &self,
        collection: &str,
        fields: Fields,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let url = self.collection_url(collection);
        Box::pin(async move {
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .post(&url)
                .headers(auth)
                .json(&json!({ "fields": encode_fields(&fields) }))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Firestore create request failed: {e}"))?;

            if !resp.status().is_success() {
                return Err(Self::error_for("create", resp).await);
            }
            let created: FirestoreDocument = resp.json().await?;
            let id = document_id(&created.name).to_string();
            debug!("Created Firestore document {}", created.name);
            Ok(id)
        })
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Document>>> + Send + '_>> {
        let url = self.document_url(collection, id);
        Box::pin(async move {
            let url = url?;
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .get(&url)
                .headers(auth)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Firestore get request failed: {e}"))?;

            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(Self::error_for("get", resp).await);
            }
            let doc: FirestoreDocument = resp.json().await?;
            Ok(Some(into_document(doc)))
        })
    }

    fn list(
        &self,
        collection: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<Document>>> + Send + '_>> {
        let url = self.collection_url(collection);
        Box::pin(async move {
            let auth = self.credentials.auth_headers().await?;
            let mut all: Vec<FirestoreDocument> = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut req = self
                    .credentials
                    .client()
                    .get(&url)
                    .headers(auth.clone())
                    .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
                if let Some(ref token) = page_token {
                    req = req.query(&[("pageToken", token.as_str())]);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| anyhow::anyhow!("Firestore list request failed: {e}"))?;
                if !resp.status().is_success() {
                    return Err(Self::error_for("list", resp).await);
                }

                let page: ListDocumentsResponse = resp.json().await?;
                all.extend(page.documents);

                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }

            // Firestore lists by id; creation time gives insertion order.
            all.sort_by_key(create_time_key);
            Ok(all.into_iter().map(into_document).collect())
        })
    }

    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let url = self.document_url(collection, id);
        Box::pin(async move {
            let url = url?;
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .delete(&url)
                .headers(auth)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Firestore delete request failed: {e}"))?;

            if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
                return Err(Self::error_for("delete", resp).await);
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
        let url = self.document_url(collection, id);
        Box::pin(async move {
            let url = url?;
            let auth = self.credentials.auth_headers().await?;
            let resp = self
                .credentials
                .client()
                .patch(&url)
                .headers(auth)
                .json(&json!({ "fields": encode_fields(&fields) }))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Firestore patch request failed: {e}"))?;

            if !resp.status().is_success() {
                return Err(Self::error_for("patch", resp).await);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id() {
        assert_eq!(
            document_id("projects/p/databases/(default)/documents/InfoDevice/abc"),
            "abc"
        );
        assert_eq!(document_id("abc"), "abc");
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode_value(&json!("x")), json!({"stringValue": "x"}));
        assert_eq!(encode_value(&json!(7)), json!({"integerValue": "7"}));
        assert_eq!(encode_value(&json!(1.5)), json!({"doubleValue": 1.5}));
        assert_eq!(encode_value(&json!(true)), json!({"booleanValue": true}));
        assert_eq!(encode_value(&Value::Null), json!({"nullValue": null}));
    }

    #[test]
    fn test_encode_record() {
        let mut fields = Map::new();
        fields.insert("path".to_string(), json!("https://o"));
        fields.insert("thumbnail".to_string(), json!("https://t"));
        assert_eq!(
            encode_fields(&fields),
            json!({
                "path": {"stringValue": "https://o"},
                "thumbnail": {"stringValue": "https://t"}
            })
        );
    }

    #[test]
    fn test_decode_nested() {
        let raw = json!({
            "pafProfileAssociatedId": {"stringValue": "p1"},
            "count": {"integerValue": "12"},
            "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"booleanValue": false}]}},
            "meta": {"mapValue": {"fields": {"ok": {"booleanValue": true}}}},
            "createdAt": {"timestampValue": "2024-01-01T00:00:00Z"},
            "empty": {"arrayValue": {}}
        });
        let decoded = decode_fields(raw.as_object().unwrap());
        assert_eq!(decoded["pafProfileAssociatedId"], json!("p1"));
        assert_eq!(decoded["count"], json!(12));
        assert_eq!(decoded["tags"], json!(["a", false]));
        assert_eq!(decoded["meta"], json!({"ok": true}));
        assert_eq!(decoded["createdAt"], json!("2024-01-01T00:00:00Z"));
        assert_eq!(decoded["empty"], json!([]));
    }

    #[test]
    fn test_encode_then_decode_map() {
        let original = json!({"a": {"b": [1, "two", null]}, "c": 3.25});
        let encoded = encode_fields(original.as_object().unwrap());
        let decoded = decode_fields(encoded.as_object().unwrap());
        assert_eq!(Value::Object(decoded), original);
    }

    #[test]
    fn test_create_time_ordering() {
        let docs = vec![
            FirestoreDocument {
                name: "c/x/b".to_string(),
                fields: Map::new(),
                create_time: Some("2024-01-01T00:00:01.5Z".to_string()),
            },
            FirestoreDocument {
                name: "c/x/a".to_string(),
                fields: Map::new(),
                create_time: Some("2024-01-01T00:00:01.25Z".to_string()),
            },
        ];
        let mut docs = docs;
        docs.sort_by_key(create_time_key);
        assert_eq!(document_id(&docs[0].name), "a");
    }

    #[test]
    fn test_urls() {
        let store = FirestoreDocumentStore::new(
            &FirestoreConfig {
                project: "demo".to_string(),
                database: "(default)".to_string(),
                credentials_file: String::new(),
            },
            Arc::new(GoogleCredentials::new(reqwest::Client::new(), "", "")),
        );
        assert_eq!(
            store.document_url("InfoDevice", "d1").unwrap(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents/InfoDevice/d1"
        );
        assert!(store.collection_url("images").ends_with("/documents/images"));
    }

    #[test]
    fn test_document_id_is_one_segment() {
        let store = FirestoreDocumentStore::new(
            &FirestoreConfig {
                project: "demo".to_string(),
                ..FirestoreConfig::default()
            },
            Arc::new(GoogleCredentials::new(reqwest::Client::new(), "", "")),
        );
        let url = store.document_url("ProfileAssociated", "p1/../Other?x=1").unwrap();
        assert!(url.ends_with("/ProfileAssociated/p1%2F%2E%2E%2FOther%3Fx%3D1"));
        assert!(store.document_url("ProfileAssociated", "..").is_err());
        assert!(store.document_url("ProfileAssociated", "").is_err());
    }
}
