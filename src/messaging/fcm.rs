//! Firebase Cloud Messaging (HTTP v1) messenger.
//!
//! The v1 API accepts one token per request, so a batch is sent as a
//! sequence of `messages:send` calls.  Error responses are classified from
//! the `FcmError` detail `errorCode`, falling back to the HTTP status.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::gateway::{Messenger, NotificationPayload, SendError, SendOutcome};
use crate::credentials::GoogleCredentials;

const FCM_API_BASE: &str = "https://fcm.googleapis.com/v1";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<Value>,
}

pub struct FcmMessenger {
    credentials: Arc<GoogleCredentials>,
    send_url: String,
}

impl FcmMessenger {
    pub fn new(project: &str, credentials: Arc<GoogleCredentials>) -> Self {
        Self {
            credentials,
            send_url: format!("{FCM_API_BASE}/projects/{project}/messages:send"),
        }
    }

    async fn send_one(&self, token: &str, body: &Value) -> anyhow::Result<SendOutcome> {
        let auth = self.credentials.auth_headers().await?;
        let resp = self
            .credentials
            .client()
            .post(&self.send_url)
            .headers(auth)
            .json(body)
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => return Ok(Err(SendError::Other(format!("FCM request failed: {e}")))),
        };

        let status = resp.status();
        if status.is_success() {
            debug!(token = %token, "FCM message accepted");
            return Ok(Ok(()));
        }
        let text = resp.text().await.unwrap_or_default();
        Ok(Err(classify_error(status.as_u16(), &text)))
    }
}

/// Build the `messages:send` request body for one token.
pub fn message_body(token: &str, payload: &NotificationPayload) -> Value {
    let mut message = json!({
        "token": token,
        "notification": {
            "title": payload.title,
            "body": payload.body,
        },
    });
    if let Some(icon) = &payload.icon {
        message["webpush"] = json!({ "notification": { "icon": icon } });
        message["android"] = json!({ "notification": { "icon": icon } });
    }
    json!({ "message": message })
}

/// Map an FCM error response to a [`SendError`].
///
/// Only errors that are about the token itself are stale: `UNREGISTERED`,
/// and `INVALID_ARGUMENT` when it names `message.token` or the registration
/// token.  Anything else, including `SENDER_ID_MISMATCH` and payload-level
/// `INVALID_ARGUMENT`, is reported as [`SendError::Other`].
pub fn classify_error(status: u16, body: &str) -> SendError {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return SendError::Other(format!("HTTP {status}: {body}"));
    };
    let error = envelope.error;

    let code = error
        .details
        .iter()
        .find_map(|d| d.get("errorCode").and_then(Value::as_str))
        .unwrap_or(error.status.as_str());
    match code {
        "UNREGISTERED" => SendError::NotRegistered,
        "INVALID_ARGUMENT" if names_token(&error) => SendError::InvalidRegistration,
        _ => SendError::Other(format!("HTTP {status} {code}: {}", error.message)),
    }
}

fn names_token(error: &ErrorBody) -> bool {
    let violation_on_token = error
        .details
        .iter()
        .filter_map(|d| d.get("fieldViolations").and_then(Value::as_array))
        .flatten()
        .filter_map(|v| v.get("field").and_then(Value::as_str))
        .any(|field| field == "message.token");
    violation_on_token || error.message.to_ascii_lowercase().contains("registration token")
}

impl Messenger for FcmMessenger {
    fn send_to_devices<'a>(
        &'a self,
        tokens: &'a [String],
        payload: &'a NotificationPayload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SendOutcome>>> + Send + 'a>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(tokens.len());
            for token in tokens {
                let outcome = self
                    .send_one(token, &message_body(token, payload))
                    .await
                    .unwrap_or_else(|e| Err(SendError::Other(format!("FCM auth failed: {e:#}"))));
                if let Err(ref e) = outcome {
                    warn!(token = %token, error = %e, "FCM send failed");
                }
                outcomes.push(outcome);
            }
            Ok(outcomes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_body_with_icon() {
        let payload = NotificationPayload {
            title: "Tienes un nuevo seguidor!".to_string(),
            body: "Ana es ahora tu seguidor.".to_string(),
            icon: Some("https://example.com/ana.png".to_string()),
        };
        let body = message_body("tok-1", &payload);
        assert_eq!(body["message"]["token"], "tok-1");
        assert_eq!(body["message"]["notification"]["title"], payload.title);
        assert_eq!(
            body["message"]["webpush"]["notification"]["icon"],
            "https://example.com/ana.png"
        );
    }

    #[test]
    fn test_message_body_without_icon() {
        let payload = NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            icon: None,
        };
        let body = message_body("tok-1", &payload);
        assert!(body["message"].get("webpush").is_none());
    }

    #[test]
    fn test_classify_unregistered() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;
        assert_eq!(classify_error(404, body), SendError::NotRegistered);
    }

    #[test]
    fn test_classify_invalid_argument() {
        let body = r#"{"error":{"code":400,"message":"The registration token is not a valid FCM registration token","status":"INVALID_ARGUMENT",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"INVALID_ARGUMENT"}]}}"#;
        assert_eq!(classify_error(400, body), SendError::InvalidRegistration);
    }

    #[test]
    fn test_classify_token_field_violation() {
        let body = r#"{"error":{"code":400,"message":"Request contains an invalid argument.","status":"INVALID_ARGUMENT",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"INVALID_ARGUMENT"},
                {"@type":"type.googleapis.com/google.rpc.BadRequest","fieldViolations":[{"field":"message.token","description":"Invalid registration token"}]}]}}"#;
        assert_eq!(classify_error(400, body), SendError::InvalidRegistration);
    }

    #[test]
    fn test_classify_payload_invalid_argument_keeps_token() {
        let body = r#"{"error":{"code":400,"message":"Invalid value at 'message.android.notification.color' (TYPE_STRING), \"red\"","status":"INVALID_ARGUMENT",
            "details":[{"@type":"type.googleapis.com/google.rpc.BadRequest","fieldViolations":[{"field":"message.android.notification.color","description":"Invalid value"}]},
                {"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"INVALID_ARGUMENT"}]}}"#;
        let err = classify_error(400, body);
        assert!(matches!(err, SendError::Other(_)));
        assert!(!err.is_stale_token());
    }

    #[test]
    fn test_classify_sender_id_mismatch_keeps_token() {
        let body = r#"{"error":{"code":403,"message":"SenderId mismatch","status":"PERMISSION_DENIED",
            "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"SENDER_ID_MISMATCH"}]}}"#;
        assert!(!classify_error(403, body).is_stale_token());
    }

    #[test]
    fn test_classify_not_found_without_code_keeps_token() {
        let body = r#"{"error":{"code":404,"message":"Project not found","status":"NOT_FOUND"}}"#;
        assert!(!classify_error(404, body).is_stale_token());
    }

    #[tokio::test]
    async fn test_auth_failure_is_reported_per_token() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.json");
        std::fs::write(&key, "not json").unwrap();
        let creds = GoogleCredentials::new(reqwest::Client::new(), key.to_str().unwrap(), "");
        let messenger = FcmMessenger::new("demo", Arc::new(creds));
        let payload = NotificationPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            icon: None,
        };
        let tokens = vec!["tok-1".to_string(), "tok-2".to_string()];

        let outcomes = messenger.send_to_devices(&tokens, &payload).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert!(matches!(outcome, Err(SendError::Other(_))));
        }
    }

    #[test]
    fn test_classify_other() {
        let body = r#"{"error":{"code":503,"message":"unavailable","status":"UNAVAILABLE"}}"#;
        assert!(matches!(classify_error(503, body), SendError::Other(_)));
        assert!(matches!(classify_error(502, "<html>"), SendError::Other(_)));
    }
}
