//! Push gateway trait.
//!
//! A [`Messenger`] delivers one notification payload to a batch of device
//! tokens and reports one [`SendOutcome`] per token, in input order.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Title, body and icon of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Per-token delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The token is malformed or belongs to another sender.
    #[error("invalid registration token")]
    InvalidRegistration,
    /// The token was valid once but the app instance is gone.
    #[error("registration token is not registered")]
    NotRegistered,
    #[error("{0}")]
    Other(String),
}

impl SendError {
    /// Whether the token should be dropped from the device registry.
    pub fn is_stale_token(&self) -> bool {
        matches!(self, SendError::InvalidRegistration | SendError::NotRegistered)
    }
}

/// Result of sending to a single token.
pub type SendOutcome = Result<(), SendError>;

/// Async push gateway contract.
pub trait Messenger: Send + Sync + 'static {
    /// Send `payload` to every token; the returned vector has exactly one
    /// entry per token.  `Err` means the batch as a whole could not be sent.
    fn send_to_devices<'a>(
        &'a self,
        tokens: &'a [String],
        payload: &'a NotificationPayload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SendOutcome>>> + Send + 'a>>;
}
