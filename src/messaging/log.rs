//! Messenger that only logs.  Default for local development.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use super::gateway::{Messenger, NotificationPayload, SendOutcome};

#[derive(Debug, Default)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
    fn send_to_devices<'a>(
        &'a self,
        tokens: &'a [String],
        payload: &'a NotificationPayload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SendOutcome>>> + Send + 'a>> {
        Box::pin(async move {
            info!(
                devices = tokens.len(),
                title = %payload.title,
                body = %payload.body,
                "notification (log messenger)"
            );
            Ok(tokens.iter().map(|_| Ok(())).collect())
        })
    }
}
