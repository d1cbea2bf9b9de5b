//! In-memory messenger for tests.
//!
//! Records every delivery and answers with scripted per-token failures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::gateway::{Messenger, NotificationPayload, SendError, SendOutcome};

#[derive(Default)]
pub struct MemoryMessenger {
    failures: Mutex<HashMap<String, SendError>>,
    sent: Mutex<Vec<(String, NotificationPayload)>>,
}

impl MemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send to `token` fail with `error`.
    pub fn fail_token(&self, token: &str, error: SendError) {
        self.failures
            .lock()
            .expect("mutex poisoned")
            .insert(token.to_string(), error);
    }

    /// Successful deliveries so far, as `(token, payload)`.
    pub fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().expect("mutex poisoned").clone()
    }
}

impl Messenger for MemoryMessenger {
    fn send_to_devices<'a>(
        &'a self,
        tokens: &'a [String],
        payload: &'a NotificationPayload,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<SendOutcome>>> + Send + 'a>> {
        Box::pin(async move {
            let failures = self.failures.lock().expect("mutex poisoned");
            let mut sent = self.sent.lock().expect("mutex poisoned");
            let outcomes = tokens
                .iter()
                .map(|token| match failures.get(token) {
                    Some(err) => Err(err.clone()),
                    None => {
                        sent.push((token.clone(), payload.clone()));
                        Ok(())
                    }
                })
                .collect();
            Ok(outcomes)
        })
    }
}
