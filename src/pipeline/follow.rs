//! New-follower push notifications.
//!
//! When a follow document is created, the follower's profile is resolved to
//! a user account, and a notification is fanned out to every registered
//! device.  Tokens the gateway reports as invalid or unregistered have their
//! device documents removed.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::NotificationsConfig;
use crate::errors::NotifyError;
use crate::identity::directory::{UserDirectory, UserRecord};
use crate::messaging::gateway::{Messenger, NotificationPayload};
use crate::metadata::store::{Document, DocumentStore, Fields};
use crate::metrics::{NOTIFICATIONS_TOTAL, TOKENS_REMOVED_TOTAL};

/// Follow document field naming the follower's associated profile.
pub const FOLLOWER_PROFILE_FIELD: &str = "pafProfileAssociatedId";
/// Profile document field holding the account uid.
pub const PROFILE_USER_FIELD: &str = "paAssociatedId";
/// Device document field holding the registration token.
pub const DEVICE_TOKEN_FIELD: &str = "idRegid";

/// A newly created follow document.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowCreated {
    pub follow_id: String,
    pub fields: Fields,
}

/// Summary of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub sent: usize,
    pub failed: usize,
    pub removed: usize,
}

pub struct FollowNotifier {
    store: Arc<dyn DocumentStore>,
    directory: Arc<dyn UserDirectory>,
    messenger: Arc<dyn Messenger>,
    config: NotificationsConfig,
}

impl FollowNotifier {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        directory: Arc<dyn UserDirectory>,
        messenger: Arc<dyn Messenger>,
        config: NotificationsConfig,
    ) -> Self {
        Self {
            store,
            directory,
            messenger,
            config,
        }
    }

    /// Collection whose creations trigger a notification.
    pub fn follow_collection(&self) -> &str {
        &self.config.follow_collection
    }

    /// Payload shown to followed users.
    pub fn payload_for(&self, user: &UserRecord) -> NotificationPayload {
        let name = user.display_name.as_deref().unwrap_or(&user.uid);
        NotificationPayload {
            title: self.config.title.clone(),
            body: self.config.body_template.replace("{displayName}", name),
            icon: user.photo_url.clone(),
        }
    }

    #[instrument(skip(self, event), fields(follow_id = %event.follow_id))]
    pub async fn run(&self, event: &FollowCreated) -> Result<FanOutReport, NotifyError> {
        let result = self.notify(event).await;
        match &result {
            Ok(report) => {
                info!(
                    sent = report.sent,
                    failed = report.failed,
                    removed = report.removed,
                    "follow notification fan-out finished"
                );
                counter!(NOTIFICATIONS_TOTAL, "result" => "sent").increment(report.sent as u64);
                counter!(NOTIFICATIONS_TOTAL, "result" => "failed").increment(report.failed as u64);
                counter!(TOKENS_REMOVED_TOTAL).increment(report.removed as u64);
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "follow notification aborted");
                counter!(NOTIFICATIONS_TOTAL, "result" => "error").increment(1);
            }
        }
        result
    }

    async fn notify(&self, event: &FollowCreated) -> Result<FanOutReport, NotifyError> {
        let profile_id = event
            .fields
            .get(FOLLOWER_PROFILE_FIELD)
            .and_then(|v| v.as_str())
            .ok_or_else(|| NotifyError::MissingField {
                document: event.follow_id.clone(),
                field: FOLLOWER_PROFILE_FIELD,
            })?;
        info!(profile = %profile_id, "resolving follower");

        let profile = self
            .store
            .get(&self.config.profile_collection, profile_id)
            .await
            .map_err(NotifyError::Store)?
            .ok_or_else(|| NotifyError::ProfileNotFound(profile_id.to_string()))?;
        let uid = profile
            .str_field(PROFILE_USER_FIELD)
            .ok_or_else(|| NotifyError::MissingField {
                document: profile.id.clone(),
                field: PROFILE_USER_FIELD,
            })?;
        info!(uid = %uid, "follower account resolved");

        let (devices, user) = tokio::join!(
            self.store.list(&self.config.devices_collection),
            self.directory.get_user(uid),
        );
        let devices = devices.map_err(NotifyError::Store)?;
        let user = user
            .map_err(NotifyError::Directory)?
            .ok_or_else(|| NotifyError::UserNotFound(uid.to_string()))?;

        let targets = device_tokens(&devices);
        if targets.is_empty() {
            info!("there are no notification tokens to send to");
            return Ok(FanOutReport::default());
        }

        let tokens: Vec<String> = targets.iter().map(|(_, t)| t.clone()).collect();
        let payload = self.payload_for(&user);
        let outcomes = self
            .messenger
            .send_to_devices(&tokens, &payload)
            .await
            .map_err(NotifyError::Messaging)?;

        let mut report = FanOutReport::default();
        for ((device_id, token), outcome) in targets.iter().zip(outcomes) {
            let Err(err) = outcome else {
                report.sent += 1;
                continue;
            };
            report.failed += 1;
            warn!(token = %token, error = %err, "failure sending notification");
            if !err.is_stale_token() {
                continue;
            }
            match self
                .store
                .delete(&self.config.devices_collection, device_id)
                .await
            {
                Ok(()) => {
                    info!(device = %device_id, "removed stale device token");
                    report.removed += 1;
                }
                Err(e) => warn!(device = %device_id, error = %e, "failed to remove stale device"),
            }
        }
        Ok(report)
    }
}

/// `(document id, token)` for each device document carrying a token.
fn device_tokens(devices: &[Document]) -> Vec<(String, String)> {
    devices
        .iter()
        .filter_map(|doc| {
            doc.str_field(DEVICE_TOKEN_FIELD)
                .filter(|t| !t.is_empty())
                .map(|t| (doc.id.clone(), t.to_string()))
        })
        .collect()
}
