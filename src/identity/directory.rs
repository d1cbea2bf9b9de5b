//! User directory trait.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// The subset of an account the notifier needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Looks up user accounts by uid.
pub trait UserDirectory: Send + Sync + 'static {
    /// `Ok(None)` when no account has this uid.
    fn get_user(
        &self,
        uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserRecord>>> + Send + '_>>;
}
