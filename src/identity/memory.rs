use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::directory::{UserDirectory, UserRecord};

/// User directory backed by a map; for tests and local runs.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        self.users
            .write()
            .expect("rwlock poisoned")
            .insert(user.uid.clone(), user);
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn get_user(
        &self,
        uid: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<UserRecord>>> + Send + '_>> {
        let user = self.users.read().expect("rwlock poisoned").get(uid).cloned();
        Box::pin(async move { Ok(user) })
    }
}
