use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared `account id -> DirectCast API key` map.
///
/// Clones share the same underlying map, so a key invalidated by one feed is gone for every
/// client of that account.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    keys: Arc<RwLock<HashMap<String, String>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &str) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account_id)
            .cloned()
    }

    pub fn set(&self, account_id: impl Into<String>, api_key: impl Into<String>) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account_id.into(), api_key.into());
    }

    /// Drops the stored key. Returns whether a key was present.
    pub fn invalidate(&self, account_id: &str) -> bool {
        let removed = self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(account_id)
            .is_some();
        if removed {
            tracing::warn!(
                event = "credential_invalidated",
                account_id,
                "cleared DirectCast API key after authentication failure"
            );
        }
        removed
    }
}
