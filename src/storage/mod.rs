//! Durable key-value storage for client-side state.
//!
//! [`KeyValueStore`] is the minimal contract the client needs from the host.
//! [`FileStore`] keeps one JSON document per key on disk.
//! [`MemoryStore`] keeps everything in process and is used by tests.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use anyhow::Result;

/// Key holding the persisted notification log.
pub const NOTIFICATIONS_KEY: &str = "busAppNotifications";
/// Key holding the bearer token for the backend.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// A string-valued key-value store with durable writes.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Returns the stored access token, if any.
pub fn load_access_token(store: &dyn KeyValueStore) -> Result<Option<String>> {
    Ok(store
        .get(ACCESS_TOKEN_KEY)?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty()))
}

pub fn save_access_token(store: &dyn KeyValueStore, token: &str) -> Result<()> {
    store.set(ACCESS_TOKEN_KEY, token)
}

/// Forgets the access token (logout).
pub fn clear_access_token(store: &dyn KeyValueStore) -> Result<()> {
    store.remove(ACCESS_TOKEN_KEY)
}
