//! Storage Adapter: pluggable persistence for the session.
//!
//! An `async_trait` interface with a default in-memory implementation used
//! when the caller hasn't wired in a platform-specific one (localStorage,
//! a file, a keychain, ...).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

/// Pluggable key/value persistence used to store the auth session.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
	/// Reads a stored value, if present.
	async fn get_item(&self, key: &str) -> Option<String>;

	/// Stores a value under `key`, overwriting any previous value.
	async fn set_item(&self, key: &str, value: String);

	/// Removes a stored value.
	async fn remove_item(&self, key: &str);
}

/// In-memory storage adapter, the default when no platform adapter is given.
///
/// Data does not survive process restart; callers that need persistence
/// across runs should supply their own [`StorageAdapter`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
	items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
	/// Creates an empty in-memory store.
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
	async fn get_item(&self, key: &str) -> Option<String> {
		self.items.lock().unwrap().get(key).cloned()
	}

	async fn set_item(&self, key: &str, value: String) {
		self.items.lock().unwrap().insert(key.to_string(), value);
	}

	async fn remove_item(&self, key: &str) {
		self.items.lock().unwrap().remove(key);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn round_trips_a_value() {
		let storage = MemoryStorage::new();
		assert_eq!(storage.get_item("k").await, None);
		storage.set_item("k", "v".to_string()).await;
		assert_eq!(storage.get_item("k").await, Some("v".to_string()));
		storage.remove_item("k").await;
		assert_eq!(storage.get_item("k").await, None);
	}
}
