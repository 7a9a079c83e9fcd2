//! In-memory implementation of Storage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{Storage, StorageError};

/// Entry in the memory storage with optional expiration
struct MemoryEntry {
	value: Bytes,
	expires_at: Option<Instant>,
}

impl MemoryEntry {
	fn new(value: Bytes, ttl: Option<Duration>) -> Self {
		Self {
			value,
			expires_at: ttl.map(|d| Instant::now() + d),
		}
	}

	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|exp| now >= exp)
	}
}

/// In-memory implementation of Storage.
///
/// Suitable for tests and single-instance deployments. `create` holds the map
/// lock across the existence check and the insert, so it is a proper
/// create-if-absent for concurrent callers within one process.
#[derive(Default)]
pub struct MemoryStorage {
	data: Mutex<HashMap<String, MemoryEntry>>,
	ttl: Option<Duration>,
}

impl MemoryStorage {
	/// Create a new empty memory storage whose entries never expire.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a new empty memory storage whose entries expire `ttl` after they
	/// were created.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self {
			data: Mutex::new(HashMap::new()),
			ttl: Some(ttl),
		}
	}

	/// Drop all expired entries, returning how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut data = self.data.lock();
		let before = data.len();
		data.retain(|_, entry| !entry.is_expired(now));
		before - data.len()
	}

	pub fn ttl(&self) -> Option<Duration> {
		self.ttl
	}

	/// Get the number of entries in the storage (including expired ones).
	pub fn len(&self) -> usize {
		self.data.lock().len()
	}

	/// Check if the storage is empty.
	pub fn is_empty(&self) -> bool {
		self.data.lock().is_empty()
	}

	/// Return the live value under `key`, evicting it if it expired.
	fn live(data: &mut HashMap<String, MemoryEntry>, key: &str) -> Option<Bytes> {
		let entry = data.get(key)?;
		if entry.is_expired(Instant::now()) {
			data.remove(key);
			return None;
		}
		Some(entry.value.clone())
	}
}

impl std::fmt::Debug for MemoryStorage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryStorage")
			.field("entries", &self.len())
			.field("ttl", &self.ttl)
			.finish()
	}
}

#[async_trait]
impl Storage for MemoryStorage {
	async fn create(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
		let mut data = self.data.lock();
		if Self::live(&mut data, key).is_some() {
			return Err(StorageError::AlreadyExists(key.to_string()));
		}
		data.insert(key.to_string(), MemoryEntry::new(value, self.ttl));
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let mut data = self.data.lock();
		Ok(Self::live(&mut data, key).is_some())
	}

	async fn search(&self, key: &str) -> Result<Bytes, StorageError> {
		let mut data = self.data.lock();
		Self::live(&mut data, key).ok_or_else(|| StorageError::NotFound(key.to_string()))
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let prefix = format!("{}/", key.trim_end_matches('/'));
		let mut data = self.data.lock();
		data.retain(|k, _| k != key && !k.starts_with(&prefix));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use assert_matches::assert_matches;

	use super::*;

	#[tokio::test]
	async fn test_memory_storage_lifecycle() {
		let storage = MemoryStorage::new();
		let key = "test-key";
		let value = Bytes::from_static(b"test-value");

		assert!(!storage.exists(key).await.unwrap());

		storage.create(key, value.clone()).await.unwrap();
		assert!(storage.exists(key).await.unwrap());
		assert_eq!(storage.search(key).await.unwrap(), value);

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert_matches!(storage.search(key).await, Err(StorageError::NotFound(k)) if k == key);
	}

	#[tokio::test]
	async fn test_memory_storage_create_does_not_overwrite() {
		let storage = MemoryStorage::new();

		storage.create("key1", Bytes::from_static(b"value1")).await.unwrap();
		let err = storage
			.create("key1", Bytes::from_static(b"value2"))
			.await
			.unwrap_err();
		assert!(err.is_already_exists());

		assert_eq!(
			storage.search("key1").await.unwrap(),
			Bytes::from_static(b"value1")
		);
	}

	#[tokio::test]
	async fn test_memory_storage_ttl() {
		let storage = MemoryStorage::with_ttl(Duration::from_millis(50));

		storage.create("key1", Bytes::from_static(b"value1")).await.unwrap();
		assert!(storage.exists("key1").await.unwrap());

		tokio::time::sleep(Duration::from_millis(60)).await;

		assert!(!storage.exists("key1").await.unwrap());
		assert!(storage.search("key1").await.unwrap_err().is_not_found());
		// An expired key can be created again.
		storage.create("key1", Bytes::from_static(b"value2")).await.unwrap();
	}

	#[tokio::test]
	async fn test_memory_storage_purge_expired() {
		let storage = MemoryStorage::with_ttl(Duration::from_millis(20));
		storage.create("a", Bytes::new()).await.unwrap();
		storage.create("b", Bytes::new()).await.unwrap();
		assert_eq!(storage.len(), 2);

		tokio::time::sleep(Duration::from_millis(30)).await;

		assert_eq!(storage.purge_expired(), 2);
		assert!(storage.is_empty());
	}

	#[tokio::test]
	async fn test_memory_storage_delete_is_recursive() {
		let storage = MemoryStorage::new();
		storage
			.create("transaction/t1/trial/a", Bytes::new())
			.await
			.unwrap();
		storage
			.create("transaction/t1/response", Bytes::new())
			.await
			.unwrap();
		storage
			.create("transaction/t10/response", Bytes::new())
			.await
			.unwrap();

		storage.delete("transaction/t1/response").await.unwrap();
		assert!(storage.exists("transaction/t1/trial/a").await.unwrap());

		storage.delete("transaction/t1").await.unwrap();
		assert!(!storage.exists("transaction/t1/trial/a").await.unwrap());
		assert!(storage.exists("transaction/t10/response").await.unwrap());

		// Deleting something that is not there is fine.
		storage.delete("transaction/unknown").await.unwrap();
	}

	#[tokio::test]
	async fn test_memory_storage_concurrent_create_single_winner() {
		let storage = Arc::new(MemoryStorage::new());
		let mut handles = Vec::new();
		for i in 0..16 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage.create("race", Bytes::from(format!("{i}"))).await
			}));
		}

		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap().is_ok() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
		assert_eq!(storage.len(), 1);
	}
}
