//! Key-value storage used to persist transaction state.
//!
//! The transaction protocol only ever talks to a [`Storage`]. Backends are
//! selected at construction time through [`StorageConfig`] and are otherwise
//! interchangeable, as long as `create` is an atomic create-if-absent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::BoxError;
use crate::serde_dur_option;

mod memory;

pub use memory::MemoryStorage;

/// Error type for Storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("key not found: {0}")]
	NotFound(String),
	#[error("key already exists: {0}")]
	AlreadyExists(String),
	#[error("invalid config: {0}")]
	InvalidConfig(String),
	#[error("storage backend error: {0}")]
	Backend(#[source] BoxError),
}

impl StorageError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, StorageError::NotFound(_))
	}

	pub fn is_already_exists(&self) -> bool {
		matches!(self, StorageError::AlreadyExists(_))
	}
}

/// Storage is the abstraction over key-value backends.
///
/// A storage implementation does not care about specific data types, it only
/// stores opaque bytes under string keys. Keys are path-like
/// (`transaction/{id}/trial/{trial}`), which lets backends treat a key as the
/// root of a sub-namespace on deletion.
#[async_trait]
pub trait Storage: Send + Sync {
	/// Store `value` under `key`.
	///
	/// Fails with [`StorageError::AlreadyExists`] if the key is present. The
	/// check and the write must happen atomically.
	async fn create(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

	/// Check if a value is stored under `key`.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Look up the value stored under `key`.
	///
	/// Fails with [`StorageError::NotFound`] if the key is absent.
	async fn search(&self, key: &str) -> Result<Bytes, StorageError>;

	/// Remove `key` and everything stored below `key/`.
	///
	/// Returns `Ok(())` regardless of whether the key existed.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
	/// Volatile in-process map. State is lost on restart and not shared
	/// between replicas.
	#[default]
	Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageConfig {
	#[serde(default)]
	pub kind: StorageKind,
	/// Entries older than this are treated as absent. Unset means entries never
	/// expire.
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		with = "serde_dur_option"
	)]
	pub ttl: Option<Duration>,
}

/// Create the storage backend described by `config`.
pub fn new(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
	match config.kind {
		StorageKind::Memory => Ok(Arc::new(new_memory(config)?)),
	}
}

/// Create a [`MemoryStorage`] honoring the TTL of `config`.
///
/// Callers that want expired entries reclaimed without being touched again
/// keep the concrete type and call [`MemoryStorage::purge_expired`]
/// periodically.
pub fn new_memory(config: &StorageConfig) -> Result<MemoryStorage, StorageError> {
	match config.ttl {
		Some(ttl) if ttl.is_zero() => Err(StorageError::InvalidConfig(
			"ttl must be greater than zero".to_string(),
		)),
		Some(ttl) => Ok(MemoryStorage::with_ttl(ttl)),
		None => Ok(MemoryStorage::new()),
	}
}
