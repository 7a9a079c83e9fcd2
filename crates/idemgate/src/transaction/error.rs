use crate::BoxError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A required collaborator was missing at construction time.
	#[error("invalid config: {0}")]
	InvalidConfig(String),
	/// The execute call itself was malformed. Never worth retrying.
	#[error("invalid execution: {0}")]
	InvalidExecution(String),
	#[error("trial {trial_id:?} failed")]
	Trial {
		trial_id: String,
		#[source]
		source: BoxError,
	},
	#[error("replay of trial {trial_id:?} failed")]
	Replay {
		trial_id: String,
		#[source]
		source: BoxError,
	},
	#[error("storage operation on {key:?} failed")]
	Storage {
		key: String,
		#[source]
		source: StorageError,
	},
	#[error("failed to encode tracked response for transaction {transaction_id:?}")]
	Encode {
		transaction_id: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("tracked response for transaction {transaction_id:?} is malformed")]
	Decode {
		transaction_id: String,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to write replayed response")]
	Write(#[source] BoxError),
}

impl Error {
	pub(crate) fn storage(key: &str, source: StorageError) -> Self {
		Error::Storage {
			key: key.to_string(),
			source,
		}
	}

	pub fn is_invalid_config(&self) -> bool {
		matches!(self, Error::InvalidConfig(_))
	}

	pub fn is_invalid_execution(&self) -> bool {
		matches!(self, Error::InvalidExecution(_))
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Error::Storage { source, .. } if source.is_not_found())
	}
}
