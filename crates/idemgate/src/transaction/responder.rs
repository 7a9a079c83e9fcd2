use std::sync::Arc;

use tracing::debug;

use super::{Error, ResponseReplier, ResponseTracker, TrackedResponse, TransactionContext, response_key};
use crate::storage::Storage;

#[cfg(test)]
#[path = "responder_tests.rs"]
mod tests;

#[derive(Clone, Default)]
pub struct ResponderConfig {
	pub storage: Option<Arc<dyn Storage>>,
}

impl ResponderConfig {
	pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
		self.storage = Some(storage);
		self
	}
}

/// Byte exact response cache keyed by transaction ID.
///
/// The responder never looks into the payload. It stores the first complete
/// response of a transaction and writes it back, headers, status and body, for
/// every later request of the same transaction.
#[derive(Clone)]
pub struct Responder {
	storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Responder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Responder").finish_non_exhaustive()
	}
}

impl Responder {
	pub fn new(config: ResponderConfig) -> Result<Self, Error> {
		let Some(storage) = config.storage else {
			return Err(Error::InvalidConfig(
				"storage must not be empty".to_string(),
			));
		};
		Ok(Self { storage })
	}

	/// Check whether a response is tracked for the context's transaction.
	///
	/// Always `false` without a transaction ID.
	pub async fn exists(&self, ctx: &TransactionContext) -> Result<bool, Error> {
		let Some(transaction_id) = ctx.transaction_id() else {
			return Ok(false);
		};
		let key = response_key(transaction_id);
		self
			.storage
			.exists(&key)
			.await
			.map_err(|e| Error::storage(&key, e))
	}

	/// Replay the tracked response of the context's transaction into `replier`.
	///
	/// Returns `Ok(true)` if a response was replayed, in which case the endpoint
	/// must not run for this request. Returns `Ok(false)` and leaves `replier`
	/// untouched if there is no transaction ID or nothing tracked for it.
	pub async fn reply<R: ResponseReplier + ?Sized>(
		&self,
		ctx: &TransactionContext,
		replier: &mut R,
	) -> Result<bool, Error> {
		let Some(transaction_id) = ctx.transaction_id() else {
			return Ok(false);
		};

		let key = response_key(transaction_id);
		let raw = match self.storage.search(&key).await {
			Ok(raw) => raw,
			Err(e) if e.is_not_found() => return Ok(false),
			Err(e) => return Err(Error::storage(&key, e)),
		};
		let tracked: TrackedResponse =
			serde_json::from_slice(&raw).map_err(|source| Error::Decode {
				transaction_id: transaction_id.to_string(),
				source,
			})?;

		for (name, value) in tracked.headers.iter() {
			replier.append_header(name.clone(), value.clone());
		}
		replier.write_status(tracked.status);
		replier.write_body(tracked.body).map_err(Error::Write)?;

		debug!(%transaction_id, status = tracked.status.as_u16(), "replayed tracked response");
		Ok(true)
	}

	/// Store the response observed by `tracker` for the context's transaction.
	///
	/// No-op without a transaction ID. If a response is already tracked the
	/// stored one wins and this call still succeeds.
	pub async fn track<T: ResponseTracker + ?Sized>(
		&self,
		ctx: &TransactionContext,
		tracker: &T,
	) -> Result<(), Error> {
		let Some(transaction_id) = ctx.transaction_id() else {
			return Ok(());
		};

		let tracked = TrackedResponse::from_tracker(tracker);
		let raw = serde_json::to_vec(&tracked).map_err(|source| Error::Encode {
			transaction_id: transaction_id.to_string(),
			source,
		})?;

		let key = response_key(transaction_id);
		match self.storage.create(&key, raw.into()).await {
			Ok(()) => {
				debug!(%transaction_id, status = tracked.status.as_u16(), "tracked response");
				Ok(())
			},
			Err(e) if e.is_already_exists() => {
				debug!(%transaction_id, "response already tracked by a concurrent request");
				Ok(())
			},
			Err(e) => Err(Error::storage(&key, e)),
		}
	}
}
