use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use super::{Error, TransactionContext, trial_key};
use crate::BoxError;
use crate::storage::Storage;

#[cfg(test)]
#[path = "executer_tests.rs"]
mod tests;

/// Value stored under a trial key once the trial succeeded. Only the existence
/// of the key matters.
const TRIAL_MARKER: &[u8] = b"{}";

/// An async action run by the executer with a copy of the request context.
pub type Action<'a> =
	Box<dyn FnOnce(TransactionContext) -> BoxFuture<'a, Result<(), BoxError>> + Send + 'a>;

fn action<'a, F, Fut, E>(f: F) -> Action<'a>
where
	F: FnOnce(TransactionContext) -> Fut + Send + 'a,
	Fut: Future<Output = Result<(), E>> + Send + 'a,
	E: Into<BoxError>,
{
	Box::new(move |ctx| Box::pin(async move { f(ctx).await.map_err(Into::into) }))
}

/// Configuration for a single call to [`Executer::execute`].
pub struct ExecuteConfig<'a> {
	/// The side effect to run at most once per transaction.
	pub trial: Option<Action<'a>>,
	/// Scoped to the transaction ID of the context. Identifies the trial's
	/// completion marker.
	pub trial_id: String,
	/// Run instead of the trial once the trial is known to have succeeded.
	pub replay: Option<Action<'a>>,
}

impl<'a> ExecuteConfig<'a> {
	pub fn new(trial_id: impl Into<String>) -> Self {
		Self {
			trial: None,
			trial_id: trial_id.into(),
			replay: None,
		}
	}

	pub fn trial<F, Fut, E>(mut self, f: F) -> Self
	where
		F: FnOnce(TransactionContext) -> Fut + Send + 'a,
		Fut: Future<Output = Result<(), E>> + Send + 'a,
		E: Into<BoxError>,
	{
		self.trial = Some(action(f));
		self
	}

	pub fn replay<F, Fut, E>(mut self, f: F) -> Self
	where
		F: FnOnce(TransactionContext) -> Fut + Send + 'a,
		Fut: Future<Output = Result<(), E>> + Send + 'a,
		E: Into<BoxError>,
	{
		self.replay = Some(action(f));
		self
	}
}

impl std::fmt::Debug for ExecuteConfig<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExecuteConfig")
			.field("trial_id", &self.trial_id)
			.field("trial", &self.trial.is_some())
			.field("replay", &self.replay.is_some())
			.finish()
	}
}

#[derive(Clone, Default)]
pub struct ExecuterConfig {
	pub storage: Option<Arc<dyn Storage>>,
}

impl ExecuterConfig {
	pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
		self.storage = Some(storage);
		self
	}
}

/// Runs trials at most once per transaction.
///
/// Without a transaction ID in the context every call runs the trial, there is
/// nothing to deduplicate on. With a transaction ID the trial runs until it
/// succeeds once; afterwards the replay, if any, runs instead.
///
/// The executer holds no state of its own. Two concurrent calls for the same
/// transaction and trial may both run the trial unless the caller serializes
/// them; the storage's create-if-absent only guarantees a single completion
/// marker.
#[derive(Clone)]
pub struct Executer {
	storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Executer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Executer").finish_non_exhaustive()
	}
}

impl Executer {
	pub fn new(config: ExecuterConfig) -> Result<Self, Error> {
		let Some(storage) = config.storage else {
			return Err(Error::InvalidConfig(
				"storage must not be empty".to_string(),
			));
		};
		Ok(Self { storage })
	}

	pub async fn execute(&self, ctx: &TransactionContext, config: ExecuteConfig<'_>) -> Result<(), Error> {
		let ExecuteConfig {
			trial,
			trial_id,
			replay,
		} = config;
		let Some(trial) = trial else {
			return Err(Error::InvalidExecution(
				"trial must not be empty".to_string(),
			));
		};
		if trial_id.is_empty() {
			return Err(Error::InvalidExecution(
				"trial ID must not be empty".to_string(),
			));
		}

		let Some(transaction_id) = ctx.transaction_id() else {
			trial(ctx.clone())
				.await
				.map_err(|source| Error::Trial {
					trial_id: trial_id.clone(),
					source,
				})?;
			debug!(%trial_id, "executed trial without transaction");
			return Ok(());
		};

		let key = trial_key(transaction_id, &trial_id);
		let done = self
			.storage
			.exists(&key)
			.await
			.map_err(|e| Error::storage(&key, e))?;

		if done {
			if let Some(replay) = replay {
				replay(ctx.clone())
					.await
					.map_err(|source| Error::Replay {
						trial_id: trial_id.clone(),
						source,
					})?;
				debug!(%transaction_id, %trial_id, "executed replay");
			} else {
				debug!(%transaction_id, %trial_id, "trial already executed, nothing to replay");
			}
			return Ok(());
		}

		// No marker is written on failure so the next attempt runs the trial again.
		trial(ctx.clone())
			.await
			.map_err(|source| Error::Trial {
				trial_id: trial_id.clone(),
				source,
			})?;

		match self
			.storage
			.create(&key, Bytes::from_static(TRIAL_MARKER))
			.await
		{
			Ok(()) => {},
			Err(e) if e.is_already_exists() => {
				debug!(%transaction_id, %trial_id, "trial completion already recorded by a concurrent attempt");
			},
			Err(e) => return Err(Error::storage(&key, e)),
		}
		debug!(%transaction_id, %trial_id, "executed trial");

		Ok(())
	}
}
