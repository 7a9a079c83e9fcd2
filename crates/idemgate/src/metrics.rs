use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// How the transaction middleware handled a request.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
	/// No transaction ID, the endpoint ran without deduplication.
	Passthrough,
	/// A tracked response was replayed, the endpoint did not run.
	Replayed,
	/// The endpoint ran and its response was tracked.
	Tracked,
	/// The endpoint ran but its response was not tracked (4xx or 5xx).
	Untracked,
	/// The transaction header was malformed, the endpoint did not run.
	Rejected,
	/// Storage failed while looking up or tracking the response.
	Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
	pub outcome: Outcome,
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
	requests: Family<OutcomeLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let metrics = Self::default();
		let sub = registry.sub_registry_with_prefix("transaction");
		sub.register(
			"requests",
			"Requests seen by the transaction middleware, by outcome",
			metrics.requests.clone(),
		);
		metrics
	}

	pub fn record(&self, outcome: Outcome) {
		self.requests.get_or_create(&OutcomeLabels { outcome }).inc();
	}

	pub fn count(&self, outcome: Outcome) -> u64 {
		self.requests.get_or_create(&OutcomeLabels { outcome }).get()
	}
}
