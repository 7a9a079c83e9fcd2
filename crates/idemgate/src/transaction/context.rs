use std::sync::Arc;

/// Request scoped transaction metadata.
///
/// Both facts are optional. An absent transaction ID means no deduplication
/// was requested. An absent tracked flag means nobody has looked up the
/// response storage yet, which is different from knowing the response is not
/// tracked.
///
/// The context is immutable: the `with_*` methods return a modified copy and
/// leave the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionContext {
	transaction_id: Option<Arc<str>>,
	tracked: Option<bool>,
}

impl TransactionContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_transaction_id(&self, id: impl Into<Arc<str>>) -> Self {
		Self {
			transaction_id: Some(id.into()),
			..self.clone()
		}
	}

	pub fn transaction_id(&self) -> Option<&str> {
		self.transaction_id.as_deref()
	}

	pub fn with_tracked(&self, tracked: bool) -> Self {
		Self {
			tracked: Some(tracked),
			..self.clone()
		}
	}

	pub fn tracked(&self) -> Option<bool> {
		self.tracked
	}
}
