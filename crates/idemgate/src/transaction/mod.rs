//! Transactional primitives ensuring certain actions happen only once.
//!
//! A transaction is identified by a caller supplied ID carried in a
//! [`TransactionContext`]. Within a transaction:
//!
//! - the [`Executer`] runs each named trial until it succeeds once, and runs
//!   the optional replay on every later encounter
//! - the [`Responder`] captures the first complete response and replays it
//!   verbatim for every retry
//!
//! Trial markers and tracked responses share one storage namespace under
//! disjoint keys:
//!
//! ```text
//! transaction/{transaction_id}/trial/{trial_id}
//! transaction/{transaction_id}/response
//! ```

mod context;
mod error;
mod executer;
mod responder;
mod response;

pub use context::TransactionContext;
pub use error::Error;
pub use executer::{Action, ExecuteConfig, Executer, ExecuterConfig};
pub use responder::{Responder, ResponderConfig};
pub use response::{ResponseReplier, ResponseTracker, TrackedResponse};

/// Root of all state stored for one transaction. Deleting this key forgets
/// the transaction entirely.
pub fn transaction_key(transaction_id: &str) -> String {
	format!("transaction/{transaction_id}")
}

pub fn trial_key(transaction_id: &str, trial_id: &str) -> String {
	format!("transaction/{transaction_id}/trial/{trial_id}")
}

pub fn response_key(transaction_id: &str) -> String {
	format!("transaction/{transaction_id}/response")
}
