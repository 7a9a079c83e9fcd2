//! Exactly-once execution and response replay for retried HTTP requests.
//!
//! Callers attach a transaction identifier to a request. Side effects guarded
//! by a [`transaction::Executer`] run at most once per identifier, and the
//! [`transaction::Responder`] replays the first complete response to every
//! retry carrying the same identifier.

pub mod config;
pub mod http;
pub mod metrics;
mod serdes;
pub mod storage;
pub mod telemetry;
pub mod transaction;

pub use serdes::{serde_dur, serde_dur_option};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
