//! HTTP adapter for the transaction protocol.
//!
//! [`transaction_middleware`] wraps an axum router so that every request
//! carrying a transaction header is answered at most once by the endpoint:
//!
//! 1. No header: the endpoint runs with an empty [`TransactionContext`].
//! 2. A response is tracked for the ID: it is replayed and the endpoint does
//!    not run.
//! 3. Otherwise the endpoint runs and its response is returned unchanged.
//!    Successful responses are buffered and tracked first. Error responses
//!    (4xx and 5xx) are not tracked, so the client can retry them.
//!
//! Endpoints read the context through `Extension<TransactionContext>` and pass
//! it to their [`Executer`](crate::transaction::Executer) calls.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::header::InvalidHeaderName;
use http::{HeaderMap, HeaderName, StatusCode};
use tracing::{debug, error};

use crate::config::TransactionConfig;
use crate::metrics::{Metrics, Outcome};
use crate::transaction::{Responder, TrackedResponse, TransactionContext};


/// Error codes reported in the `code` field of error bodies.
pub mod codes {
	pub const INVALID_TRANSACTION_ID: &str = "INVALID_TRANSACTION_ID";
	pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
}

/// Shared state of the transaction middleware.
#[derive(Clone, Debug)]
pub struct TransactionState {
	responder: Responder,
	header: HeaderName,
	max_body_bytes: usize,
	service_name: Arc<str>,
	metrics: Option<Metrics>,
}

impl TransactionState {
	pub fn new(responder: Responder, config: &TransactionConfig) -> Result<Self, InvalidHeaderName> {
		Ok(Self {
			responder,
			header: HeaderName::try_from(config.header.as_str())?,
			max_body_bytes: config.max_body_bytes,
			service_name: Arc::from("idemgate"),
			metrics: None,
		})
	}

	pub fn with_service_name(mut self, service_name: impl Into<Arc<str>>) -> Self {
		self.service_name = service_name.into();
		self
	}

	pub fn with_metrics(mut self, metrics: Metrics) -> Self {
		self.metrics = Some(metrics);
		self
	}

	fn record(&self, outcome: Outcome) {
		if let Some(metrics) = &self.metrics {
			metrics.record(outcome);
		}
	}

	fn error_response(&self, status: StatusCode, code: &str, message: String) -> Response {
		let body = serde_json::json!({
			"code": code,
			"error": message,
			"from": &*self.service_name,
		});
		(status, Json(body)).into_response()
	}

	fn fail(&self, message: String) -> Response {
		self.record(Outcome::Failed);
		self.error_response(StatusCode::INTERNAL_SERVER_ERROR, codes::UNKNOWN_ERROR, message)
	}
}

/// Apply [`transaction_middleware`] to every route of `router`.
pub fn with_transactions<S>(router: axum::Router<S>, state: TransactionState) -> axum::Router<S>
where
	S: Clone + Send + Sync + 'static,
{
	router.layer(axum::middleware::from_fn_with_state(
		state,
		transaction_middleware,
	))
}

/// Read the transaction ID from `headers`.
///
/// `Ok(None)` if the header is absent or blank, `Err` if it is not valid
/// visible ASCII.
pub fn transaction_id<'a>(headers: &'a HeaderMap, header: &HeaderName) -> Result<Option<&'a str>, String> {
	let Some(value) = headers.get(header) else {
		return Ok(None);
	};
	let value = value
		.to_str()
		.map_err(|_| format!("{header} must be visible ASCII"))?
		.trim();
	if value.is_empty() {
		return Ok(None);
	}
	Ok(Some(value))
}

pub async fn transaction_middleware(
	State(state): State<TransactionState>,
	mut req: Request,
	next: Next,
) -> Response {
	let id = transaction_id(req.headers(), &state.header).map(|id| id.map(str::to_owned));
	let ctx = match id {
		Ok(Some(id)) => TransactionContext::new().with_transaction_id(id),
		Ok(None) => {
			state.record(Outcome::Passthrough);
			req.extensions_mut().insert(TransactionContext::new());
			return next.run(req).await;
		},
		Err(message) => {
			state.record(Outcome::Rejected);
			return state.error_response(
				StatusCode::BAD_REQUEST,
				codes::INVALID_TRANSACTION_ID,
				message,
			);
		},
	};

	let tracked = match state.responder.exists(&ctx).await {
		Ok(tracked) => tracked,
		Err(e) => {
			error!(error = %e, "looking up tracked response failed");
			return state.fail(e.to_string());
		},
	};

	let mut ctx = ctx.with_tracked(tracked);
	if tracked {
		let mut replayed = TrackedResponse::default();
		match state.responder.reply(&ctx, &mut replayed).await {
			Ok(true) => {
				state.record(Outcome::Replayed);
				return replayed.into_http_response();
			},
			Ok(false) => {
				// Evicted between the lookup and the search.
				debug!(transaction_id = ?ctx.transaction_id(), "tracked response vanished, executing endpoint");
				ctx = ctx.with_tracked(false);
			},
			Err(e) => {
				error!(error = %e, "replaying tracked response failed");
				return state.fail(e.to_string());
			},
		}
	}

	req.extensions_mut().insert(ctx.clone());
	let (parts, body) = next.run(req).await.into_parts();

	// Error responses stay retryable.
	if parts.status.is_client_error() || parts.status.is_server_error() {
		state.record(Outcome::Untracked);
		return Response::from_parts(parts, body);
	}

	let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
		Ok(body) => body,
		Err(e) => {
			error!(error = %e, "buffering response for tracking failed");
			return state.fail(format!("buffering response failed: {e}"));
		},
	};

	let tracked = TrackedResponse::new(parts.status, parts.headers.clone(), body.clone());
	if let Err(e) = state.responder.track(&ctx, &tracked).await {
		error!(error = %e, "tracking response failed");
		return state.fail(e.to_string());
	}
	state.record(Outcome::Tracked);

	Response::from_parts(parts, Body::from(body))
}
