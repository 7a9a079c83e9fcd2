//! The `idemgate` demo service: named counters whose increments are applied
//! exactly once per transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use idemgate::BoxError;
use idemgate::config::Config;
use idemgate::http::{TransactionState, with_transactions};
use idemgate::metrics::Metrics;
use idemgate::storage::{MemoryStorage, Storage};
use idemgate::transaction::{
	ExecuteConfig, Executer, ExecuterConfig, Responder, ResponderConfig, TransactionContext,
};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct AppState {
	executer: Executer,
	counters: Arc<Mutex<HashMap<String, u64>>>,
	registry: Arc<Registry>,
}

#[derive(Debug, Serialize)]
struct CounterBody {
	name: String,
	value: u64,
}

/// Build the full router, transaction middleware included.
pub fn router(config: &Config, storage: Arc<dyn Storage>) -> anyhow::Result<Router> {
	let executer = Executer::new(ExecuterConfig::default().with_storage(storage.clone()))?;
	let responder = Responder::new(ResponderConfig::default().with_storage(storage))?;

	let mut registry = Registry::with_prefix("idemgate");
	let metrics = Metrics::new(&mut registry);
	let transactions = TransactionState::new(responder, &config.transaction)?
		.with_service_name(config.server.service_name.as_str())
		.with_metrics(metrics);

	let state = AppState {
		executer,
		counters: Default::default(),
		registry: Arc::new(registry),
	};

	// Only increments are transactional, reads always see the current value.
	let increments = Router::new().route("/v1/counters/{name}/increment", post(increment));
	Ok(
		with_transactions(increments, transactions)
			.route("/v1/counters/{name}", get(read))
			.route("/healthz", get(healthz))
			.route("/metrics", get(metrics_handler))
			.with_state(state),
	)
}

async fn increment(
	State(state): State<AppState>,
	Extension(ctx): Extension<TransactionContext>,
	Path(name): Path<String>,
) -> Response {
	let mut created = false;
	let created_flag = &mut created;
	let counters = state.counters.clone();
	let trial_name = name.clone();
	let result = state
		.executer
		.execute(
			&ctx,
			ExecuteConfig::new("increment").trial(|_ctx| async move {
				let mut counters = counters.lock();
				let value = counters.entry(trial_name).or_insert(0);
				*created_flag = *value == 0;
				*value += 1;
				Ok::<_, BoxError>(())
			}),
		)
		.await;
	if let Err(e) = result {
		error!(counter = %name, error = %e, "increment failed");
		return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
	}

	let value = state.counters.lock().get(&name).copied().unwrap_or_default();
	let status = if created {
		StatusCode::CREATED
	} else {
		StatusCode::OK
	};
	(status, Json(CounterBody { name, value })).into_response()
}

async fn read(State(state): State<AppState>, Path(name): Path<String>) -> Response {
	let value = state.counters.lock().get(&name).copied();
	match value {
		Some(value) => Json(CounterBody { name, value }).into_response(),
		None => (StatusCode::NOT_FOUND, format!("counter {name} not found")).into_response(),
	}
}

async fn healthz() -> &'static str {
	"ok"
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
	let mut body = String::new();
	if let Err(e) = prometheus_client::encoding::text::encode(&mut body, &state.registry) {
		error!(error = %e, "encoding metrics failed");
		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}
	(
		[(
			axum::http::header::CONTENT_TYPE,
			"application/openmetrics-text; version=1.0.0; charset=utf-8",
		)],
		body,
	)
		.into_response()
}

/// How often expired entries are dropped for a given TTL.
pub fn purge_period(ttl: Duration) -> Duration {
	ttl.clamp(Duration::from_secs(1), Duration::from_secs(60))
}

/// Drop expired entries from `storage` every `period`, starting one period
/// from now.
pub fn spawn_purge(storage: Arc<MemoryStorage>, period: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			let purged = storage.purge_expired();
			if purged > 0 {
				debug!(purged, "purged expired entries");
			}
		}
	})
}

/// Serve `router` until ctrl-c or SIGTERM.
pub async fn serve(config: &Config, router: Router) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(config.server.listen_address).await?;
	info!(address = %listener.local_addr()?, "listening");
	axum::serve(listener, router)
		.with_graceful_shutdown(async {
			let signal = shutdown_signal().await;
			info!("{signal} received, shutting down");
		})
		.await?;
	Ok(())
}

async fn shutdown_signal() -> &'static str {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => tokio::select! {
				_ = tokio::signal::ctrl_c() => "SIGINT",
				_ = sigterm.recv() => "SIGTERM",
			},
			Err(e) => {
				error!(error = %e, "installing SIGTERM handler failed");
				let _ = tokio::signal::ctrl_c().await;
				"SIGINT"
			},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
		"SIGINT"
	}
}
