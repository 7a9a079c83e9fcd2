//! End to end tests of the transaction middleware.
//!
//! The endpoints used here count how often they run and how often their
//! guarded side effect runs, so the tests can tell a replayed response from a
//! fresh one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::body::Body;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Router};
use http::{Request, Response, StatusCode};
use idemgate::BoxError;
use idemgate::config::TransactionConfig;
use idemgate::http::{TransactionState, with_transactions};
use idemgate::metrics::{Metrics, Outcome};
use idemgate::storage::{MemoryStorage, Storage};
use idemgate::transaction::{
	ExecuteConfig, Executer, ExecuterConfig, Responder, ResponderConfig, TransactionContext,
};
use prometheus_client::registry::Registry;
use tower::ServiceExt;

#[derive(Clone)]
struct App {
	executer: Executer,
	handled: Arc<AtomicU32>,
	created: Arc<AtomicU32>,
}

async fn create(
	State(app): State<App>,
	Extension(ctx): Extension<TransactionContext>,
) -> Result<Response<Body>, StatusCode> {
	let handled = app.handled.fetch_add(1, Ordering::SeqCst) + 1;
	let created = app.created.clone();
	app
		.executer
		.execute(
			&ctx,
			ExecuteConfig::new("create").trial(|_ctx| async move {
				created.fetch_add(1, Ordering::SeqCst);
				Ok::<_, BoxError>(())
			}),
		)
		.await
		.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

	Response::builder()
		.status(StatusCode::CREATED)
		.header("x-foo", "bar")
		.header("set-cookie", "a=1")
		.header("set-cookie", "b=2")
		.body(Body::from(format!(r#"{{"handled":{handled}}}"#)))
		.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn flaky(State(app): State<App>) -> (StatusCode, String) {
	let handled = app.handled.fetch_add(1, Ordering::SeqCst) + 1;
	if handled == 1 {
		(StatusCode::SERVICE_UNAVAILABLE, "try again".to_string())
	} else {
		(StatusCode::OK, format!("ok {handled}"))
	}
}

async fn throttled(State(app): State<App>) -> (StatusCode, String) {
	let handled = app.handled.fetch_add(1, Ordering::SeqCst) + 1;
	if handled == 1 {
		(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string())
	} else {
		(StatusCode::OK, format!("ok {handled}"))
	}
}

struct Harness {
	router: Router,
	app: App,
	metrics: Metrics,
	storage: Arc<MemoryStorage>,
}

fn harness(config: TransactionConfig) -> Harness {
	let storage = Arc::new(MemoryStorage::new());
	let executer = Executer::new(ExecuterConfig::default().with_storage(storage.clone())).unwrap();
	let responder = Responder::new(ResponderConfig::default().with_storage(storage.clone())).unwrap();
	let metrics = Metrics::new(&mut Registry::default());

	let app = App {
		executer,
		handled: Arc::new(AtomicU32::new(0)),
		created: Arc::new(AtomicU32::new(0)),
	};
	let state = TransactionState::new(responder, &config)
		.unwrap()
		.with_service_name("test")
		.with_metrics(metrics.clone());

	let router = Router::new()
		.route("/resources", post(create))
		.route("/flaky", get(flaky))
		.route("/throttled", get(throttled))
		.with_state(app.clone());
	Harness {
		router: with_transactions(router, state),
		app,
		metrics,
		storage,
	}
}

async fn send(router: &Router, method: &str, uri: &str, transaction_id: Option<&str>) -> (StatusCode, http::HeaderMap, String) {
	let mut builder = Request::builder().method(method).uri(uri);
	if let Some(id) = transaction_id {
		builder = builder.header("X-Transaction-ID", id);
	}
	let response = router
		.clone()
		.oneshot(builder.body(Body::empty()).unwrap())
		.await
		.unwrap();
	let (parts, body) = response.into_parts();
	let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
	(
		parts.status,
		parts.headers,
		String::from_utf8(body.to_vec()).unwrap(),
	)
}

#[tokio::test]
async fn test_without_transaction_id_always_executes() {
	let h = harness(TransactionConfig::default());

	for expected in 1..=3 {
		let (status, _, body) = send(&h.router, "POST", "/resources", None).await;
		assert_eq!(status, StatusCode::CREATED);
		assert_eq!(body, format!(r#"{{"handled":{expected}}}"#));
	}
	assert_eq!(h.app.created.load(Ordering::SeqCst), 3);
	assert_eq!(h.metrics.count(Outcome::Passthrough), 3);
	assert!(h.storage.is_empty());
}

#[tokio::test]
async fn test_retry_replays_first_response() {
	let h = harness(TransactionConfig::default());

	let first = send(&h.router, "POST", "/resources", Some("txn-1")).await;
	assert_eq!(first.0, StatusCode::CREATED);
	assert_eq!(first.2, r#"{"handled":1}"#);

	for _ in 0..2 {
		let retry = send(&h.router, "POST", "/resources", Some("txn-1")).await;
		assert_eq!(retry.0, first.0);
		assert_eq!(retry.2, first.2);
		assert_eq!(retry.1["x-foo"], "bar");
		let cookies: Vec<_> = retry.1.get_all("set-cookie").iter().collect();
		assert_eq!(cookies, vec!["a=1", "b=2"]);
	}

	// The endpoint ran once and its side effect happened once.
	assert_eq!(h.app.handled.load(Ordering::SeqCst), 1);
	assert_eq!(h.app.created.load(Ordering::SeqCst), 1);
	assert_eq!(h.metrics.count(Outcome::Tracked), 1);
	assert_eq!(h.metrics.count(Outcome::Replayed), 2);
}

#[tokio::test]
async fn test_distinct_transactions_execute_independently() {
	let h = harness(TransactionConfig::default());

	send(&h.router, "POST", "/resources", Some("txn-1")).await;
	let other = send(&h.router, "POST", "/resources", Some("txn-2")).await;
	assert_eq!(other.2, r#"{"handled":2}"#);
	assert_eq!(h.app.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_lost_response_reruns_endpoint_without_side_effect() {
	let h = harness(TransactionConfig::default());

	send(&h.router, "POST", "/resources", Some("txn-1")).await;
	// Simulate a crash between the trial and tracking the response.
	h.storage.delete("transaction/txn-1/response").await.unwrap();

	let retry = send(&h.router, "POST", "/resources", Some("txn-1")).await;
	assert_eq!(retry.0, StatusCode::CREATED);
	assert_eq!(retry.2, r#"{"handled":2}"#);
	assert_eq!(h.app.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_errors_are_not_tracked() {
	let h = harness(TransactionConfig::default());

	let first = send(&h.router, "GET", "/flaky", Some("txn-1")).await;
	assert_eq!(first.0, StatusCode::SERVICE_UNAVAILABLE);
	assert_eq!(h.metrics.count(Outcome::Untracked), 1);

	let second = send(&h.router, "GET", "/flaky", Some("txn-1")).await;
	assert_eq!(second.0, StatusCode::OK);
	assert_eq!(second.2, "ok 2");

	let third = send(&h.router, "GET", "/flaky", Some("txn-1")).await;
	assert_eq!(third.2, "ok 2");
	assert_eq!(h.app.handled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_tracked() {
	let h = harness(TransactionConfig::default());

	let first = send(&h.router, "GET", "/throttled", Some("txn-1")).await;
	assert_eq!(first.0, StatusCode::TOO_MANY_REQUESTS);
	assert_eq!(h.metrics.count(Outcome::Untracked), 1);
	assert!(h.storage.is_empty());

	let second = send(&h.router, "GET", "/throttled", Some("txn-1")).await;
	assert_eq!(second.0, StatusCode::OK);
	assert_eq!(second.2, "ok 2");

	let third = send(&h.router, "GET", "/throttled", Some("txn-1")).await;
	assert_eq!(third, second);
	assert_eq!(h.app.handled.load(Ordering::SeqCst), 2);
	assert_eq!(h.metrics.count(Outcome::Replayed), 1);
}

#[tokio::test]
async fn test_malformed_transaction_id_is_rejected() {
	let h = harness(TransactionConfig::default());

	let request = Request::builder()
		.method("POST")
		.uri("/resources")
		.header("X-Transaction-ID", http::HeaderValue::from_bytes(b"caf\xe9").unwrap())
		.body(Body::empty())
		.unwrap();
	let response = h.router.clone().oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let body = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(body["code"], "INVALID_TRANSACTION_ID");

	assert_eq!(h.app.handled.load(Ordering::SeqCst), 0);
	assert_eq!(h.metrics.count(Outcome::Rejected), 1);
	assert_eq!(h.metrics.count(Outcome::Passthrough), 0);
}

#[tokio::test]
async fn test_oversized_body_fails() {
	let h = harness(TransactionConfig {
		max_body_bytes: 4,
		..Default::default()
	});

	let (status, _, body) = send(&h.router, "POST", "/resources", Some("txn-1")).await;
	assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
	let body: serde_json::Value = serde_json::from_str(&body).unwrap();
	assert_eq!(body["code"], "UNKNOWN_ERROR");
	assert_eq!(body["from"], "test");
	assert_eq!(h.metrics.count(Outcome::Failed), 1);
}

#[tokio::test]
async fn test_custom_header() {
	let h = harness(TransactionConfig {
		header: "Idempotency-Key".to_string(),
		..Default::default()
	});

	// The default header is not looked at anymore.
	send(&h.router, "POST", "/resources", Some("txn-1")).await;
	send(&h.router, "POST", "/resources", Some("txn-1")).await;
	assert_eq!(h.app.created.load(Ordering::SeqCst), 2);

	for _ in 0..2 {
		let request = Request::builder()
			.method("POST")
			.uri("/resources")
			.header("idempotency-key", "key-1")
			.body(Body::empty())
			.unwrap();
		let response = h.router.clone().oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);
	}
	assert_eq!(h.app.created.load(Ordering::SeqCst), 3);
}
