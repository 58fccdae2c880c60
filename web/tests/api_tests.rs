//! HTTP-level behaviour of routers built with `ApiRouter`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use axum_test::TestServer;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use txapi_core::{ApiError, Flow, ResponseEnvelope, Severity};
use txapi_runtime::TxEndpoint;
use txapi_testing::{InMemoryStore, InMemoryTx, RecordingReporter};
use txapi_web::error::JSON_UTF8;
use txapi_web::{ApiRouter, AppConfig, AppState, CORRELATION_ID_HEADER, ConfigError, Endpoint};

const COUNTER: &str = "counter";

/// Adds `by` to the counter; amounts over 1000 are refused with a 400 after
/// the write has been staged.
#[derive(Deserialize)]
struct Increment {
    by: i64,
}

impl TxEndpoint<InMemoryStore> for Increment {
    fn read_only(&self) -> bool {
        false
    }

    async fn compute_response(
        &mut self,
        tx: &mut InMemoryTx,
        reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        let current = tx.get(COUNTER)?.and_then(|v| v.as_i64()).unwrap_or(0);
        let value = current + self.by;
        tx.put(COUNTER, json!(value))?;

        if self.by > 1000 {
            reply.set_status(StatusCode::BAD_REQUEST)?;
            return Ok(Flow::Continue(json!({"error": "too large"})));
        }
        Ok(Flow::Continue(json!({"value": value})))
    }
}

impl Endpoint<InMemoryStore> for Increment {
    const PATH: &'static str = "/increment";
    const DESC: &'static str = "Increase the counter";

    fn validate(&self) -> Vec<String> {
        if self.by < 1 {
            vec!["by must be positive".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[derive(Deserialize)]
struct ReadCounter {}

impl TxEndpoint<InMemoryStore> for ReadCounter {
    async fn compute_response(
        &mut self,
        tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        let value = tx.get(COUNTER)?.unwrap_or(json!(0));
        Ok(Flow::Continue(json!({"value": value})))
    }
}

impl Endpoint<InMemoryStore> for ReadCounter {
    const PATH: &'static str = "/value";
    const METHOD: axum::http::Method = axum::http::Method::GET;
}

#[derive(Deserialize)]
struct Rename {
    from: String,
    to: String,
}

impl TxEndpoint<InMemoryStore> for Rename {
    async fn compute_response(
        &mut self,
        _tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        Ok(Flow::Continue(json!({"renamed": [self.from, self.to]})))
    }
}

impl Endpoint<InMemoryStore> for Rename {
    const PATH: &'static str = "/rename";

    fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.from.is_empty() {
            problems.push("from is required".to_string());
        }
        if self.to.is_empty() {
            problems.push("to is required".to_string());
        }
        problems
    }
}

#[derive(Deserialize)]
struct Crash {}

impl TxEndpoint<InMemoryStore> for Crash {
    async fn compute_response(
        &mut self,
        _tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        Err(ApiError::internal("boom").with_extra("order", 42))
    }
}

impl Endpoint<InMemoryStore> for Crash {
    const PATH: &'static str = "/crash";
}

/// Same route as [`Increment`], declared with a trailing slash.
#[derive(Deserialize)]
struct IncrementSlash {}

impl TxEndpoint<InMemoryStore> for IncrementSlash {
    async fn compute_response(
        &mut self,
        _tx: &mut InMemoryTx,
        _reply: &mut ResponseEnvelope,
    ) -> Result<Flow, ApiError> {
        Ok(Flow::Continue(Value::Null))
    }
}

impl Endpoint<InMemoryStore> for IncrementSlash {
    const PATH: &'static str = "/increment/";
}

fn config() -> AppConfig {
    let mut config = AppConfig::new("counter");
    config.transactions.initial_delay_ms = 0;
    config.transactions.jitter = false;
    config
}

fn app_with(store: &InMemoryStore, config: AppConfig, reporter: &RecordingReporter) -> Router {
    let state = AppState::with_reporter(store.clone(), config, Arc::new(reporter.clone()));
    ApiRouter::from_state(state)
        .unwrap()
        .endpoint::<Increment>()
        .unwrap()
        .endpoint::<ReadCounter>()
        .unwrap()
        .endpoint::<Rename>()
        .unwrap()
        .endpoint::<Crash>()
        .unwrap()
        .build()
}

fn app(store: &InMemoryStore, reporter: &RecordingReporter) -> Router {
    app_with(store, config(), reporter)
}

fn post(uri: &str, content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_increment_commits() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let server = TestServer::new(app(&store, &reporter)).unwrap();

    let response = server.post("/counter/increment").json(&json!({"by": 2})).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"value": 2}));

    let response = server.get("/counter/value").await;
    assert_eq!(response.json::<Value>(), json!({"value": 2}));

    assert_eq!(store.value(COUNTER), Some(json!(2)));
    assert_eq!(store.commits(), 1);
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn test_health_check_and_headers() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-latency-ms"));
    assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_disabled_health_check_and_latency() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let mut config = config();
    config.health_check.disabled = true;
    config.latency_tracker.disabled = true;

    let response = app_with(&store, config, &reporter)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!response.headers().contains_key("x-latency-ms"));
}

#[tokio::test]
async fn test_validation_failure_never_opens_a_transaction() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "application/json", r#"{"by": 0}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "InvalidInputException");
    assert_eq!(body["message"], "Body Validation Failure: by must be positive");
    assert!(body.get("detail").is_none());
    assert_eq!(store.begins(), 0);

    let report = reporter.last().unwrap();
    assert_eq!(report.level, Severity::Warning);
    assert_eq!(
        report.fingerprint.as_deref(),
        Some("Body Validation Failure: by must be positive")
    );
}

#[tokio::test]
async fn test_body_that_does_not_deserialize() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "application/json", r#"{"by": "two"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "InvalidInputException");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Body Validation Failure: ")
    );
}

#[tokio::test]
async fn test_report_all_errors() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let request = || post("/counter/rename", "application/json", r#"{"from": "", "to": ""}"#);

    let first_only = app(&store, &reporter).oneshot(request()).await.unwrap();
    assert_eq!(
        json_body(first_only).await["message"],
        "Body Validation Failure: from is required"
    );

    let mut config = config();
    config.logging.report_all_errors = true;
    let all = app_with(&store, config, &reporter)
        .oneshot(request())
        .await
        .unwrap();
    assert_eq!(
        json_body(all).await["message"],
        "Body Validation Failure: from is required; to is required"
    );
}

#[tokio::test]
async fn test_content_type_not_permitted() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "text/plain", "by=2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_UTF8);
    let body = json_body(response).await;
    assert_eq!(body["code"], "ContentTypeNotPermittedException");
    assert_eq!(body["message"], "Content-Type Not Permitted");

    let report = reporter.last().unwrap();
    assert_eq!(report.fingerprint.as_deref(), Some("Content-Type Not Permitted"));
    assert_eq!(
        report.message,
        "Content-Type Not Permitted: Unsupported Media Type: text/plain"
    );
}

#[tokio::test]
async fn test_malformed_json_is_request_error() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "application/json", "{by: 2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "RequestError");
}

#[tokio::test]
async fn test_empty_body_is_empty_object() {
    let store = InMemoryStore::new();
    store.seed(COUNTER, json!(9));
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(
            Request::builder()
                .uri("/counter/value")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"value": 9}));
}

#[tokio::test]
async fn test_business_abort_discards_writes() {
    let store = InMemoryStore::new();
    store.seed(COUNTER, json!(1));
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "application/json", r#"{"by": 5000}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await, json!({"error": "too large"}));
    assert_eq!(store.value(COUNTER), Some(json!(1)));
    assert_eq!(store.commits(), 0);
    assert_eq!(store.begins(), 1);
    // Not a failure: nothing is reported
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn test_conflicts_are_retried_transparently() {
    let store = InMemoryStore::new();
    store.inject_conflicts(2);
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(post("/counter/increment", "application/json", r#"{"by": 1}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"value": 1}));
    assert_eq!(store.begins(), 3);
    assert_eq!(store.conflicts(), 2);
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_are_500() {
    let store = InMemoryStore::new();
    store.inject_conflicts(10);
    let reporter = RecordingReporter::new();
    let mut config = config();
    config.transactions.max_retries = 1;

    let response = app_with(&store, config, &reporter)
        .oneshot(post("/counter/increment", "application/json", r#"{"by": 1}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["code"], "TransactionFailedError");
    assert_eq!(store.begins(), 2);
    assert_eq!(store.value(COUNTER), None);
    assert_eq!(reporter.last().unwrap().level, Severity::Error);
}

#[tokio::test]
async fn test_crash_report_metadata() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let request = Request::builder()
        .method("POST")
        .uri("/counter/crash")
        .header("X-Real-IP", "198.51.100.42")
        .body(Body::empty())
        .unwrap();
    let response = app(&store, &reporter).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let correlation_id = response.headers()[CORRELATION_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();
    let body = json_body(response).await;
    assert_eq!(body, json!({"code": "InternalError", "message": "boom"}));

    let report = reporter.last().unwrap();
    assert_eq!(report.error, "InternalError");
    assert_eq!(report.fingerprint, None);
    assert_eq!(report.user.id, None);
    assert_eq!(report.user.ip.unwrap().to_string(), "198.51.100.42");
    assert_eq!(report.tags["method"], "POST");
    assert_eq!(report.tags["url"], "/counter/crash");
    assert_eq!(report.tags["status"], "500");
    assert_eq!(report.extra["reqId"], json!(correlation_id));
    assert_eq!(report.extra["userAgent"], json!("not set"));
    assert_eq!(report.extra["order"], json!(42));
}

#[tokio::test]
async fn test_crash_report_prefers_uid() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let request = Request::builder()
        .method("POST")
        .uri("/counter/crash")
        .header("x-uid", "user-7")
        .header("X-Real-IP", "198.51.100.42")
        .header(header::USER_AGENT, "curl/8")
        .body(Body::empty())
        .unwrap();
    app(&store, &reporter).oneshot(request).await.unwrap();

    let report = reporter.last().unwrap();
    assert_eq!(report.user.id.as_deref(), Some("user-7"));
    assert_eq!(report.user.ip, None);
    assert_eq!(report.extra["userAgent"], json!("curl/8"));
}

#[tokio::test]
async fn test_verbose_responses_carry_detail() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let mut config = config();
    config.logging.report_error_detail = true;

    let response = app_with(&store, config, &reporter)
        .oneshot(post("/counter/crash", "application/json", "{}"))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["detail"], "boom");
    assert!(body["stack"].is_array());
}

#[tokio::test]
async fn test_unknown_route_is_not_found_exception() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let server = TestServer::new(app(&store, &reporter)).unwrap();

    let response = server.get("/counter/missing").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "NotFoundException");
    assert_eq!(reporter.len(), 1);
}

#[tokio::test]
async fn test_wrong_method_is_rejected() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();

    let response = app(&store, &reporter)
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/counter/increment")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(store.begins(), 0);
}

#[test]
fn test_duplicate_route_is_rejected() {
    let result = ApiRouter::new(InMemoryStore::new(), config())
        .unwrap()
        .endpoint::<Increment>()
        .unwrap()
        .endpoint::<Increment>();

    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
}

#[test]
fn test_trailing_slash_twin_is_rejected() {
    let result = ApiRouter::new(InMemoryStore::new(), config())
        .unwrap()
        .endpoint::<Increment>()
        .unwrap()
        .endpoint::<IncrementSlash>();

    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
}

#[tokio::test]
async fn test_trailing_slash_is_ignored() {
    let store = InMemoryStore::new();
    let reporter = RecordingReporter::new();
    let server = TestServer::new(app(&store, &reporter)).unwrap();

    let response = server
        .post("/counter/increment/")
        .json(&json!({"by": 2}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"value": 2}));
    assert_eq!(store.value(COUNTER), Some(json!(2)));
}

#[test]
fn test_routes_are_mounted_under_service() {
    let router = ApiRouter::new(InMemoryStore::new(), config())
        .unwrap()
        .endpoint::<Increment>()
        .unwrap()
        .endpoint::<ReadCounter>()
        .unwrap();

    let routes: Vec<_> = router.routes().collect();
    assert_eq!(
        routes,
        vec![
            ("GET", "/"),
            ("GET", "/counter/value"),
            ("POST", "/counter/increment"),
        ]
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = ApiRouter::new(InMemoryStore::new(), AppConfig::default());
    assert!(matches!(result, Err(ConfigError::MissingValue("service"))));
}
