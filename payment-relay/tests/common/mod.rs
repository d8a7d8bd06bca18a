//! Shared fixtures: fake processor and consumer servers, request helpers.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http_body_util::BodyExt;
use payment_relay::config::ProcessorConfig;
use chrono::{DateTime, TimeZone, Utc};
use payment_relay::signature::{hmac_sha256_hex, TokenAuthenticator};
use payment_relay::RelayConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PROCESSOR_KEY: &str = "sk_test_processor";
pub const POLL_SECRET: &str = "shared_poll_secret";
pub const CONSUMER_SECRET: &str = "consumer_secret";

/// Bind on an ephemeral port and serve `app` in the background.
pub async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

/// What the fake processor saw.
#[derive(Default)]
pub struct ProcessorLog {
    pub calls: Vec<String>,
    pub authorization: Vec<String>,
}

#[derive(Clone)]
struct FakeProcessor {
    responses: Arc<HashMap<String, (StatusCode, Value)>>,
    log: Arc<Mutex<ProcessorLog>>,
}

async fn verify_payment(
    State(fake): State<FakeProcessor>,
    Path(tx_ref): Path<String>,
    headers: HeaderMap,
) -> Response {
    {
        let mut log = fake.log.lock().unwrap();
        log.calls.push(tx_ref.clone());
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            log.authorization.push(auth.to_string());
        }
    }
    match fake.responses.get(&tx_ref) {
        Some((status, body)) => (*status, Json(body.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"status": "error"}))).into_response(),
    }
}

/// Fake `GET /verify-payment/{tx_ref}` answering from a fixed table.
pub async fn fake_processor(
    responses: Vec<(&str, StatusCode, Value)>,
) -> (String, Arc<Mutex<ProcessorLog>>) {
    let log = Arc::new(Mutex::new(ProcessorLog::default()));
    let fake = FakeProcessor {
        responses: Arc::new(
            responses
                .into_iter()
                .map(|(k, s, v)| (k.to_string(), (s, v)))
                .collect(),
        ),
        log: log.clone(),
    };
    let app = Router::new()
        .route("/verify-payment/{tx_ref}", get(verify_payment))
        .with_state(fake);
    (spawn(app).await, log)
}

pub fn verified(tx_ref: &str, amount: i64) -> Value {
    json!({
        "status": "success",
        "data": {
            "tx_ref": tx_ref,
            "status": "success",
            "amount": amount,
            "currency": "MWK",
            "customer": {"email": "buyer@example.com"}
        }
    })
}

/// What the fake consumer saw, one entry per request.
#[derive(Debug, Clone)]
pub struct ConsumerHit {
    pub signature: Option<String>,
    pub body: String,
    pub query: HashMap<String, String>,
}

#[derive(Clone)]
struct FakeConsumer {
    reply: Arc<(StatusCode, &'static str, String)>,
    hits: Arc<Mutex<Vec<ConsumerHit>>>,
}

async fn consumer_handler(
    State(fake): State<FakeConsumer>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    fake.hits.lock().unwrap().push(ConsumerHit {
        signature: headers
            .get("x-webhook-signature")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
        query,
    });
    let (status, content_type, text) = fake.reply.as_ref();
    (*status, [("content-type", *content_type)], text.clone()).into_response()
}

/// Fake consumer endpoint answering every GET/POST with a fixed reply.
pub async fn fake_consumer(
    status: StatusCode,
    content_type: &'static str,
    body: &str,
) -> (String, Arc<Mutex<Vec<ConsumerHit>>>) {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let fake = FakeConsumer {
        reply: Arc::new((status, content_type, body.to_string())),
        hits: hits.clone(),
    };
    let app = Router::new()
        .route("/handler", get(consumer_handler).post(consumer_handler))
        .with_state(fake);
    (format!("{}/handler", spawn(app).await), hits)
}

/// Queue-mode config with verification against `processor_url`.
pub fn queue_config(dir: &TempDir, processor_url: &str) -> RelayConfig {
    let mut config = RelayConfig::new(dir.path(), WEBHOOK_SECRET);
    config.verify = true;
    config.processor = Some(ProcessorConfig {
        base_url: processor_url.to_string(),
        secret_key: PROCESSOR_KEY.to_string(),
    });
    config.poll_secret = Some(POLL_SECRET.to_string());
    config
}

/// Fixed clock for the relay's poll-token checks.
pub fn poll_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap()
}

/// A valid token under [`poll_clock`].
pub fn poll_token() -> String {
    poll_token_at(poll_clock())
}

pub fn poll_token_at(at: DateTime<Utc>) -> String {
    TokenAuthenticator::new(POLL_SECRET, Default::default()).token_at(at)
}

pub fn sign(body: &str) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET, body.as_bytes())
}

pub fn webhook_request(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/?action=webhook")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("Signature", sig);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn pending_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/?action=get_pending&token={token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn mark_done_request(token: &str, tx_ref: Option<&str>) -> Request<Body> {
    let mut form = format!("token={token}");
    if let Some(tx_ref) = tx_ref {
        form.push_str(&format!("&tx_ref={tx_ref}"));
    }
    Request::builder()
        .method("POST")
        .uri("/?action=mark_done")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, value)
}
