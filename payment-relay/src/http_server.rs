use crate::pipeline::Relay;
use crate::signature::header_value;
use crate::types::WebhookEnvelope;
use axum::{
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Debug, Default, Deserialize)]
struct ActionQuery {
    action: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AckForm {
    token: Option<String>,
    tx_ref: Option<String>,
}

/// Every endpoint lives on `/`, selected by `?action=`:
///
/// - `POST /?action=webhook` (the default for POST): processor webhooks
/// - `GET /?action=get_pending&token=..`: unacknowledged payments
/// - `POST /?action=mark_done` (or `mark_processed`), form `token`, `tx_ref`
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(handle_get).post(handle_post))
        .with_state(relay)
}

/// Serve until `shutdown` resolves. Returns once in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("payment relay listening on {addr}");
    axum::serve(listener, router(relay))
        .with_graceful_shutdown(shutdown)
        .await
}

fn unknown_action() -> Response {
    (StatusCode::NOT_FOUND, "Unknown action").into_response()
}

async fn handle_get(State(relay): State<Arc<Relay>>, Query(query): Query<ActionQuery>) -> Response {
    match query.action.as_deref() {
        Some("get_pending") => match relay.pending(query.token.as_deref()).await {
            Ok(pending) => Json(pending).into_response(),
            Err(e) => e.into_response(),
        },
        _ => unknown_action(),
    }
}

async fn handle_post(
    State(relay): State<Arc<Relay>>,
    Query(query): Query<ActionQuery>,
    request: Request,
) -> Response {
    match query.action.as_deref().unwrap_or("webhook") {
        "webhook" => handle_webhook(relay, request).await,
        "mark_done" | "mark_processed" => handle_mark_processed(relay, query, request).await,
        _ => unknown_action(),
    }
}

async fn handle_webhook(relay: Arc<Relay>, request: Request) -> Response {
    let signature = header_value(request.headers(), &relay.config().signature_header);
    let body = match Bytes::from_request(request, &()).await {
        Ok(b) => b,
        Err(rejection) => return rejection.into_response(),
    };
    debug!("webhook received ({} bytes)", body.len());

    let envelope = WebhookEnvelope {
        body: body.to_vec(),
        signature,
    };
    match relay.handle_webhook(envelope).await {
        Ok(accepted) => (StatusCode::OK, accepted.message()).into_response(),
        Err(e) => {
            let (status, reason) = e.status_and_reason();
            (status, reason).into_response()
        }
    }
}

async fn handle_mark_processed(relay: Arc<Relay>, query: ActionQuery, request: Request) -> Response {
    let form = match Form::<AckForm>::from_request(request, &()).await {
        Ok(Form(form)) => form,
        Err(rejection) => {
            debug!("unreadable ack form: {rejection}");
            AckForm::default()
        }
    };
    let token = form.token.or(query.token);

    match relay
        .mark_processed(token.as_deref(), form.tx_ref.as_deref())
        .await
    {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => e.into_response(),
    }
}
