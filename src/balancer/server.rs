//! The balancer's axum router: round-robin forwarding with
//! single-shot failover, health-probe-triggering status endpoints, and a
//! transparent relay for the three OpenAI-compatible worker endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backend::Backend;
use crate::error::BalancerError;

use super::probe::probe_stale_backends;
use super::state::BalancerState;

pub fn router(state: Arc<BalancerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(liveness))
        .route("/status", get(status))
        .route("/v1", get(v1_root))
        .route("/v1/models", get(forward_models))
        .route("/v1/chat/completions", post(forward_chat_completions))
        .route(
            "/v1/beta/chat/completions/parse",
            post(forward_chat_completions_parse),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct BackendStatus {
    url: String,
    healthy: bool,
    error_count: u32,
    avg_response_time: f64,
    last_check: f64,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    total_backends: usize,
    healthy_backends: usize,
    backends: Vec<BackendStatus>,
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn status_snapshot(state: &BalancerState) -> StatusResponse {
    let backends = state
        .backends()
        .iter()
        .map(|b| BackendStatus {
            url: b.url(),
            healthy: b.is_healthy(),
            error_count: b.error_count(),
            avg_response_time: round3(b.avg_response_time()),
            last_check: b.last_check_epoch_s(),
        })
        .collect();
    StatusResponse {
        total_backends: state.total_backends(),
        healthy_backends: state.healthy_backends(),
        backends,
    }
}

async fn liveness(State(state): State<Arc<BalancerState>>) -> impl IntoResponse {
    probe_stale_backends(&state).await;
    Json(json!({
        "message": "LlamaAPI ロードバランサーが実行中です",
        "status": status_snapshot(&state),
    }))
}

async fn v1_root(State(state): State<Arc<BalancerState>>) -> impl IntoResponse {
    probe_stale_backends(&state).await;
    Json(json!({
        "object": "api",
        "version": "v1",
        "message": "LlamaAPI Load Balancer - OpenAI Compatible",
        "status": status_snapshot(&state),
    }))
}

async fn status(State(state): State<Arc<BalancerState>>) -> impl IntoResponse {
    probe_stale_backends(&state).await;
    Json(status_snapshot(&state))
}

async fn forward_models(State(state): State<Arc<BalancerState>>) -> Result<Response, BalancerError> {
    relay(&state, Method::GET, "/v1/models", Bytes::new(), None).await
}

async fn forward_chat_completions(
    State(state): State<Arc<BalancerState>>,
    body: Bytes,
) -> Result<Response, BalancerError> {
    relay(
        &state,
        Method::POST,
        "/v1/chat/completions",
        body,
        Some(HeaderValue::from_static("application/json")),
    )
    .await
}

async fn forward_chat_completions_parse(
    State(state): State<Arc<BalancerState>>,
    body: Bytes,
) -> Result<Response, BalancerError> {
    relay(
        &state,
        Method::POST,
        "/v1/beta/chat/completions/parse",
        body,
        Some(HeaderValue::from_static("application/json")),
    )
    .await
}

/// Select → forward → mark → (on transport failure) select-excluding →
/// retry once → mark. Never inspects or rewrites the body; the response's
/// status code and bytes are relayed to the client exactly as the backend
/// returned them.
async fn relay(
    state: &BalancerState,
    method: Method,
    path: &str,
    body: Bytes,
    content_type: Option<HeaderValue>,
) -> Result<Response, BalancerError> {
    let first = state.select_next().ok_or(BalancerError::NoHealthyBackend)?;

    match forward_once(state, &first, &method, path, body.clone(), content_type.clone()).await {
        Ok((status, bytes)) => Ok(build_response(status, bytes)),
        Err(transport_message) => {
            let Some(alternate) = state.select_next_excluding(Some(&first)) else {
                return Err(BalancerError::AllRetriesFailed(transport_message));
            };
            match forward_once(state, &alternate, &method, path, body, content_type).await {
                Ok((status, bytes)) => Ok(build_response(status, bytes)),
                Err(retry_message) => Err(BalancerError::AllRetriesFailed(retry_message)),
            }
        }
    }
}

fn build_response(status: StatusCode, bytes: Bytes) -> Response {
    (status, [("content-type", "application/json")], bytes).into_response()
}

/// One forward attempt against a single backend. `Ok` always means the
/// backend was reached — its HTTP status may still be non-200, which is
/// marked as an error but relayed through rather than retried (only a
/// transport-level failure earns a retry).
async fn forward_once(
    state: &BalancerState,
    backend: &Arc<Backend>,
    method: &Method,
    path: &str,
    body: Bytes,
    content_type: Option<HeaderValue>,
) -> Result<(StatusCode, Bytes), String> {
    let _permit = state
        .connection_permits
        .acquire()
        .await
        .map_err(|e| e.to_string())?;

    let url = format!("{}{}", backend.url(), path);
    let mut request = state.http_client.request(method.clone(), &url);
    if let Some(content_type) = content_type {
        request = request.header(axum::http::header::CONTENT_TYPE, content_type);
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let started = Instant::now();
    let response = request.send().await.map_err(|e| {
        backend.mark_error();
        e.to_string()
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| {
        backend.mark_error();
        e.to_string()
    })?;

    if status.is_success() {
        backend.mark_success();
        backend.add_response_time(started.elapsed());
    } else {
        backend.mark_error();
    }
    Ok((status, bytes))
}
