//! Error taxonomy for the three binaries, mapped to HTTP status codes where
//! they cross the wire.
//!
//! Each HTTP-facing error implements `IntoResponse` directly so handlers can
//! return `Result<Json<T>, WorkerError>` / `Result<Json<T>, BalancerError>`
//! and let `?` do the status-code mapping, via small helper constructors
//! over a single JSON error shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Startup-time configuration failures. Never reach an HTTP client — they
/// are printed to stderr and the process exits with code 1.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("models directory does not exist or is not a directory: {0}")]
    ModelsDirNotFound(String),

    #[error("worker count {0} exceeds the maximum of 30")]
    TooManyWorkers(u32),

    #[error(
        "port window [{base_port}, {end}) falls outside the allowed range [{}, {})",
        allowed.start, allowed.end,
        end = *base_port as u32 + *count
    )]
    PortRange {
        base_port: u16,
        count: u32,
        allowed: std::ops::Range<u16>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the worker's HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("モデルが見つかりません: {0}")]
    ModelNotFound(String),

    #[error("生成エラー: {0}")]
    Engine(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        match self {
            WorkerError::ModelNotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "モデルが見つかりません" })),
            )
                .into_response(),
            WorkerError::Engine(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": format!("生成エラー: {message}") })),
            )
                .into_response(),
            WorkerError::InvalidRequest(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": message })),
            )
                .into_response(),
        }
    }
}

/// Errors raised by the balancer's HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error("利用可能なバックエンドサーバーがありません")]
    NoHealthyBackend,

    #[error("バックエンドサーバーエラー: {0}")]
    AllRetriesFailed(String),
}

impl IntoResponse for BalancerError {
    fn into_response(self) -> Response {
        match self {
            BalancerError::NoHealthyBackend => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "利用可能なバックエンドサーバーがありません" })),
            )
                .into_response(),
            BalancerError::AllRetriesFailed(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "detail": format!("バックエンドサーバーエラー: {message}") })),
            )
                .into_response(),
        }
    }
}

/// Engine-level failures surfaced by [`crate::engine::InferenceEngine`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load model {path}: {message}")]
    Load { path: String, message: String },
    #[error("completion failed: {0}")]
    Completion(String),
}

impl From<EngineError> for WorkerError {
    fn from(e: EngineError) -> Self {
        WorkerError::Engine(e.to_string())
    }
}

/// A schema fell outside the subset the grammar compiler understands.
/// Never surfaced to the client directly — the worker catches it and
/// falls back to an unconstrained completion.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unsupported top-level schema type: {0}")]
    UnsupportedTopLevel(String),
    #[error("unsupported property type: {0}")]
    UnsupportedPropertyType(String),
    #[error("enum must be a non-empty array of strings")]
    EmptyOrInvalidEnum,
    #[error("object schema missing 'properties'")]
    MissingProperties,
    #[error("array schema missing 'items'")]
    MissingItems,
}
