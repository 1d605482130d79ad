//! The worker's axum router: the five OpenAI-compatible endpoints a
//! balancer forwards to.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use llamapool_protocol::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, ModelCard, ModelsResponse,
    ResponseFormat, ResponseMessage, StructuredChatCompletionRequest, Usage,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{CompiledGrammar, CompletionParams};
use crate::error::WorkerError;
use crate::grammar;
use crate::registry;

use super::state::WorkerState;
use super::wire;

const GRAMMAR_FALLBACK_SUFFIX: &str = "\nRespond with valid JSON only.";
/// The structured endpoint clamps its token budget to this ceiling
/// independent of the client-requested `max_tokens`.
const STRUCTURED_MAX_TOKENS_CEILING: u32 = 1000;

pub fn router(state: Arc<WorkerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(liveness))
        .route("/v1", get(v1_root))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route(
            "/v1/beta/chat/completions/parse",
            post(chat_completions_parse),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn now_unix_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn liveness() -> impl IntoResponse {
    Json(json!({ "message": "LlamaAPI サーバーが実行中です" }))
}

async fn v1_root() -> impl IntoResponse {
    Json(json!({
        "object": "api",
        "version": "v1",
        "message": "LlamaAPI Backend Server - OpenAI Compatible",
    }))
}

async fn list_models(State(state): State<Arc<WorkerState>>) -> Result<impl IntoResponse, WorkerError> {
    let models = registry::list_models(&state.models_dir)
        .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
    let now = now_unix_s();
    let cards = models
        .into_iter()
        .map(|m| ModelCard::new(m.name, now))
        .collect();
    Ok(Json(ModelsResponse::new(cards)))
}

fn resolve_or_404(state: &WorkerState, name: &str) -> Result<std::path::PathBuf, WorkerError> {
    registry::resolve_model_path(&state.models_dir, name)
        .ok_or_else(|| WorkerError::ModelNotFound(name.to_string()))
}

async fn chat_completions(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<impl IntoResponse, WorkerError> {
    request
        .validate()
        .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
    let model_path = resolve_or_404(&state, &request.model)?;

    let prompt = wire::compose_prompt(&request.messages);
    let params = CompletionParams {
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
    };
    let output = state.complete(&model_path, &prompt, params, None).await?;

    let prompt_tokens = wire::count_tokens_plain(&prompt);
    let completion_tokens = wire::count_tokens_plain(&output.text);

    let response = ChatCompletionResponse::new(
        wire::plain_completion_id(now_unix_s()),
        now_unix_s(),
        request.model,
        Choice::new(ResponseMessage::assistant(output.text)),
        Usage::plain(prompt_tokens, completion_tokens),
    );
    Ok(Json(response))
}

async fn chat_completions_parse(
    State(state): State<Arc<WorkerState>>,
    Json(request): Json<StructuredChatCompletionRequest>,
) -> Result<impl IntoResponse, WorkerError> {
    request
        .validate()
        .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
    let model_path = resolve_or_404(&state, &request.model)?;

    let prompt = wire::compose_prompt(&request.messages);
    let max_tokens = request.max_tokens.min(STRUCTURED_MAX_TOKENS_CEILING);
    let base_params = CompletionParams {
        max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
    };

    let (generated, parsed) = match request.response_format.as_ref().and_then(ResponseFormat::schema) {
        Some(schema) => run_structured(&state, &model_path, &prompt, base_params, schema).await?,
        None => {
            let output = state.complete(&model_path, &prompt, base_params, None).await?;
            (output.text.trim().to_string(), None)
        }
    };

    let prompt_tokens = wire::count_tokens_structured(&prompt);
    let completion_tokens = wire::count_tokens_structured(&generated);
    let fingerprint = wire::system_fingerprint(&request.model, request.seed, now_unix_s());

    let mut message = ResponseMessage::assistant(generated);
    if let Some(parsed) = parsed {
        message.parsed = Some(parsed);
        message.refusal = None;
    }

    let response = ChatCompletionResponse::new(
        wire::structured_completion_id(),
        now_unix_s(),
        request.model,
        Choice::new(message),
        Usage::structured(prompt_tokens, completion_tokens),
    )
    .with_fingerprint(fingerprint);

    Ok(Json(response))
}

/// Compile-grammar → complete → parse → fallback: the structured endpoint's
/// pipeline. Grammar failures never surface to the client as an
/// error; they always fall back to an unconstrained completion.
async fn run_structured(
    state: &WorkerState,
    model_path: &std::path::Path,
    prompt: &str,
    params: CompletionParams,
    schema: &Value,
) -> Result<(String, Option<Value>), WorkerError> {
    let grammar_result: Result<CompiledGrammar, WorkerError> = async {
        let gbnf = grammar::compile(schema).map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
        let compiled = state.engine.compile_grammar(&gbnf).await?;
        Ok(compiled)
    }
    .await;

    if let Ok(compiled) = grammar_result {
        let output = state.complete(model_path, prompt, params, Some(&compiled)).await;
        if let Ok(output) = output {
            let text = output.text.trim().to_string();
            return Ok(match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => (serde_json::to_string(&parsed).unwrap_or(text), Some(parsed)),
                Err(_) => {
                    let fallback = json!({ "error": "Grammar constraint failed", "content": text });
                    (fallback.to_string(), Some(fallback))
                }
            });
        }
    }

    // Grammar compile or grammar-constrained completion failed: retry once,
    // unconstrained, with the fallback instruction appended.
    let retry_prompt = format!("{prompt}{GRAMMAR_FALLBACK_SUFFIX}");
    let output = state.complete(model_path, &retry_prompt, params, None).await?;
    let text = output.text.trim().to_string();
    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) => Ok((serde_json::to_string(&parsed).unwrap_or(text), Some(parsed))),
        Err(_) => {
            let fallback = json!({ "error": "Fallback failed", "content": text });
            Ok((fallback.to_string(), Some(fallback)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use http_body_util::BodyExt;
    use llamapool_protocol::ChatMessage;
    use tower::ServiceExt;

    fn make_state(engine: Arc<MockEngine>) -> Arc<WorkerState> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiny.gguf"), b"fake").unwrap();
        Arc::new(WorkerState::new(
            dir.keep(),
            engine,
            4096,
            1,
        ))
    }

    #[tokio::test]
    async fn liveness_endpoint_returns_message() {
        let state = make_state(Arc::new(MockEngine::new()));
        let app = router(state);
        let response = app
            .oneshot(axum::http::Request::get("/").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_completions_unknown_model_is_404() {
        let state = make_state(Arc::new(MockEngine::new()));
        let app = router(state);
        let body = serde_json::to_vec(&json!({
            "model": "missing.gguf",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let response = app
            .oneshot(
                axum::http::Request::post("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chat_completions_happy_path_echoes_model_and_text() {
        let engine = Arc::new(MockEngine::new());
        engine.push_response("hello there");
        let state = make_state(engine);
        let app = router(state);
        let body = serde_json::to_vec(&json!({
            "model": "tiny.gguf",
            "messages": [{"role": "user", "content": "hi"}],
        }))
        .unwrap();
        let response = app
            .oneshot(
                axum::http::Request::post("/v1/chat/completions")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["model"], "tiny.gguf");
        assert_eq!(parsed["choices"][0]["message"]["content"], "hello there");
        assert!(parsed["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn structured_endpoint_falls_back_when_grammar_compile_fails() {
        let engine = Arc::new(MockEngine::new());
        engine.fail_next_grammar_compile();
        engine.push_response("{\"name\": \"x\"}");
        let state = make_state(engine);
        let app = router(state);
        let body = serde_json::to_vec(&json!({
            "model": "tiny.gguf",
            "messages": [{"role": "user", "content": "hi"}],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "schema": {"type": "object", "properties": {"name": {"type": "string"}}} }
            },
        }))
        .unwrap();
        let response = app
            .oneshot(
                axum::http::Request::post("/v1/beta/chat/completions/parse")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["system_fingerprint"].as_str().unwrap().starts_with("fp_"));
        assert_eq!(parsed["choices"][0]["message"]["parsed"]["name"], "x");
    }

    #[test]
    fn chat_message_roundtrips_role() {
        let m = ChatMessage::user("hi");
        assert_eq!(serde_json::to_value(&m).unwrap()["role"], "user");
    }
}
