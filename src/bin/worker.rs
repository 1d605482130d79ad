//! `llamapool-worker` — a single-model OpenAI-compatible inference process.
//!
//! `worker <models_dir> [host=127.0.0.1] [port=8080] [threads=1]`

use std::sync::Arc;

use clap::Parser;
use llamapool::config::WorkerArgs;
use llamapool::engine::InferenceEngine;
use llamapool::worker::{router, WorkerState};

#[tokio::main]
async fn main() {
    llamapool::init_tracing();

    let args = WorkerArgs::parse();
    if let Err(e) = args.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let engine: Arc<dyn InferenceEngine> = build_engine();
    let state = Arc::new(WorkerState::new(
        args.models_dir.clone(),
        engine,
        args.ctx_window,
        args.threads,
    ));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, models_dir = %args.models_dir.display(), "worker listening");
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %e, "worker server exited with an error");
        std::process::exit(1);
    }
}

#[cfg(feature = "llama")]
fn build_engine() -> Arc<dyn InferenceEngine> {
    Arc::new(llamapool::engine::llama::LlamaEngine::new())
}

#[cfg(not(feature = "llama"))]
fn build_engine() -> Arc<dyn InferenceEngine> {
    Arc::new(llamapool::engine::mock::MockEngine::new())
}
