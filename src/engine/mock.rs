//! A deterministic engine double used by the test suite and by `cargo run`
//! without a real model file. Never compiled into a release build unless
//! the `llama` feature is disabled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::EngineError;

use super::{CompiledGrammar, CompletionOutput, CompletionParams, EngineHandle, InferenceEngine};

#[derive(Debug)]
struct MockHandle {
    path: PathBuf,
}

/// Canned-response test double. Responses are popped off a queue in order;
/// once exhausted, `default_response` is returned forever.
#[derive(Debug)]
pub struct MockEngine {
    load_count: AtomicUsize,
    responses: Mutex<std::collections::VecDeque<String>>,
    default_response: String,
    fail_grammar_compile: std::sync::atomic::AtomicBool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            load_count: AtomicUsize::new(0),
            responses: Mutex::new(std::collections::VecDeque::new()),
            default_response: "mock completion".to_string(),
            fail_grammar_compile: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(text.into());
    }

    /// Make the next `compile_grammar` call fail, exercising the fallback
    /// path in the structured-output pipeline.
    pub fn fail_next_grammar_compile(&self) {
        self.fail_grammar_compile.store(true, Ordering::Release);
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Acquire)
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn load(
        &self,
        path: &Path,
        _ctx_window: u32,
        _threads: u32,
    ) -> Result<EngineHandle, EngineError> {
        self.load_count.fetch_add(1, Ordering::AcqRel);
        Ok(EngineHandle(Arc::new(MockHandle {
            path: path.to_path_buf(),
        })))
    }

    async fn compile_grammar(&self, gbnf: &str) -> Result<CompiledGrammar, EngineError> {
        if self.fail_grammar_compile.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Completion(
                "mock grammar compile failure".to_string(),
            ));
        }
        Ok(CompiledGrammar(Arc::new(gbnf.to_string())))
    }

    async fn complete(
        &self,
        _handle: &EngineHandle,
        _prompt: &str,
        _params: CompletionParams,
        _grammar: Option<&CompiledGrammar>,
    ) -> Result<CompletionOutput, EngineError> {
        let mut responses = self.responses.lock();
        let text = responses.pop_front().unwrap_or_else(|| self.default_response.clone());
        Ok(CompletionOutput { text })
    }

    fn free(&self, _handle: EngineHandle) {}
}
