//! Inference adapter: the thin, engine-agnostic contract the worker
//! calls into. The concrete backend (GGUF-via-llama.cpp, or the in-process
//! mock used by tests) is injected at construction time rather than
//! referenced as a module-level global.

pub mod mock;
#[cfg(feature = "llama")]
pub mod llama;

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;

/// An opaque handle to a loaded model. Only the engine that produced it
/// knows what is inside; the worker treats it as a capability token.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// An opaque pre-compiled grammar object, produced by
/// [`InferenceEngine::compile_grammar`] from the GBNF text the grammar
/// compiler emits.
#[derive(Clone)]
pub struct CompiledGrammar(pub Arc<dyn Any + Send + Sync>);

impl fmt::Debug for CompiledGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGrammar").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub text: String,
}

/// Contract over the opaque native inference library. No streaming: every
/// call returns the full completion text in one shot.
#[async_trait]
pub trait InferenceEngine: Send + Sync + fmt::Debug {
    /// Builds/initializes the in-memory model from a file path.
    async fn load(
        &self,
        path: &Path,
        ctx_window: u32,
        threads: u32,
    ) -> Result<EngineHandle, EngineError>;

    /// Compiles GBNF grammar text (produced by the schema→grammar
    /// compiler) into whatever representation this engine's sampler needs.
    async fn compile_grammar(&self, gbnf: &str) -> Result<CompiledGrammar, EngineError>;

    /// Runs a single, non-streaming completion. When `grammar` is present
    /// the engine must only emit tokens consistent with it.
    async fn complete(
        &self,
        handle: &EngineHandle,
        prompt: &str,
        params: CompletionParams,
        grammar: Option<&CompiledGrammar>,
    ) -> Result<CompletionOutput, EngineError>;

    /// Idempotent release of a handle's resources.
    fn free(&self, handle: EngineHandle);
}
