//! Real GGUF inference via `llama-cpp-2`, gated behind the `llama` feature.
//!
//! `llama_cpp_2`'s native types (`LlamaBackend`, `LlamaModel`, `LlamaContext`)
//! hold raw pointers and are not `Send`, so they cannot live behind an
//! `Arc<Mutex<_>>` shared across the worker's async request handlers. Instead
//! a single dedicated OS thread owns all native state for the process'
//! lifetime; every [`InferenceEngine`] call is a message sent across a
//! channel and a `tokio::sync::oneshot` reply awaited back on the async
//! side.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use tokio::sync::oneshot;

use crate::error::EngineError;

use super::{CompiledGrammar, CompletionOutput, CompletionParams, EngineHandle, InferenceEngine};

/// Lower bound applied to the requested context window, guarding against
/// a degenerate configuration.
const MIN_CTX: u32 = 2048;
const DECODE_BATCH: i32 = 512;
const GRAMMAR_ROOT: &str = "root";

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command {
    Load {
        path: PathBuf,
        ctx_window: u32,
        threads: u32,
        reply: Reply<u64>,
    },
    CompileGrammar {
        gbnf: String,
        reply: Reply<u64>,
    },
    Complete {
        model_id: u64,
        grammar_id: Option<u64>,
        prompt: String,
        params: CompletionParams,
        reply: Reply<CompletionOutput>,
    },
    Free {
        model_id: u64,
    },
    Shutdown,
}

/// Opaque handle payload stashed inside [`EngineHandle`]; only this module
/// ever downcasts it back out.
#[derive(Debug, Clone, Copy)]
struct ModelId(u64);

#[derive(Debug, Clone, Copy)]
struct GrammarId(u64);

/// A loaded model plus the context it was instantiated with. One context per
/// model keeps KV cache reuse simple; the worker only ever has at most one
/// model resident at a time anyway (the worker's hot-swap invariant).
struct LoadedModel {
    id: u64,
    model: LlamaModel,
    ctx: LlamaContext<'static>,
}

/// A compiled grammar is just the GBNF text plus the rule name to start
/// from; `llama_cpp_2` builds the actual grammar state fresh per sampler
/// chain, so there is nothing heavier to precompute here. The engine still
/// exercises the compile step eagerly so a malformed grammar is caught
/// before the first completion request rather than mid-stream.
struct LoadedGrammar {
    id: u64,
    gbnf: String,
}

pub struct LlamaEngine {
    tx: std_mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for LlamaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaEngine").finish_non_exhaustive()
    }
}

impl Default for LlamaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LlamaEngine {
    pub fn new() -> Self {
        let (tx, rx) = std_mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("llama-engine".to_string())
            .spawn(move || worker_thread_main(rx))
            .expect("failed to spawn llama engine thread");
        Self {
            tx,
            handle: Some(handle),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send<T: Send + 'static>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| EngineError::Completion("engine thread has shut down".to_string()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Completion("engine thread dropped the reply".to_string()))?
    }
}

impl Drop for LlamaEngine {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl InferenceEngine for LlamaEngine {
    async fn load(
        &self,
        path: &Path,
        ctx_window: u32,
        threads: u32,
    ) -> Result<EngineHandle, EngineError> {
        let path = path.to_path_buf();
        let model_id = self
            .send(|reply| Command::Load {
                path,
                ctx_window,
                threads,
                reply,
            })
            .await?;
        Ok(EngineHandle(Arc::new(ModelId(model_id))))
    }

    async fn compile_grammar(&self, gbnf: &str) -> Result<CompiledGrammar, EngineError> {
        let gbnf = gbnf.to_string();
        let grammar_id = self.send(|reply| Command::CompileGrammar { gbnf, reply }).await?;
        Ok(CompiledGrammar(Arc::new(GrammarId(grammar_id))))
    }

    async fn complete(
        &self,
        handle: &EngineHandle,
        prompt: &str,
        params: CompletionParams,
        grammar: Option<&CompiledGrammar>,
    ) -> Result<CompletionOutput, EngineError> {
        let model_id = handle
            .0
            .downcast_ref::<ModelId>()
            .ok_or_else(|| EngineError::Completion("handle is not a llama model id".to_string()))?
            .0;
        let grammar_id = match grammar {
            Some(g) => Some(
                g.0.downcast_ref::<GrammarId>()
                    .ok_or_else(|| {
                        EngineError::Completion("grammar is not a llama grammar id".to_string())
                    })?
                    .0,
            ),
            None => None,
        };
        let prompt = prompt.to_string();
        self.send(|reply| Command::Complete {
            model_id,
            grammar_id,
            prompt,
            params,
            reply,
        })
        .await
    }

    fn free(&self, handle: EngineHandle) {
        if let Some(ModelId(id)) = handle.0.downcast_ref::<ModelId>() {
            let _ = self.tx.send(Command::Free { model_id: *id });
        }
    }
}

fn worker_thread_main(rx: std_mpsc::Receiver<Command>) {
    let backend = match LlamaBackend::init() {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("failed to initialize llama backend: {e}");
            return;
        }
    };

    let mut models: Vec<LoadedModel> = Vec::new();
    let mut grammars: Vec<LoadedGrammar> = Vec::new();

    while let Ok(command) = rx.recv() {
        match command {
            Command::Shutdown => break,
            Command::Load {
                path,
                ctx_window,
                threads,
                reply,
            } => {
                let id = models.last().map(|m| m.id).unwrap_or(0) + 1;
                let result = load_model(&backend, &path, ctx_window, threads, id);
                match result {
                    Ok(loaded) => {
                        models.push(loaded);
                        let _ = reply.send(Ok(id));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::CompileGrammar { gbnf, reply } => {
                if let Err(e) = validate_grammar(&gbnf) {
                    let _ = reply.send(Err(e));
                    continue;
                }
                let id = grammars.last().map(|g| g.id).unwrap_or(0) + 1;
                grammars.push(LoadedGrammar { id, gbnf });
                let _ = reply.send(Ok(id));
            }
            Command::Complete {
                model_id,
                grammar_id,
                prompt,
                params,
                reply,
            } => {
                let Some(loaded) = models.iter_mut().find(|m| m.id == model_id) else {
                    let _ = reply.send(Err(EngineError::Completion(
                        "no model loaded for this handle".to_string(),
                    )));
                    continue;
                };
                let grammar = grammar_id.and_then(|gid| grammars.iter().find(|g| g.id == gid));
                let result = run_completion(loaded, &prompt, params, grammar.map(|g| g.gbnf.as_str()));
                let _ = reply.send(result);
            }
            Command::Free { model_id } => {
                models.retain(|m| m.id != model_id);
            }
        }
    }
}

fn load_model(
    backend: &LlamaBackend,
    path: &Path,
    ctx_window: u32,
    threads: u32,
    id: u64,
) -> Result<LoadedModel, EngineError> {
    let model_params = LlamaModelParams::default();
    let model = LlamaModel::load_from_file(backend, path, &model_params).map_err(|e| EngineError::Load {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let n_ctx = ctx_window.max(MIN_CTX).min(model.n_ctx_train());
    let n_ctx = NonZeroU32::new(n_ctx).unwrap_or(NonZeroU32::new(MIN_CTX).unwrap());
    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx))
        .with_n_batch(DECODE_BATCH as u32)
        .with_n_threads(threads as i32)
        .with_n_threads_batch(threads as i32);

    // SAFETY: `ctx` borrows from `model`; both are owned together inside
    // `LoadedModel` and dropped together, so the borrow never outlives its
    // source. `llama_cpp_2` ties the context lifetime to the model
    // reference, which this module upholds by never exposing `model` and
    // `ctx` separately.
    let model_static: &'static LlamaModel = unsafe { std::mem::transmute(&model) };
    let ctx = model_static
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::Load {
            path: path.display().to_string(),
            message: format!("failed to create context: {e}"),
        })?;

    Ok(LoadedModel { id, model, ctx })
}

/// Cheap upfront rejection of grammar text that cannot possibly be valid
/// GBNF, so `compile_grammar` fails fast instead of only at first use.
fn validate_grammar(gbnf: &str) -> Result<(), EngineError> {
    if gbnf.trim().is_empty() {
        return Err(EngineError::Completion("empty grammar".to_string()));
    }
    if !gbnf.contains(&format!("{GRAMMAR_ROOT} ::=")) && !gbnf.contains(&format!("{GRAMMAR_ROOT}::=")) {
        return Err(EngineError::Completion(format!(
            "grammar has no '{GRAMMAR_ROOT}' rule"
        )));
    }
    Ok(())
}

fn build_prompt(model: &LlamaModel, prompt: &str) -> Result<String, EngineError> {
    let template = model.chat_template(None).map_err(|e| {
        EngineError::Completion(format!("failed to load chat template: {e}"))
    })?;
    let message = LlamaChatMessage::new("user".to_string(), prompt.to_string())
        .map_err(|e| EngineError::Completion(format!("failed to build chat message: {e}")))?;
    model
        .apply_chat_template(&template, &[message], true)
        .map_err(|e| EngineError::Completion(format!("failed to apply chat template: {e}")))
}

fn run_completion(
    loaded: &mut LoadedModel,
    prompt: &str,
    params: CompletionParams,
    grammar_gbnf: Option<&str>,
) -> Result<CompletionOutput, EngineError> {
    let templated = build_prompt(&loaded.model, prompt)?;
    let tokens = loaded
        .model
        .str_to_token(&templated, AddBos::Always)
        .map_err(|e| EngineError::Completion(format!("tokenization failed: {e}")))?;

    let mut batch = LlamaBatch::new(DECODE_BATCH as usize, 1);
    for (i, token) in tokens.iter().enumerate() {
        let is_last = i == tokens.len() - 1;
        batch
            .add(*token, i as i32, &[0], is_last)
            .map_err(|e| EngineError::Completion(format!("failed to add token to batch: {e}")))?;
    }
    loaded
        .ctx
        .decode(&mut batch)
        .map_err(|e| EngineError::Completion(format!("failed to decode prompt: {e}")))?;

    let mut chain: Vec<LlamaSampler> = Vec::new();
    if let Some(gbnf) = grammar_gbnf {
        let grammar_sampler = LlamaSampler::grammar(&loaded.model, gbnf, GRAMMAR_ROOT).ok_or_else(|| {
            EngineError::Completion("llama.cpp rejected the compiled grammar".to_string())
        })?;
        chain.push(grammar_sampler);
    }
    if params.temperature < 0.01 {
        chain.push(LlamaSampler::greedy());
    } else {
        chain.push(LlamaSampler::top_p(params.top_p, 1));
        chain.push(LlamaSampler::temp(params.temperature));
        chain.push(LlamaSampler::dist(rand_seed()));
    }
    let mut sampler = LlamaSampler::chain_simple(chain);

    let mut output = String::new();
    let mut n_cur = tokens.len() as i32;
    let mut decode_batch = LlamaBatch::new(DECODE_BATCH as usize, 1);

    for _ in 0..params.max_tokens {
        let new_token = sampler.sample(&loaded.ctx, batch.n_tokens() - 1);
        sampler.accept(new_token);

        if loaded.model.is_eog_token(new_token) {
            break;
        }

        let piece = loaded
            .model
            .token_to_str(new_token, llama_cpp_2::model::Special::Tokenize)
            .unwrap_or_default();
        output.push_str(&piece);

        decode_batch.clear();
        decode_batch
            .add(new_token, n_cur, &[0], true)
            .map_err(|e| EngineError::Completion(format!("failed to extend batch: {e}")))?;
        loaded
            .ctx
            .decode(&mut decode_batch)
            .map_err(|e| EngineError::Completion(format!("decode failed: {e}")))?;
        n_cur += 1;
        batch = LlamaBatch::new(DECODE_BATCH as usize, 1);
        batch
            .add(new_token, n_cur - 1, &[0], true)
            .map_err(|e| EngineError::Completion(format!("failed to track batch: {e}")))?;
    }

    Ok(CompletionOutput { text: output })
}

fn rand_seed() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0xC0FFEE)
}

