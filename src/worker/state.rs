//! Worker state: the single resident model slot and its concurrency model.
//!
//! At most one model is resident at a time. The resident slot is guarded by
//! a single async mutex that is held for the *entire* duration of a
//! completion — this is what serializes requests onto one engine handle and
//! what makes a model hot-swap safe (the swap cannot race an in-flight
//! completion because both take the same lock).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::engine::{EngineHandle, InferenceEngine};
use crate::error::WorkerError;

struct Resident {
    path: Option<PathBuf>,
    handle: Option<EngineHandle>,
}

pub struct WorkerState {
    pub models_dir: PathBuf,
    pub engine: Arc<dyn InferenceEngine>,
    pub ctx_window: u32,
    pub threads: u32,
    resident: Mutex<Resident>,
}

impl WorkerState {
    pub fn new(models_dir: PathBuf, engine: Arc<dyn InferenceEngine>, ctx_window: u32, threads: u32) -> Self {
        Self {
            models_dir,
            engine,
            ctx_window,
            threads,
            resident: Mutex::new(Resident {
                path: None,
                handle: None,
            }),
        }
    }

    /// Resolves `model_name` under `models_dir`, swapping the resident model
    /// in if it differs from what is currently loaded, and runs one
    /// completion against it. Held for the whole call so no other request
    /// can observe a torn-down handle mid-swap.
    pub async fn complete(
        &self,
        model_path: &Path,
        prompt: &str,
        params: crate::engine::CompletionParams,
        grammar: Option<&crate::engine::CompiledGrammar>,
    ) -> Result<crate::engine::CompletionOutput, WorkerError> {
        let mut resident = self.resident.lock().await;

        let needs_reload = resident.path.as_deref() != Some(model_path);
        if needs_reload {
            if let Some(old_handle) = resident.handle.take() {
                self.engine.free(old_handle);
            }
            let handle = self
                .engine
                .load(model_path, self.ctx_window, self.threads)
                .await?;
            resident.handle = Some(handle);
            resident.path = Some(model_path.to_path_buf());
        }

        let handle = resident
            .handle
            .as_ref()
            .expect("resident handle is set immediately above when absent");
        let output = self.engine.complete(handle, prompt, params, grammar).await?;
        Ok(output)
    }
}
