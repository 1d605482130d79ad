//! Model registry: directory listing of `.gguf` model files.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const MODEL_SUFFIX: &str = ".gguf";

/// An on-disk model file. Equality is by `path` — two descriptors with the
/// same path are the same model even if `size_bytes` was re-read between
/// calls.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl PartialEq for ModelDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}
impl Eq for ModelDescriptor {}

/// Scans `dir` for regular files whose name ends in [`MODEL_SUFFIX`].
///
/// Ordering is whatever the OS directory iterator yields — stable within a
/// single call, not guaranteed across calls or platforms.
pub fn list_models(dir: &Path) -> Result<Vec<ModelDescriptor>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::ModelsDirNotFound(dir.display().to_string()));
    }

    let mut models = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(MODEL_SUFFIX) {
            continue;
        }
        let size_bytes = entry.metadata()?.len();
        models.push(ModelDescriptor {
            name: name.to_string(),
            path,
            size_bytes,
        });
    }
    Ok(models)
}

/// Resolves a client-supplied model name to a path under `models_dir`,
/// returning `None` if the file does not exist (the caller maps that to
/// `WorkerError::ModelNotFound`).
pub fn resolve_model_path(models_dir: &Path, name: &str) -> Option<PathBuf> {
    let path = models_dir.join(name);
    path.is_file().then_some(path)
}
