//! Model artifact resolution
//!
//! A model identifier is either a local directory holding `tokenizer.json`
//! and an ONNX graph, or a Hugging Face repository id fetched through the
//! Hub cache.

use hf_hub::api::sync::Api;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::config::EmbeddingConfig;
use crate::models::{EmbeddingError, EmbeddingResult};

pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Graph name tried when the configured ONNX file is absent
pub const FALLBACK_ONNX_FILE: &str = "model.onnx";

/// Paths to the artifacts the encoder loads
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

/// Locate the ONNX graph and tokenizer for `config.model`.
pub fn resolve_model_files(config: &EmbeddingConfig) -> EmbeddingResult<ModelFiles> {
    if is_local(&config.model) {
        local_files(Path::new(&config.model), &config.onnx_file, &config.model)
    } else {
        hub_files(&config.model, &config.onnx_file)
    }
}

fn is_local(model: &str) -> bool {
    let path = Path::new(model);
    path.is_dir() || path.is_absolute() || model.starts_with('.')
}

fn load_failed(model_name: &str, error: impl Into<String>) -> EmbeddingError {
    EmbeddingError::ModelLoadFailed {
        model_name: model_name.to_string(),
        error: error.into(),
    }
}

fn local_files(dir: &Path, onnx_file: &str, model_name: &str) -> EmbeddingResult<ModelFiles> {
    if !dir.is_dir() {
        return Err(load_failed(
            model_name,
            format!("model directory not found: {}", dir.display()),
        ));
    }

    let tokenizer = dir.join(TOKENIZER_FILE);
    if !tokenizer.is_file() {
        return Err(load_failed(
            model_name,
            format!("tokenizer not found: {}", tokenizer.display()),
        ));
    }

    let model = [onnx_file, FALLBACK_ONNX_FILE]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            load_failed(
                model_name,
                format!("no ONNX graph ({} or {}) in {}", onnx_file, FALLBACK_ONNX_FILE, dir.display()),
            )
        })?;

    debug!("Using local model files {:?} and {:?}", model, tokenizer);
    Ok(ModelFiles { model, tokenizer })
}

fn hub_files(repo_id: &str, onnx_file: &str) -> EmbeddingResult<ModelFiles> {
    info!("Resolving {} from the Hugging Face Hub", repo_id);
    let api = Api::new().map_err(|e| load_failed(repo_id, e.to_string()))?;
    let repo = api.model(repo_id.to_string());

    let tokenizer = repo
        .get(TOKENIZER_FILE)
        .map_err(|e| load_failed(repo_id, format!("{}: {}", TOKENIZER_FILE, e)))?;
    let model = repo
        .get(onnx_file)
        .or_else(|_| repo.get(FALLBACK_ONNX_FILE))
        .map_err(|e| load_failed(repo_id, format!("{}: {}", onnx_file, e)))?;

    Ok(ModelFiles { model, tokenizer })
}
