//! Configuration for the embedding core
//!
//! Parsed from the `[embedding]` section of the server configuration, or
//! standalone from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::device::Device;
use crate::models::{EmbeddingError, EmbeddingResult};

/// Upper bound on auto-sized worker pools
pub const MAX_AUTO_WORKERS: usize = 32;

/// Settings for loading and serving a single embedding model
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Local model directory or Hugging Face repository id
    pub model: String,
    /// Device override; auto-selected when absent
    pub device: Option<Device>,
    /// Maximum number of texts per inference call
    pub batch_size: usize,
    /// Maximum tokens per text; longer texts are truncated
    pub max_length: usize,
    /// Background inference workers; auto-sized when absent
    pub worker_threads: Option<usize>,
    /// ONNX graph location inside the model directory or repository
    pub onnx_file: String,
    /// ONNX Runtime intra-op threads per inference call
    pub intra_threads: Option<usize>,
    /// Dynamic ONNX Runtime library to load instead of the bundled one
    pub runtime_library: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            device: None,
            batch_size: 32,
            max_length: 512,
            worker_threads: None,
            onnx_file: "onnx/model.onnx".to_string(),
            intra_threads: None,
            runtime_library: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> EmbeddingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> EmbeddingResult<Self> {
        let config: EmbeddingConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Number of background workers: explicit setting, or one per available
    /// CPU thread capped at [`MAX_AUTO_WORKERS`].
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
                .min(MAX_AUTO_WORKERS)
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> EmbeddingResult<()> {
        if self.model.trim().is_empty() {
            return Err(config_error("model identifier cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be greater than 0"));
        }
        if self.max_length == 0 {
            return Err(config_error("max_length must be greater than 0"));
        }
        if self.worker_threads == Some(0) {
            return Err(config_error("worker_threads must be greater than 0"));
        }
        if self.intra_threads == Some(0) {
            return Err(config_error("intra_threads must be greater than 0"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> EmbeddingError {
    EmbeddingError::ConfigError { message: message.to_string() }
}
