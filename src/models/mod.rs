//! Embedding core
//!
//! Device selection, the model runtime seam, pooling, batch scheduling and
//! the worker pool that keeps inference off the async runtime.

pub mod batching;
pub mod config;
pub mod device;
pub mod manager;
pub mod model;
pub mod pool;
pub mod pooling;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use batching::{EmbedInput, EmbedOutput};
pub use config::EmbeddingConfig;
pub use device::{select_device, Device};
pub use manager::EmbeddingService;
pub use model::{EmbeddingModel, Encoder, TokenStates};
pub use pool::WorkerPool;

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Coarse classification of an [`EmbeddingError`], used by hosts to map
/// failures onto their own protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Model or tokenizer could not be resolved or loaded
    Startup,
    /// A single request failed while tokenizing or running the forward pass
    Request,
    /// The service was used outside its initialize/shutdown window
    Uninitialized,
    /// Invalid configuration
    Config,
}

/// Errors that can occur in embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Model loading failed: {model_name} - {error}")]
    ModelLoadFailed { model_name: String, error: String },

    #[error("Inference failed: {error}")]
    InferenceError { error: String },

    #[error("Embedding service is not initialized")]
    NotInitialized,

    #[error("Embedding service is already initialized")]
    AlreadyInitialized,

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("IO error: {error}")]
    IoError { error: std::io::Error },

    #[error("TOML parsing error: {error}")]
    TomlError { error: toml::de::Error },
}

impl EmbeddingError {
    pub(crate) fn inference(error: impl std::fmt::Display) -> Self {
        EmbeddingError::InferenceError { error: error.to_string() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EmbeddingError::ModelLoadFailed { .. } => ErrorKind::Startup,
            EmbeddingError::NotInitialized | EmbeddingError::AlreadyInitialized => {
                ErrorKind::Uninitialized
            }
            EmbeddingError::ConfigError { .. }
            | EmbeddingError::IoError { .. }
            | EmbeddingError::TomlError { .. } => ErrorKind::Config,
            EmbeddingError::InferenceError { .. } | EmbeddingError::InvalidInput { .. } => {
                ErrorKind::Request
            }
        }
    }
}

impl From<std::io::Error> for EmbeddingError {
    fn from(error: std::io::Error) -> Self {
        EmbeddingError::IoError { error }
    }
}

impl From<toml::de::Error> for EmbeddingError {
    fn from(error: toml::de::Error) -> Self {
        EmbeddingError::TomlError { error }
    }
}

impl From<ort::Error> for EmbeddingError {
    fn from(error: ort::Error) -> Self {
        EmbeddingError::InferenceError { error: error.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EmbeddingError::NotInitialized.kind(), ErrorKind::Uninitialized);
        assert_eq!(
            EmbeddingError::ModelLoadFailed {
                model_name: "missing/model".to_string(),
                error: "not found".to_string(),
            }
            .kind(),
            ErrorKind::Startup
        );
        assert_eq!(EmbeddingError::inference("oom").kind(), ErrorKind::Request);
        assert_eq!(
            EmbeddingError::ConfigError { message: "bad".to_string() }.kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_error_messages() {
        let err = EmbeddingError::ModelLoadFailed {
            model_name: "org/model".to_string(),
            error: "tokenizer.json missing".to_string(),
        };
        assert_eq!(err.to_string(), "Model loading failed: org/model - tokenizer.json missing");
        assert_eq!(
            EmbeddingError::NotInitialized.to_string(),
            "Embedding service is not initialized"
        );
    }
}
