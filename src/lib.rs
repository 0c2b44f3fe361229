//! Embedding API Library
//!
//! Sentence embeddings from a transformer encoder: device selection, ONNX
//! inference, mean pooling with L2 normalization, and batch scheduling over
//! a dedicated worker pool. The HTTP server in [`server`] is a thin shell
//! over [`EmbeddingService`].

pub mod models;
pub mod onnx;
pub mod protocol;
pub mod server;

// Re-exports
pub use models::{
    select_device, Device, EmbedInput, EmbedOutput, Embedding, EmbeddingConfig, EmbeddingError,
    EmbeddingModel, EmbeddingResult, EmbeddingService, ErrorKind,
};
pub use server::{start_hyper_http_server, ServerConfig};
