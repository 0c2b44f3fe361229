//! ONNX Runtime backend
//!
//! Resolves model artifacts and runs the encoder forward pass.

pub mod model_files;
pub mod onnx_engine;

pub use model_files::{resolve_model_files, ModelFiles};
pub use onnx_engine::{OnnxConfig, OnnxEncoder};
