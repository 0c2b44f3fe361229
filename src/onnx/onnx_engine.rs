//! # ONNX Encoder
//!
//! Tokenizer plus ONNX Runtime session bound to the selected device. Turns a
//! batch of texts into last-layer hidden states and the attention mask;
//! pooling happens in [`crate::models::pooling`].
//!
//! ## Usage
//!
//! ```ignore
//! let config = EmbeddingConfig::new("sentence-transformers/all-MiniLM-L6-v2");
//! let encoder = OnnxEncoder::load(&config, Device::resolve(config.device))?;
//! let states = encoder.infer(&["Hello world".to_string()])?;
//! ```

use ndarray::{Array2, Array3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::sync::{Mutex, PoisonError};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info, instrument};

use crate::models::config::EmbeddingConfig;
use crate::models::device::Device;
use crate::models::model::{Encoder, TokenStates};
use crate::models::{EmbeddingError, EmbeddingResult};
use crate::onnx::model_files::{resolve_model_files, ModelFiles};

/// Configuration for ONNX Runtime
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to a dynamic ONNX Runtime library (DLL/so/dylib)
    pub library_path: Option<String>,
    /// Thread pool size for inference
    pub thread_pool_size: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            thread_pool_size: 4,
        }
    }
}

impl From<&EmbeddingConfig> for OnnxConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            library_path: config.runtime_library.clone(),
            thread_pool_size: config.intra_threads.unwrap_or(OnnxConfig::default().thread_pool_size),
        }
    }
}

/// Tokenizer and ONNX session for one model
pub struct OnnxEncoder {
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_name: String,
    device: Device,
    max_seq_length: usize,
    /// Graph declares a `token_type_ids` input
    uses_token_types: bool,
    /// Output holding per-token hidden states
    hidden_output: String,
}

impl std::fmt::Debug for OnnxEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEncoder")
            .field("model_name", &self.model_name)
            .field("device", &self.device)
            .field("max_seq_length", &self.max_seq_length)
            .field("hidden_output", &self.hidden_output)
            .finish_non_exhaustive()
    }
}

impl OnnxEncoder {
    /// Resolve `config.model` and load it onto `device`.
    ///
    /// Every failure here is [`EmbeddingError::ModelLoadFailed`].
    pub fn load(config: &EmbeddingConfig, device: Device) -> EmbeddingResult<Self> {
        let files = resolve_model_files(config)?;
        Self::from_files(&config.model, &files, &OnnxConfig::from(config), device, config.max_length)
    }

    pub fn from_files(
        model_name: &str,
        files: &ModelFiles,
        onnx_config: &OnnxConfig,
        device: Device,
        max_seq_length: usize,
    ) -> EmbeddingResult<Self> {
        info!("Loading model {} from {} on {}", model_name, files.model.display(), device);
        let load_failed = |error: String| EmbeddingError::ModelLoadFailed {
            model_name: model_name.to_string(),
            error,
        };

        if let Some(library_path) = &onnx_config.library_path {
            std::env::set_var("ORT_DYLIB_PATH", library_path);
            debug!("Set ORT_DYLIB_PATH to: {}", library_path);
        }

        // CUDA doesn't benefit from multiple intra-op threads
        let intra_threads = match device {
            Device::Cuda => 1,
            _ => onnx_config.thread_pool_size,
        };

        let session = Session::builder()
            .and_then(|builder| builder.with_execution_providers(device.execution_providers()))
            .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|builder| builder.with_intra_threads(intra_threads))
            .and_then(|builder| builder.commit_from_file(&files.model))
            .map_err(|e| load_failed(format!("Failed to load ONNX model: {}", e)))?;

        let uses_token_types = session.inputs.iter().any(|input| input.name == "token_type_ids");
        let hidden_output = hidden_output_name(session.outputs.iter().map(|output| output.name.as_str()))
            .ok_or_else(|| load_failed("ONNX model declares no outputs".to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| load_failed(format!("Failed to load tokenizer: {}", e)))?;
        configure_tokenizer(&mut tokenizer, max_seq_length).map_err(|e| load_failed(e.to_string()))?;

        info!("ONNX encoder initialized with {} intra-op threads", intra_threads);
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_name: model_name.to_string(),
            device,
            max_seq_length,
            uses_token_types,
            hidden_output,
        })
    }

}

/// Pad every batch to its longest text and truncate at `max_length`. A pad
/// token declared by the tokenizer itself is kept.
pub fn configure_tokenizer(tokenizer: &mut Tokenizer, max_length: usize) -> EmbeddingResult<()> {
    let mut padding = tokenizer.get_padding().cloned().unwrap_or_else(PaddingParams::default);
    padding.strategy = PaddingStrategy::BatchLongest;
    tokenizer.with_padding(Some(padding));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| EmbeddingError::ConfigError {
            message: format!("Failed to configure truncation: {}", e),
        })?;
    Ok(())
}

/// `last_hidden_state` when the graph declares it, otherwise its first output.
fn hidden_output_name<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let names: Vec<&str> = names.into_iter().collect();
    names
        .iter()
        .find(|&&name| name == "last_hidden_state")
        .or_else(|| names.first())
        .map(|name| name.to_string())
}

fn tokenize(tokenizer: &Tokenizer, texts: &[String]) -> EmbeddingResult<Vec<Encoding>> {
    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| EmbeddingError::inference(format!("Tokenization failed: {}", e)))
}

/// Copy a `[batch, seq_len, hidden]` output tensor into an owned array.
fn hidden_states(shape: &[i64], data: &[f32]) -> EmbeddingResult<Array3<f32>> {
    let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
    if dims.len() != 3 {
        return Err(EmbeddingError::inference(format!(
            "Expected 3D hidden states, got shape {:?}",
            dims
        )));
    }
    Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec())
        .map_err(|e| EmbeddingError::inference(format!("Failed to shape output: {}", e)))
}

/// Flatten one per-token field of each encoding into `[batch, seq_len]`.
fn stack(encodings: &[Encoding], seq_len: usize, field: fn(&Encoding) -> &[u32]) -> EmbeddingResult<Array2<i64>> {
    let mut flat = Vec::with_capacity(encodings.len() * seq_len);
    for encoding in encodings {
        flat.extend(field(encoding).iter().map(|&v| v as i64));
    }
    Array2::from_shape_vec((encodings.len(), seq_len), flat)
        .map_err(|e| EmbeddingError::inference(format!("Ragged token batch: {}", e)))
}

fn tensor(array: &Array2<i64>) -> EmbeddingResult<Tensor<i64>> {
    let (rows, cols) = array.dim();
    Ok(Tensor::from_array(([rows, cols], array.iter().copied().collect::<Vec<i64>>()))?)
}

impl Encoder for OnnxEncoder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn device(&self) -> Device {
        self.device
    }

    #[instrument(skip_all, fields(texts = texts.len()))]
    fn infer(&self, texts: &[String]) -> EmbeddingResult<TokenStates> {
        let encodings = tokenize(&self.tokenizer, texts)?;
        let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());

        let input_ids = stack(&encodings, seq_len, Encoding::get_ids)?;
        let attention_mask = stack(&encodings, seq_len, Encoding::get_attention_mask)?;

        let mut inputs = vec![
            ("input_ids", tensor(&input_ids)?),
            ("attention_mask", tensor(&attention_mask)?),
        ];
        if self.uses_token_types {
            let token_type_ids = stack(&encodings, seq_len, Encoding::get_type_ids)?;
            inputs.push(("token_type_ids", tensor(&token_type_ids)?));
        }

        let hidden = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session
                .run(inputs)
                .map_err(|e| EmbeddingError::inference(format!("ONNX inference failed: {}", e)))?;

            let value = outputs.get(self.hidden_output.as_str()).ok_or_else(|| {
                EmbeddingError::inference(format!("Missing output {}", self.hidden_output))
            })?;
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| EmbeddingError::inference(format!("Failed to extract output tensor: {}", e)))?;
            hidden_states(shape, data)?
        };

        debug!("Forward pass produced hidden states {:?}", hidden.shape());
        Ok(TokenStates {
            hidden,
            attention_mask: attention_mask.mapv(|m| m as f32),
        })
    }
}
