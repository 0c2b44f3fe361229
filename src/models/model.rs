//! Model definitions and traits
//!
//! [`Encoder`] is the synchronous forward-pass seam the scheduler drives on
//! worker threads. [`EmbeddingModel`] is the asynchronous surface a host
//! (the HTTP server) talks to.

use async_trait::async_trait;
use ndarray::{Array2, Array3};

use crate::models::batching::{EmbedInput, EmbedOutput};
use crate::models::device::Device;
use crate::models::EmbeddingResult;

/// Last-layer hidden states for one batch, with the mask separating real
/// tokens (1.0) from padding (0.0).
#[derive(Debug, Clone)]
pub struct TokenStates {
    /// `[batch, seq_len, hidden]`
    pub hidden: Array3<f32>,
    /// `[batch, seq_len]`
    pub attention_mask: Array2<f32>,
}

impl TokenStates {
    pub fn batch_len(&self) -> usize {
        self.hidden.shape()[0]
    }
}

/// Tokenizer plus encoder bound to a device.
///
/// `infer` is blocking and compute-bound. Implementations are shared by all
/// worker threads and must not mutate observable state.
pub trait Encoder: Send + Sync {
    /// Model identifier
    fn name(&self) -> &str;

    /// Device the encoder runs on
    fn device(&self) -> Device;

    /// Tokenize `texts` together (padded to the longest, truncated to the
    /// maximum length) and run the forward pass.
    fn infer(&self, texts: &[String]) -> EmbeddingResult<TokenStates>;
}

/// Embedding surface exposed to hosts
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier
    fn model_name(&self) -> &str;

    /// Device in use, once initialized
    fn device(&self) -> Option<Device>;

    /// Check if the model is ready for inference
    fn is_ready(&self) -> bool;

    /// Output vector length
    fn embedding_dimension(&self) -> EmbeddingResult<usize>;

    /// Embed one text or an ordered list of texts
    async fn embed(&self, input: EmbedInput) -> EmbeddingResult<EmbedOutput>;
}
