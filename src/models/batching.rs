//! Batch scheduling
//!
//! Splits a request into contiguous chunks of at most `batch_size` texts and
//! reassembles per-chunk results in the original order.

use serde::{Deserialize, Serialize};

use crate::models::model::Encoder;
use crate::models::pooling::pool_and_normalize;
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};

/// One text or an ordered list of texts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

impl From<&str> for EmbedInput {
    fn from(text: &str) -> Self {
        EmbedInput::Single(text.to_string())
    }
}

impl From<String> for EmbedInput {
    fn from(text: String) -> Self {
        EmbedInput::Single(text)
    }
}

impl From<Vec<String>> for EmbedInput {
    fn from(texts: Vec<String>) -> Self {
        EmbedInput::Batch(texts)
    }
}

impl From<Vec<&str>> for EmbedInput {
    fn from(texts: Vec<&str>) -> Self {
        EmbedInput::Batch(texts.into_iter().map(str::to_string).collect())
    }
}

/// Result shaped like the input: one vector for a single text, an ordered
/// list otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedOutput {
    Single(Embedding),
    Batch(Vec<Embedding>),
}

impl EmbedOutput {
    /// Number of vectors
    pub fn count(&self) -> usize {
        match self {
            EmbedOutput::Single(_) => 1,
            EmbedOutput::Batch(vectors) => vectors.len(),
        }
    }

    /// Length of the vectors, `None` for an empty batch
    pub fn dimension(&self) -> Option<usize> {
        match self {
            EmbedOutput::Single(vector) => Some(vector.len()),
            EmbedOutput::Batch(vectors) => vectors.first().map(Vec::len),
        }
    }

    pub fn into_vectors(self) -> Vec<Embedding> {
        match self {
            EmbedOutput::Single(vector) => vec![vector],
            EmbedOutput::Batch(vectors) => vectors,
        }
    }
}

/// Normalized request: the texts plus whether the caller sent a single string
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    texts: Vec<String>,
    single: bool,
}

impl EmbedRequest {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Split into contiguous chunks of at most `batch_size` texts.
    pub fn into_chunks(self, batch_size: usize) -> (Vec<Vec<String>>, bool) {
        let batch_size = batch_size.max(1);
        let mut chunks = Vec::with_capacity(self.texts.len().div_ceil(batch_size));
        let mut texts = self.texts.into_iter().peekable();
        while texts.peek().is_some() {
            chunks.push(texts.by_ref().take(batch_size).collect());
        }
        (chunks, self.single)
    }
}

impl From<EmbedInput> for EmbedRequest {
    fn from(input: EmbedInput) -> Self {
        match input {
            EmbedInput::Single(text) => Self { texts: vec![text], single: true },
            EmbedInput::Batch(texts) => Self { texts, single: false },
        }
    }
}

/// Concatenate per-chunk results, given in chunk order, and unwrap single
/// requests.
pub fn assemble(single: bool, chunk_results: Vec<Vec<Embedding>>) -> EmbeddingResult<EmbedOutput> {
    let mut vectors: Vec<Embedding> = chunk_results.into_iter().flatten().collect();
    if !single {
        return Ok(EmbedOutput::Batch(vectors));
    }
    match (vectors.pop(), vectors.is_empty()) {
        (Some(vector), true) => Ok(EmbedOutput::Single(vector)),
        _ => Err(EmbeddingError::inference(
            "expected exactly one embedding for a single-text request",
        )),
    }
}

/// Forward pass plus pooling for one chunk.
pub fn embed_chunk(encoder: &dyn Encoder, texts: &[String]) -> EmbeddingResult<Vec<Embedding>> {
    let states = encoder.infer(texts)?;
    if states.batch_len() != texts.len() {
        return Err(EmbeddingError::inference(format!(
            "encoder returned {} rows for {} texts",
            states.batch_len(),
            texts.len()
        )));
    }
    pool_and_normalize(&states)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[test]
    fn test_chunk_sizes() {
        let (chunks, single) = EmbedRequest::from(EmbedInput::Batch(texts(70))).into_chunks(32);
        assert!(!single);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![32, 32, 6]);
        assert_eq!(chunks[1][0], "text 32");
        assert_eq!(chunks[2][5], "text 69");

        let (chunks, _) = EmbedRequest::from(EmbedInput::Batch(texts(64))).into_chunks(32);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_empty_and_single() {
        let request = EmbedRequest::from(EmbedInput::Batch(Vec::new()));
        assert!(request.is_empty());
        let (chunks, _) = request.into_chunks(32);
        assert!(chunks.is_empty());
        assert_eq!(assemble(false, Vec::new()).unwrap(), EmbedOutput::Batch(Vec::new()));

        let request = EmbedRequest::from(EmbedInput::from(""));
        assert!(request.is_single());
        let (chunks, single) = request.into_chunks(32);
        assert_eq!(chunks, vec![vec![String::new()]]);
        assert!(single);
    }

    #[test]
    fn test_assemble_preserves_chunk_order() {
        let output = assemble(false, vec![vec![vec![1.0], vec![2.0]], vec![vec![3.0]]]).unwrap();
        assert_eq!(output, EmbedOutput::Batch(vec![vec![1.0], vec![2.0], vec![3.0]]));
        assert_eq!(output.count(), 3);
        assert_eq!(output.dimension(), Some(1));

        let single = assemble(true, vec![vec![vec![0.6, 0.8]]]).unwrap();
        assert_eq!(single, EmbedOutput::Single(vec![0.6, 0.8]));
        assert_eq!(single.count(), 1);

        assert!(assemble(true, vec![vec![vec![1.0], vec![2.0]]]).is_err());
    }

    #[test]
    fn test_input_shapes_from_json() {
        let single: EmbedInput = serde_json::from_str(r#""hello world""#).unwrap();
        assert_eq!(single, EmbedInput::from("hello world"));

        let batch: EmbedInput = serde_json::from_str(r#"["hello", "world"]"#).unwrap();
        assert_eq!(batch, EmbedInput::from(vec!["hello", "world"]));

        let json = serde_json::to_string(&EmbedOutput::Single(vec![1.0, 0.0])).unwrap();
        assert_eq!(json, "[1.0,0.0]");
    }
}
