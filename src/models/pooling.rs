//! Mean pooling and L2 normalization

use ndarray::{s, Array2, ArrayView2, ArrayView3};

use crate::models::model::TokenStates;
use crate::models::{Embedding, EmbeddingError, EmbeddingResult};

/// Floor for the real-token count of a row
pub const MASK_EPSILON: f32 = 1e-9;

/// Floor for the vector norm during normalization
pub const NORM_EPSILON: f32 = 1e-12;

/// Collapse per-token vectors into one unit-length vector per text.
pub fn pool_and_normalize(states: &TokenStates) -> EmbeddingResult<Vec<Embedding>> {
    let pooled = mean_pooling(states.hidden.view(), states.attention_mask.view())?;
    Ok(normalize_rows(pooled.view()))
}

/// Average each row's token vectors over the positions the mask marks real.
///
/// Mask values weight their token, so fractional masks behave like the
/// tensor formulation `sum(h * m) / max(sum(m), eps)`.
pub fn mean_pooling(hidden: ArrayView3<f32>, mask: ArrayView2<f32>) -> EmbeddingResult<Array2<f32>> {
    let (batch, seq_len, hidden_size) = hidden.dim();
    if mask.dim() != (batch, seq_len) {
        return Err(EmbeddingError::inference(format!(
            "Attention mask shape {:?} doesn't match hidden states {:?}",
            mask.shape(),
            hidden.shape()
        )));
    }

    let mut pooled = Array2::<f32>::zeros((batch, hidden_size));
    for (row_idx, mut row) in pooled.outer_iter_mut().enumerate() {
        let mut weight = 0.0f32;
        for token_idx in 0..seq_len {
            let m = mask[[row_idx, token_idx]];
            if m == 0.0 {
                continue;
            }
            row.scaled_add(m, &hidden.slice(s![row_idx, token_idx, ..]));
            weight += m;
        }
        row /= weight.max(MASK_EPSILON);
    }

    Ok(pooled)
}

/// Scale every row to unit L2 norm.
pub fn normalize_rows(pooled: ArrayView2<f32>) -> Vec<Embedding> {
    pooled
        .outer_iter()
        .map(|row| {
            let norm = row.dot(&row).sqrt().max(NORM_EPSILON);
            row.iter().map(|v| v / norm).collect()
        })
        .collect()
}
