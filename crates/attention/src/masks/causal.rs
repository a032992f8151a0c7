//! Causal (lower-triangular) attention masks.

use candle_core::{Device, Result, Tensor};

use super::MASK_FILL;

/// Builds a causal mask shaped `[batch, 1, q_len, k_len]`.
///
/// Query position `i` may attend to key positions `<= i`. When
/// `k_len > q_len`, queries are assumed to align with the most recent
/// `q_len` keys, so the extra prefix stays visible.
pub fn build_causal_mask(
    device: &Device,
    batch: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let mut data = vec![0f32; batch * q_len * k_len];
    let offset = k_len.saturating_sub(q_len);

    for b in 0..batch {
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            let max_k = q + offset;
            for k in (max_k + 1)..k_len {
                data[row_start + k] = MASK_FILL;
            }
        }
    }

    Tensor::from_vec(data, (batch, 1, q_len, k_len), device)
}
