//! Padding masks derived from token id tensors.

use candle_core::{DType, Result, Tensor};

use super::MASK_FILL;

/// Builds a padding mask shaped `[batch, 1, 1, seq_len]` from token ids.
///
/// Positions whose token equals `pad_id` are excluded from attention for
/// every query; all other positions stay visible. The singleton query axis
/// broadcasts over any `q_len`.
pub fn padding_mask_from_token_ids(token_ids: &Tensor, pad_id: u32) -> Result<Tensor> {
    let (batch, seq_len) = token_ids.dims2()?;
    let ids = token_ids.to_dtype(DType::I64)?.to_vec2::<i64>()?;

    let mut data = vec![0f32; batch * seq_len];
    for (b, row) in ids.iter().enumerate() {
        for (s, &id) in row.iter().enumerate() {
            if id == i64::from(pad_id) {
                data[b * seq_len + s] = MASK_FILL;
            }
        }
    }

    Tensor::from_vec(data, (batch, 1, 1, seq_len), token_ids.device())
}
