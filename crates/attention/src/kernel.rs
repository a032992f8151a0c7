//! Scaled dot-product attention kernel.
//!
//! Operates on tensors laid out as `[batch, heads, seq_len, width]`. Scores
//! are accumulated in `f32` regardless of the input dtype and the output is
//! cast back to match the inputs. Batch and head axes are merged for the
//! matmuls so the whole batch runs through vectorized ops, never
//! per-sequence loops.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::errors::AttentionError;
use crate::masks::MASK_DTYPE;

/// Computes attention probabilities shaped `[batch, heads, q_len, k_len]`.
///
/// `q` and `k` follow the `[batch, heads, len, width]` layout and must agree
/// on batch, heads, and width; mismatches fail fast rather than broadcast.
/// The optional additive `mask` must be broadcastable onto the score tensor
/// (singleton head and query axes allowed, key axis exact). Scores are
/// scaled by `1 / sqrt(width)` before the softmax over the key axis.
pub fn attention_probs(
    q: &Tensor,
    k: &Tensor,
    mask: Option<&Tensor>,
) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, width) = validate_operand("q", q)?;
    let (kb, kh, k_len, kw) = validate_operand("k", k)?;

    if kb != batch || kh != heads || kw != width {
        return Err(AttentionError::shape(format!(
            "k shape mismatch: expected [{batch}, {heads}, ?, {width}], got [{kb}, {kh}, {k_len}, {kw}]"
        )));
    }
    if q.dtype() != k.dtype() {
        return Err(AttentionError::shape(format!(
            "q and k must share a dtype, got {:?} and {:?}",
            q.dtype(),
            k.dtype()
        )));
    }
    if !q.device().same_device(k.device()) {
        return Err(AttentionError::shape(
            "q and k must reside on the same device",
        ));
    }

    let merged = batch * heads;
    let q_work = q
        .to_dtype(DType::F32)?
        .reshape((merged, q_len, width))?;
    let k_work = k
        .to_dtype(DType::F32)?
        .reshape((merged, k_len, width))?;

    let scale = 1.0 / (width as f64).sqrt();
    let scores = q_work
        .matmul(&k_work.transpose(1, 2)?)?
        .affine(scale, 0.0)?;
    let mut scores = scores.reshape((batch, heads, q_len, k_len))?;

    if let Some(mask) = mask {
        let mask = validate_mask(mask, batch, heads, q_len, k_len, q)?;
        scores = scores.broadcast_add(&mask)?;
    }

    let probs = softmax_last_dim(&scores.reshape((merged, q_len, k_len))?)?;
    Ok(probs.reshape((batch, heads, q_len, k_len))?)
}

/// Computes full scaled dot-product attention.
///
/// `v` shares the layout of `k`; the output mirrors the shape and dtype of
/// `q`.
pub fn scaled_dot_product(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
) -> Result<Tensor, AttentionError> {
    let (batch, heads, q_len, width) = validate_operand("q", q)?;
    let (_, _, k_len, _) = validate_operand("k", k)?;
    let (vb, vh, vk, vw) = validate_operand("v", v)?;

    if vb != batch || vh != heads || vk != k_len || vw != width {
        return Err(AttentionError::shape(format!(
            "v shape mismatch: expected [{batch}, {heads}, {k_len}, {width}], got [{vb}, {vh}, {vk}, {vw}]"
        )));
    }
    if v.dtype() != q.dtype() {
        return Err(AttentionError::shape(format!(
            "q and v must share a dtype, got {:?} and {:?}",
            q.dtype(),
            v.dtype()
        )));
    }
    if !q.device().same_device(v.device()) {
        return Err(AttentionError::shape(
            "q and v must reside on the same device",
        ));
    }

    let probs = attention_probs(q, k, mask)?;

    let merged = batch * heads;
    let probs_2d = probs.reshape((merged, q_len, k_len))?;
    let v_work = v
        .to_dtype(DType::F32)?
        .reshape((merged, k_len, width))?;
    let output = probs_2d.matmul(&v_work)?;
    let output = output.reshape((batch, heads, q_len, width))?;

    Ok(output.to_dtype(q.dtype())?)
}

fn validate_operand(
    name: &str,
    tensor: &Tensor,
) -> Result<(usize, usize, usize, usize), AttentionError> {
    if !matches!(tensor.dtype(), DType::F32 | DType::F16 | DType::BF16) {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("{:?}", tensor.dtype()),
        });
    }
    if !tensor.is_contiguous() {
        return Err(AttentionError::shape(format!(
            "{name} must be contiguous in memory"
        )));
    }
    tensor.dims4().map_err(|_| {
        AttentionError::shape(format!(
            "{name} must have shape [batch, heads, seq_len, width], got {:?}",
            tensor.dims()
        ))
    })
}

fn validate_mask(
    mask: &Tensor,
    batch: usize,
    heads: usize,
    q_len: usize,
    k_len: usize,
    q: &Tensor,
) -> Result<Tensor, AttentionError> {
    if !q.device().same_device(mask.device()) {
        return Err(AttentionError::shape(
            "mask must reside on the same device as q",
        ));
    }
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::UnsupportedDType {
            requested: format!("mask expects dtype {MASK_DTYPE:?}, got {:?}", mask.dtype()),
        });
    }
    let (mb, mh, mq, mk) = mask.dims4().map_err(|_| {
        AttentionError::shape(format!(
            "mask must have shape [batch, heads|1, q_len|1, k_len], got {:?}",
            mask.dims()
        ))
    })?;
    if mb != batch || mk != k_len {
        return Err(AttentionError::shape(format!(
            "mask shape mismatch: expected [{batch}, 1|{heads}, 1|{q_len}, {k_len}], got [{mb}, {mh}, {mq}, {mk}]"
        )));
    }
    if mh != 1 && mh != heads {
        return Err(AttentionError::shape(format!(
            "mask head dimension must be 1 or {heads}, got {mh}"
        )));
    }
    if mq != 1 && mq != q_len {
        return Err(AttentionError::shape(format!(
            "mask query dimension must be 1 or {q_len}, got {mq}"
        )));
    }
    if mh == heads && mq == q_len {
        Ok(mask.clone())
    } else {
        Ok(mask.broadcast_as((batch, heads, q_len, k_len))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{build_causal_mask, MASK_FILL};
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    #[test]
    fn probabilities_sum_to_one_per_query_row() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 1, 4, 4)?;
        let probs = attention_probs(&q, &k, Some(&mask)).unwrap();

        let sums = probs.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-5, "row sum {sum}");
        }
        Ok(())
    }

    #[test]
    fn masked_positions_receive_no_weight() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 1, 4, 4)?;
        let probs = attention_probs(&q, &k, Some(&mask)).unwrap();

        let rows = probs
            .reshape((2, 4, 4))?
            .to_vec3::<f32>()?;
        for head in &rows {
            for (q_idx, row) in head.iter().enumerate() {
                for (k_idx, &weight) in row.iter().enumerate() {
                    if k_idx > q_idx {
                        assert!(weight < 1e-6, "future key {k_idx} visible to query {q_idx}");
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn fully_masked_row_degrades_to_uniform_not_nan() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let fill = Tensor::full(MASK_FILL, (1, 1, 4, 4), &device)?;
        let probs = attention_probs(&q, &k, Some(&fill)).unwrap();
        let values = probs.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|p| p.is_finite()));
        for p in values {
            assert!((p - 0.25).abs() < 1e-5);
        }

        let out = scaled_dot_product(&q, &k, &v, Some(&fill)).unwrap();
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn output_shape_tracks_query_length() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 3, 5, 8), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 3, 9, 8), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 3, 9, 8), &device)?;
        let out = scaled_dot_product(&q, &k, &v, None).unwrap();
        assert_eq!(out.dims(), &[2, 3, 5, 8]);
        Ok(())
    }

    #[test]
    fn mismatched_key_width_errors() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 4, 6), DType::F32, &device).unwrap();
        let err = attention_probs(&q, &k, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn mismatched_value_length_errors() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device).unwrap();
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let err = scaled_dot_product(&q, &k, &v, None).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn bad_mask_head_dim_errors() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let mask = Tensor::zeros((1, 3, 4, 4), DType::F32, &device).unwrap();
        let err = attention_probs(&q, &k, Some(&mask)).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn half_precision_matches_f32_within_tolerance() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 1, 4, 4)?;
        let reference = scaled_dot_product(&q, &k, &v, Some(&mask)).unwrap();

        for dtype in [DType::F16, DType::BF16] {
            let out = scaled_dot_product(
                &q.to_dtype(dtype)?,
                &k.to_dtype(dtype)?,
                &v.to_dtype(dtype)?,
                Some(&mask),
            )
            .unwrap();
            assert_eq!(out.dtype(), dtype);
            let diff = out
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            assert!(diff < 5e-2, "dtype {dtype:?} diverged by {diff}");
        }
        Ok(())
    }

    #[test]
    fn extreme_scores_stay_finite() {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device).unwrap();
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device).unwrap();
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device).unwrap();
        let out = scaled_dot_product(&q, &k, &v, None)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(out.iter().all(|value| value.is_finite()));
    }
}
