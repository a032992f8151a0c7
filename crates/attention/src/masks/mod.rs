//! Mask builders shared by the attention kernel.
//!
//! All masks are additive `f32` tensors: `0.0` keeps a key position,
//! [`MASK_FILL`] discards it. Shapes use broadcast-friendly singleton axes
//! (`[batch, 1, q_len, k_len]` for causal masks,
//! `[batch, 1, 1, k_len]` for padding masks); the kernel expands them onto
//! the full `[batch, heads, q_len, k_len]` score tensor.

pub mod causal;
pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Additive fill for excluded positions.
///
/// Large enough that the post-softmax weight is effectively zero, but finite
/// so a row whose keys are all excluded still softmaxes to a well-defined
/// (uniform) distribution rather than NaN.
pub const MASK_FILL: f32 = -1e20;

pub use causal::build_causal_mask;
pub use padding::padding_mask_from_token_ids;
