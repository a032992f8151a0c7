//! Multi-head attention for the sequence-to-sequence transformer.
//!
//! The kernel computes scaled dot-product attention over tensors laid out as
//! `[batch, heads, seq_len, width]` (`f32`, `f16`, or `bf16`; reductions run
//! in `f32`). [`MultiHeadAttention`] wraps the kernel with the query, key,
//! value, and output projections, serving both self-attention (query and
//! key/value sources coincide) and cross-attention (decoder queries over
//! encoder output).
//!
//! Masks are additive `f32` tensors broadcastable onto
//! `[batch, heads, q_len, k_len]`: `0.0` admits a key, [`masks::MASK_FILL`]
//! excludes it. The fill value is finite so a fully-masked query row softens
//! to a uniform distribution instead of producing NaN.

pub mod errors;
pub mod kernel;
pub mod masks;
pub mod multi_head;

pub use errors::AttentionError;
pub use multi_head::{MultiHeadAttention, MultiHeadAttentionConfig};
