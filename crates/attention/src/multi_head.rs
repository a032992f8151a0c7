//! Multi-head attention module with owned projections.
//!
//! Each module owns query, key, and value projections mapping
//! `embed_dim -> heads * embed_dim` plus an output projection back to
//! `embed_dim`. The per-head width deliberately equals the full embedding
//! width (heads do not partition `embed_dim`); this mirrors the reference
//! model and is a hyperparameter relationship, not an error.
//!
//! The same module serves self-attention (pass one tensor as both sources)
//! and cross-attention (decoder hidden state as the query source, encoder
//! output as the key/value source).

use std::sync::OnceLock;

use candle_core::{DType, Device, Error, Result, Tensor, Var};
use layers::{
    checks,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

use crate::kernel;

/// Configuration for a multi-head attention module.
#[derive(Debug, Clone)]
pub struct MultiHeadAttentionConfig {
    /// Model embedding width; also the width of every head.
    pub embed_dim: usize,
    /// Number of parallel attention heads.
    pub heads: usize,
    /// Storage dtype for the projection parameters.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Scaled dot-product attention across multiple parallel heads.
#[derive(Debug)]
pub struct MultiHeadAttention {
    embed_dim: usize,
    heads: usize,
    query_proj: Linear,
    key_proj: Linear,
    value_proj: Linear,
    out_proj: Linear,
    policy: PrecisionPolicy,
    first_call: OnceLock<()>,
}

impl MultiHeadAttention {
    /// Builds the module with Xavier-initialised projections.
    pub fn new(config: &MultiHeadAttentionConfig) -> Result<Self> {
        if config.embed_dim == 0 {
            return Err(Error::Msg("attention requires embed_dim > 0".into()));
        }
        if config.heads == 0 {
            return Err(Error::Msg("attention requires at least one head".into()));
        }

        let projected = config.heads * config.embed_dim;
        let make_input_proj = || {
            Linear::with_init(
                LinearConfig::without_bias(config.embed_dim, projected),
                LinearInit::XavierUniform,
                &config.device,
                config.dtype,
            )
        };

        Ok(Self {
            embed_dim: config.embed_dim,
            heads: config.heads,
            query_proj: make_input_proj()?,
            key_proj: make_input_proj()?,
            value_proj: make_input_proj()?,
            out_proj: Linear::with_init(
                LinearConfig::new(projected, config.embed_dim),
                LinearInit::XavierUniform,
                &config.device,
                config.dtype,
            )?,
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
            first_call: OnceLock::new(),
        })
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.query_proj.named_parameters(&format!("{scope}.query"));
        params.extend(self.key_proj.named_parameters(&format!("{scope}.key")));
        params.extend(self.value_proj.named_parameters(&format!("{scope}.value")));
        params.extend(self.out_proj.named_parameters(&format!("{scope}.out")));
        params
    }

    /// Runs attention with queries from `query_src` and keys/values from
    /// `kv_src`.
    ///
    /// Both sources are `(batch, len, embed_dim)` and must agree on batch and
    /// feature dimensions; sequence lengths may differ (cross-attention).
    /// The optional `mask` must be additive and broadcastable onto
    /// `(batch, heads, q_len, kv_len)`. Output is `(batch, q_len, embed_dim)`.
    pub fn forward(
        &self,
        query_src: &Tensor,
        kv_src: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("attention.query_src", query_src, self.embed_dim)?;
        checks::expect_batch_seq_hidden("attention.kv_src", kv_src, self.embed_dim)?;
        checks::expect_same_dtype("attention.query_src", query_src, "attention.kv_src", kv_src)?;
        if query_src.dims()[0] != kv_src.dims()[0] {
            return Err(Error::Msg(format!(
                "attention sources must share a batch dimension, got {} and {}",
                query_src.dims()[0],
                kv_src.dims()[0]
            )));
        }

        if self.first_call.set(()).is_ok() {
            log::debug!(
                "attention init heads={} embed_dim={} per_head_width={}",
                self.heads,
                self.embed_dim,
                self.embed_dim
            );
        }

        let q = self.query_proj.forward(query_src, &self.policy)?;
        let k = self.key_proj.forward(kv_src, &self.policy)?;
        let v = self.value_proj.forward(kv_src, &self.policy)?;

        let q_heads = self.split_heads(&q)?;
        let k_heads = self.split_heads(&k)?;
        let v_heads = self.split_heads(&v)?;

        let attended = kernel::scaled_dot_product(&q_heads, &k_heads, &v_heads, mask)
            .map_err(|e| Error::Msg(e.to_string()))?;
        let merged = self.merge_heads(&attended)?;
        self.out_proj.forward(&merged, &self.policy)
    }

    /// `(batch, len, heads * embed) -> [batch, heads, len, embed]`.
    fn split_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, len, _) = tensor.dims3()?;
        let reshaped = tensor.reshape((batch, len, self.heads, self.embed_dim))?;
        reshaped.permute((0, 2, 1, 3))?.contiguous()
    }

    /// `[batch, heads, len, embed] -> (batch, len, heads * embed)`.
    fn merge_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, _, len, _) = tensor.dims4()?;
        let permuted = tensor.permute((0, 2, 1, 3))?.contiguous()?;
        permuted.reshape((batch, len, self.heads * self.embed_dim))
    }
}
