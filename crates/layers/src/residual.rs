//! Residual addition followed by normalisation and dropout.
//!
//! Every sublayer in the model (self-attention, cross-attention,
//! feed-forward) is wrapped by this block: the sublayer output is added to
//! the sublayer input, the sum is layer-normalised, and dropout is applied to
//! the result while training. The two operands must agree exactly in shape
//! and dtype; that invariant is what makes the residual addition
//! well-defined, so a mismatch is a contract error rather than a broadcast.

use candle_core::{DType, Device, Result, Tensor, Var};

use crate::{
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    norm::{LayerNorm, NormConfig},
};

/// Post-norm residual wrapper: `dropout(layer_norm(branch + residual))`.
#[derive(Debug, Clone)]
pub struct ResidualNorm {
    norm: LayerNorm,
    dropout: Dropout,
}

impl ResidualNorm {
    /// Builds the wrapper for a given hidden size.
    ///
    /// `seed` keeps dropout masks deterministic per block; sibling blocks
    /// should pass distinct seeds.
    pub fn new(
        hidden_size: usize,
        dropout_p: Option<f32>,
        seed: u64,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        Ok(Self {
            norm: LayerNorm::new(NormConfig::new(hidden_size), device, dtype)?,
            dropout: Dropout::new(dropout_p, seed)?,
        })
    }

    /// Enables or disables dropout based on training mode.
    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.norm.named_parameters(&format!("{scope}.norm"))
    }

    /// Combines a sublayer output with its input.
    pub fn forward(
        &self,
        branch: &Tensor,
        residual: &Tensor,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        checks::expect_batch_seq_hidden(
            "residual.input",
            residual,
            self.norm.config().hidden_size,
        )?;
        checks::expect_shape("residual.branch", branch, residual.dims())?;
        checks::expect_same_dtype("residual.branch", branch, "residual.input", residual)?;

        let branch = policy.cast_for_matmul(branch)?;
        let residual = policy.cast_for_matmul(residual)?;
        let added = branch.add(&residual)?;
        let added = policy.cast_to_storage(&added)?;

        let normed = self.norm.forward(&added, policy)?;
        self.dropout.forward(&normed, policy)
    }
}
