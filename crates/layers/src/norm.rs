//! Layer normalisation over the hidden axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention and normalisation runs
//! along the last axis. Mean and variance are computed in
//! [`PrecisionPolicy::reduction`] before the affine parameters are applied
//! and the result is cast back to the storage dtype.

use candle_core::{DType, Device, Result, Tensor, Var, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for a layer normalisation module.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration with the conventional epsilon.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }
}

/// LayerNorm with learnable scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Var,
    bias: Var,
}

impl LayerNorm {
    /// Builds a LayerNorm with scale one and bias zero.
    pub fn new(config: NormConfig, device: &Device, dtype: DType) -> Result<Self> {
        let weight = Var::from_tensor(&Tensor::ones(config.hidden_size, dtype, device)?)?;
        let bias = Var::from_tensor(&Tensor::zeros(config.hidden_size, dtype, device)?)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a LayerNorm from existing affine parameters.
    pub fn from_parts(config: NormConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        checks::expect_same_dtype("norm.weight", &weight, "norm.bias", &bias)?;
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
            bias: Var::from_tensor(&bias)?,
        })
    }

    /// Returns the configuration so callers can check compatibility.
    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{scope}.weight"), self.weight.clone()),
            (format!("{scope}.bias"), self.bias.clone()),
        ]
    }

    /// Normalises `hidden` along its last axis.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;

        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let mut normalized = centered.broadcast_div(&denom)?;

        let weight = self.weight.as_tensor().to_dtype(normalized.dtype())?;
        let bias = self.bias.as_tensor().to_dtype(normalized.dtype())?;
        normalized = normalized.broadcast_mul(&weight)?;
        normalized = normalized.broadcast_add(&bias)?;

        policy.cast_to_storage(&normalized)
    }
}
