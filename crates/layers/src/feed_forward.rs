//! Position-wise feed-forward block.
//!
//! Two affine projections with a ReLU between them: the first expands the
//! hidden dimension to `intermediate_size`, the second contracts back. Pure
//! function of its input; the only state is the projection weights.

use candle_core::{DType, Device, Result, Tensor, Var};

use crate::{
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearInit},
};

/// Configuration for the feed-forward block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the expanded activation space.
    pub intermediate_size: usize,
}

impl FeedForwardConfig {
    /// Creates the conventional 4x expansion configuration.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size: hidden_size * 4,
        }
    }
}

/// Two-projection MLP with ReLU activation.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    expand: Linear,
    contract: Linear,
}

impl FeedForward {
    /// Builds the block with Xavier-initialised projections.
    pub fn new(config: FeedForwardConfig, device: &Device, dtype: DType) -> Result<Self> {
        let expand = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        let contract = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        Ok(Self {
            config,
            expand,
            contract,
        })
    }

    /// Configuration metadata used during block assembly.
    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.expand.named_parameters(&format!("{scope}.expand"));
        params.extend(self.contract.named_parameters(&format!("{scope}.contract")));
        params
    }

    /// Applies expand -> ReLU -> contract.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let expanded = self.expand.forward(hidden, policy)?;
        let activated = policy.cast_for_matmul(&expanded)?.relu()?;
        self.contract
            .forward(&policy.cast_to_storage(&activated)?, policy)
    }
}
