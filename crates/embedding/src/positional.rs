//! Learned absolute positional embedding table.
//!
//! One row per position in `[0, max_positions)`. The lookup is injective:
//! distinct positions always map to distinct table rows, so no two positions
//! can alias. Sequence length is bounded by the table size; longer inputs
//! fail at lookup.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};

/// Configuration for a positional embedding table.
#[derive(Debug, Clone)]
pub struct PositionalEmbeddingConfig {
    /// Number of positions the table covers.
    pub max_positions: usize,
    /// Dimensionality of each position vector.
    pub hidden_dim: usize,
    /// Storage dtype for the parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Learnable per-position embedding table.
#[derive(Debug, Clone)]
pub struct PositionalEmbedding {
    config: PositionalEmbeddingConfig,
    weight: Var,
}

impl PositionalEmbedding {
    /// Builds the table with parameters sampled from `N(0, 1)`.
    pub fn new(config: PositionalEmbeddingConfig) -> Result<Self> {
        if config.max_positions == 0 {
            bail!("positional embedding requires max_positions > 0");
        }
        if config.hidden_dim == 0 {
            bail!("positional embedding requires hidden_dim > 0");
        }

        let shape = (config.max_positions, config.hidden_dim);
        let initial = Var::randn(0f32, 1f32, shape, &config.device)?;
        let weight = if initial.dtype() == config.dtype {
            initial
        } else {
            let cast = initial.to_dtype(config.dtype)?;
            Var::from_tensor(&cast)?
        };

        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &PositionalEmbeddingConfig {
        &self.config
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.weight.clone())]
    }

    /// Looks up the vectors for positions `0..seq_len`.
    ///
    /// Returns `(1, seq_len, hidden)` for broadcast addition onto a batch of
    /// token embeddings. `seq_len` beyond the table size is a contract error.
    pub fn forward(&self, seq_len: usize) -> Result<Tensor> {
        if seq_len == 0 {
            return Err(Error::Msg(
                "positional lookup requires a non-zero sequence length".into(),
            ));
        }
        if seq_len > self.config.max_positions {
            return Err(Error::Msg(format!(
                "sequence length {seq_len} exceeds maximum position {}",
                self.config.max_positions
            )));
        }

        let positions = Tensor::arange(0i64, seq_len as i64, &self.config.device)?;
        let rows = self.weight.as_tensor().index_select(&positions, 0)?;
        rows.reshape((1, seq_len, self.config.hidden_dim))
    }
}
