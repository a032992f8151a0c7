//! Token embedding table.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype for the parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Learnable token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
}

impl TokenEmbedding {
    /// Builds the table with parameters sampled from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let shape = (config.vocab_size, config.hidden_dim);
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
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.weight.clone())]
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Input must be shaped `(batch, seq)` with an integer dtype; ids must
    /// lie in `[0, vocab_size)`. Output follows `(batch, seq, hidden)` in the
    /// configured storage dtype.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let dims = token_ids.dims();

        let ids = token_ids.to_dtype(DType::I64)?;
        let flat = ids.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.as_tensor().index_select(&flat, 0)?;
        let mut output_dims = dims.to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] => {
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg(
                        "token_ids must have non-zero batch and seq dimensions".into(),
                    ));
                }
            }
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        }

        if !token_ids.dtype().is_int() {
            return Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )));
        }
        Ok(())
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id}"
            )));
        }

        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}
