use candle_core::{DType, Device, Error, Result};

/// High-level configuration for assembling the sequence-to-sequence
/// transformer.
///
/// Every field is fixed for the lifetime of the model. Device and dtype are
/// explicit here rather than ambient state so two models can live on
/// different devices in one process.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Size of the source vocabulary.
    pub source_vocab_size: usize,
    /// Size of the target vocabulary.
    pub target_vocab_size: usize,
    /// Padding token id in the source vocabulary.
    pub source_pad_id: u32,
    /// Padding token id in the target vocabulary.
    pub target_pad_id: u32,
    /// Embedding width, shared by every layer.
    pub embed_dim: usize,
    /// Number of encoder layers and of decoder layers.
    pub n_layers: usize,
    /// Number of attention heads per attention module.
    pub n_heads: usize,
    /// Dropout probability; `None` disables dropout entirely.
    pub dropout_p: Option<f32>,
    /// Upper bound on input sequence length (positional table size).
    pub max_positions: usize,
    /// Storage dtype for all parameters.
    pub dtype: DType,
    /// Device hosting all parameters.
    pub device: Device,
}

impl TransformerConfig {
    /// Creates a configuration with the conventional architecture defaults:
    /// 512-wide embeddings, 6 layers, 8 heads, no dropout, 100 positions.
    pub fn new(
        source_vocab_size: usize,
        target_vocab_size: usize,
        source_pad_id: u32,
        target_pad_id: u32,
    ) -> Self {
        Self {
            source_vocab_size,
            target_vocab_size,
            source_pad_id,
            target_pad_id,
            embed_dim: 512,
            n_layers: 6,
            n_heads: 8,
            dropout_p: None,
            max_positions: 100,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    /// Validates the structural invariants fixed at construction.
    pub fn validate(&self) -> Result<()> {
        if self.source_vocab_size == 0 {
            return Err(Error::Msg("source_vocab_size must be greater than zero".into()));
        }
        if self.target_vocab_size == 0 {
            return Err(Error::Msg("target_vocab_size must be greater than zero".into()));
        }
        if self.source_pad_id as usize >= self.source_vocab_size {
            return Err(Error::Msg(format!(
                "source_pad_id {} lies outside the source vocabulary ({})",
                self.source_pad_id, self.source_vocab_size
            )));
        }
        if self.target_pad_id as usize >= self.target_vocab_size {
            return Err(Error::Msg(format!(
                "target_pad_id {} lies outside the target vocabulary ({})",
                self.target_pad_id, self.target_vocab_size
            )));
        }
        if self.embed_dim == 0 {
            return Err(Error::Msg("embed_dim must be greater than zero".into()));
        }
        if self.n_layers == 0 {
            return Err(Error::Msg("n_layers must be greater than zero".into()));
        }
        if self.n_heads == 0 {
            return Err(Error::Msg("n_heads must be greater than zero".into()));
        }
        if self.max_positions == 0 {
            return Err(Error::Msg("max_positions must be greater than zero".into()));
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::Msg("dropout_p must be in [0, 1)".into()));
            }
        }
        Ok(())
    }
}
