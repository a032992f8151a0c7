//! Top-level sequence-to-sequence transformer.

use attention::masks::{build_causal_mask, padding_mask_from_token_ids};
use candle_core::{Result, Tensor, Var};

use crate::{config::TransformerConfig, decoder::Decoder, encoder::Encoder};

/// Encoder-decoder transformer producing target-vocabulary logits.
pub struct Transformer {
    config: TransformerConfig,
    encoder: Encoder,
    decoder: Decoder,
}

impl Transformer {
    /// Builds the full model from a validated configuration.
    pub fn new(config: TransformerConfig) -> Result<Self> {
        config.validate()?;
        let encoder = Encoder::new(&config)?;
        let decoder = Decoder::new(&config)?;
        log::info!(
            "transformer init embed_dim={} layers={} heads={} source_vocab={} target_vocab={}",
            config.embed_dim,
            config.n_layers,
            config.n_heads,
            config.source_vocab_size,
            config.target_vocab_size
        );
        Ok(Self {
            config,
            encoder,
            decoder,
        })
    }

    /// Configuration the model was built with.
    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Enables or disables dropout across both stacks.
    pub fn set_training(&self, training: bool) {
        self.encoder.set_training(training);
        self.decoder.set_training(training);
    }

    /// Every trainable parameter, named by its position in the model.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.encoder.named_parameters("encoder");
        params.extend(self.decoder.named_parameters("decoder"));
        params
    }

    /// Additive padding mask for the source sequence, shaped
    /// `(batch, 1, 1, source_len)`.
    ///
    /// Positions holding the configured source pad id receive the mask fill
    /// value; all others receive zero. Applied both to encoder
    /// self-attention and to decoder cross-attention.
    pub fn source_mask(&self, source_ids: &Tensor) -> Result<Tensor> {
        padding_mask_from_token_ids(source_ids, self.config.source_pad_id)
    }

    /// Additive causal mask for the target sequence, shaped
    /// `(batch, 1, target_len, target_len)`.
    ///
    /// Position `i` may attend to positions `0..=i` only. Target padding is
    /// deliberately not masked here; padded target positions are expected to
    /// be excluded downstream by the loss.
    pub fn target_mask(&self, target_ids: &Tensor) -> Result<Tensor> {
        let (batch, target_len) = target_ids.dims2()?;
        build_causal_mask(&self.config.device, batch, target_len, target_len)
    }

    /// Runs the full model: encodes `source_ids`, decodes `target_ids`
    /// against the encoder output, and returns logits of shape
    /// `(batch, target_len, target_vocab_size)`.
    pub fn forward(&self, source_ids: &Tensor, target_ids: &Tensor) -> Result<Tensor> {
        let source_mask = self.source_mask(source_ids)?;
        let target_mask = self.target_mask(target_ids)?;

        let encoded = self.encoder.forward(source_ids, Some(&source_mask))?;
        self.decoder
            .forward(target_ids, &encoded, Some(&source_mask), Some(&target_mask))
    }
}
