//! Encoder layer and stack.

use attention::{MultiHeadAttention, MultiHeadAttentionConfig};
use candle_core::{Result, Tensor, Var};
use embedding::{
    PositionalEmbedding, PositionalEmbeddingConfig, TokenEmbedding, TokenEmbeddingConfig,
};
use layers::{
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    feed_forward::{FeedForward, FeedForwardConfig},
    residual::ResidualNorm,
};

use crate::config::TransformerConfig;

/// One encoder layer: self-attention and feed-forward, each wrapped in a
/// residual+norm block.
pub struct EncoderLayer {
    attention: MultiHeadAttention,
    feed_forward: FeedForward,
    residual_attn: ResidualNorm,
    residual_ff: ResidualNorm,
}

impl EncoderLayer {
    /// Builds the layer; `index` keeps dropout seeds distinct per layer.
    pub fn new(index: usize, config: &TransformerConfig) -> Result<Self> {
        let attention = MultiHeadAttention::new(&MultiHeadAttentionConfig {
            embed_dim: config.embed_dim,
            heads: config.n_heads,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let feed_forward = FeedForward::new(
            FeedForwardConfig::new(config.embed_dim),
            &config.device,
            config.dtype,
        )?;
        let base_seed = (index as u64).wrapping_mul(2);
        let residual_attn = ResidualNorm::new(
            config.embed_dim,
            config.dropout_p,
            base_seed,
            &config.device,
            config.dtype,
        )?;
        let residual_ff = ResidualNorm::new(
            config.embed_dim,
            config.dropout_p,
            base_seed + 1,
            &config.device,
            config.dtype,
        )?;
        Ok(Self {
            attention,
            feed_forward,
            residual_attn,
            residual_ff,
        })
    }

    /// Enables or disables dropout for the layer.
    pub fn set_training(&self, training: bool) {
        self.residual_attn.set_training(training);
        self.residual_ff.set_training(training);
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.attention.named_parameters(&format!("{scope}.attn"));
        params.extend(self.feed_forward.named_parameters(&format!("{scope}.ff")));
        params.extend(
            self.residual_attn
                .named_parameters(&format!("{scope}.residual_attn")),
        );
        params.extend(
            self.residual_ff
                .named_parameters(&format!("{scope}.residual_ff")),
        );
        params
    }

    /// Applies the layer to `hidden` with an optional source padding mask.
    pub fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let attended = self.attention.forward(hidden, hidden, mask)?;
        let after_attn = self.residual_attn.forward(&attended, hidden, policy)?;

        let transformed = self.feed_forward.forward(&after_attn, policy)?;
        self.residual_ff.forward(&transformed, &after_attn, policy)
    }
}

/// Encoder stack: embeddings plus `n_layers` identical layers.
pub struct Encoder {
    token_embedding: TokenEmbedding,
    positional_embedding: PositionalEmbedding,
    dropout: Dropout,
    layers: Vec<EncoderLayer>,
    policy: PrecisionPolicy,
}

impl Encoder {
    /// Builds the stack for the source side of the model.
    pub fn new(config: &TransformerConfig) -> Result<Self> {
        let token_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.source_vocab_size,
            hidden_dim: config.embed_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let positional_embedding = PositionalEmbedding::new(PositionalEmbeddingConfig {
            max_positions: config.max_positions,
            hidden_dim: config.embed_dim,
            dtype: config.dtype,
            device: config.device.clone(),
        })?;
        let dropout = Dropout::new(config.dropout_p, 0x5eed_e4c0)?;

        let mut layers = Vec::with_capacity(config.n_layers);
        for index in 0..config.n_layers {
            layers.push(EncoderLayer::new(index, config)?);
        }
        log::debug!(
            "encoder init layers={} embed_dim={} heads={}",
            config.n_layers,
            config.embed_dim,
            config.n_heads
        );

        Ok(Self {
            token_embedding,
            positional_embedding,
            dropout,
            layers,
            policy: PrecisionPolicy::from_parameter_dtype(config.dtype),
        })
    }

    /// Enables or disables dropout across the stack.
    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
        for layer in &self.layers {
            layer.set_training(training);
        }
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self
            .token_embedding
            .named_parameters(&format!("{scope}.token_embedding"));
        params.extend(
            self.positional_embedding
                .named_parameters(&format!("{scope}.positional_embedding")),
        );
        for (index, layer) in self.layers.iter().enumerate() {
            params.extend(layer.named_parameters(&format!("{scope}.layer{index}")));
        }
        params
    }

    /// Encodes `source_ids` into contextual representations.
    ///
    /// Layers run strictly in order; each consumes the previous layer's
    /// output. The optional `mask` keeps padded source positions out of
    /// self-attention.
    pub fn forward(&self, source_ids: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let token = self.token_embedding.forward(source_ids)?;
        let (_, seq_len, _) = token.dims3()?;
        let positional = self.positional_embedding.forward(seq_len)?;

        let embedded = token.broadcast_add(&positional)?;
        let mut hidden = self.dropout.forward(&embedded, &self.policy)?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden, mask, &self.policy)?;
        }
        Ok(hidden)
    }
}
