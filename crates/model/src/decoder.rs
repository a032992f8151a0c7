//! Decoder layer and stack.

use attention::{MultiHeadAttention, MultiHeadAttentionConfig};
use candle_core::{Result, Tensor, Var};
use embedding::{
    PositionalEmbedding, PositionalEmbeddingConfig, TokenEmbedding, TokenEmbeddingConfig,
};
use layers::{
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    feed_forward::{FeedForward, FeedForwardConfig},
    linear::{Linear, LinearConfig, LinearInit},
    residual::ResidualNorm,
};

use crate::config::TransformerConfig;

/// One decoder layer: causal self-attention, cross-attention over the
/// encoder output, and feed-forward, each wrapped in a residual+norm block.
pub struct DecoderLayer {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    feed_forward: FeedForward,
    residual_self: ResidualNorm,
    residual_cross: ResidualNorm,
    residual_ff: ResidualNorm,
}

impl DecoderLayer {
    /// Builds the layer; `index` keeps dropout seeds distinct per layer.
    pub fn new(index: usize, config: &TransformerConfig) -> Result<Self> {
        let attention_config = MultiHeadAttentionConfig {
            embed_dim: config.embed_dim,
            heads: config.n_heads,
            dtype: config.dtype,
            device: config.device.clone(),
        };
        let self_attention = MultiHeadAttention::new(&attention_config)?;
        let cross_attention = MultiHeadAttention::new(&attention_config)?;
        let feed_forward = FeedForward::new(
            FeedForwardConfig::new(config.embed_dim),
            &config.device,
            config.dtype,
        )?;
        // Offset past the encoder's seed range so the two stacks never share
        // dropout masks.
        let base_seed = 0x0dec_0000 + (index as u64).wrapping_mul(3);
        let residual_self = ResidualNorm::new(
            config.embed_dim,
            config.dropout_p,
            base_seed,
            &config.device,
            config.dtype,
        )?;
        let residual_cross = ResidualNorm::new(
            config.embed_dim,
            config.dropout_p,
            base_seed + 1,
            &config.device,
            config.dtype,
        )?;
        let residual_ff = ResidualNorm::new(
            config.embed_dim,
            config.dropout_p,
            base_seed + 2,
            &config.device,
            config.dtype,
        )?;
        Ok(Self {
            self_attention,
            cross_attention,
            feed_forward,
            residual_self,
            residual_cross,
            residual_ff,
        })
    }

    /// Enables or disables dropout for the layer.
    pub fn set_training(&self, training: bool) {
        self.residual_self.set_training(training);
        self.residual_cross.set_training(training);
        self.residual_ff.set_training(training);
    }

    /// Trainable parameters with a dotted scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self
            .self_attention
            .named_parameters(&format!("{scope}.self_attn"));
        params.extend(
            self.cross_attention
                .named_parameters(&format!("{scope}.cross_attn")),
        );
        params.extend(self.feed_forward.named_parameters(&format!("{scope}.ff")));
        params.extend(
            self.residual_self
                .named_parameters(&format!("{scope}.residual_self")),
        );
        params.extend(
            self.residual_cross
                .named_parameters(&format!("{scope}.residual_cross")),
        );
        params.extend(
            self.residual_ff
                .named_parameters(&format!("{scope}.residual_ff")),
        );
        params
    }

    /// Applies the layer to the target hidden state.
    ///
    /// `target_mask` (causal) gates self-attention; `source_mask` (padding)
    /// gates cross-attention over `encoder_output`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        encoder_output: &Tensor,
        source_mask: Option<&Tensor>,
        target_mask: Option<&Tensor>,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        let self_attended = self.self_attention.forward(hidden, hidden, target_mask)?;
        let after_self = self.residual_self.forward(&self_attended, hidden, policy)?;

        let cross_attended =
            self.cross_attention
                .forward(&after_self, encoder_output, source_mask)?;
        let after_cross = self
            .residual_cross
            .forward(&cross_attended, &after_self, policy)?;

        let transformed = self.feed_forward.forward(&after_cross, policy)?;
        self.residual_ff.forward(&transformed, &after_cross, policy)
    }
}

/// Decoder stack: embeddings, `n_layers` identical layers, and the output
/// projection into target-vocabulary logits.
pub struct Decoder {
    token_embedding: TokenEmbedding,
    positional_embedding: PositionalEmbedding,
    dropout: Dropout,
    layers: Vec<DecoderLayer>,
    output_proj: Linear,
    policy: PrecisionPolicy,
}

impl Decoder {
    /// Builds the stack for the target side of the model.
    pub fn new(config: &TransformerConfig) -> Result<Self> {
        let token_embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.target_vocab_size,
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
        let dropout = Dropout::new(config.dropout_p, 0x5eed_dec0)?;

        let mut layers = Vec::with_capacity(config.n_layers);
        for index in 0..config.n_layers {
            layers.push(DecoderLayer::new(index, config)?);
        }
        let output_proj = Linear::with_init(
            LinearConfig::new(config.embed_dim, config.target_vocab_size),
            LinearInit::XavierUniform,
            &config.device,
            config.dtype,
        )?;
        log::debug!(
            "decoder init layers={} embed_dim={} heads={} target_vocab={}",
            config.n_layers,
            config.embed_dim,
            config.n_heads,
            config.target_vocab_size
        );

        Ok(Self {
            token_embedding,
            positional_embedding,
            dropout,
            layers,
            output_proj,
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
        params.extend(
            self.output_proj
                .named_parameters(&format!("{scope}.output_proj")),
        );
        params
    }

    /// Decodes `target_ids` against `encoder_output`, producing raw logits
    /// of shape `(batch, target_len, target_vocab_size)`.
    ///
    /// No softmax is applied; callers feed the logits straight into a loss
    /// or a sampling step.
    pub fn forward(
        &self,
        target_ids: &Tensor,
        encoder_output: &Tensor,
        source_mask: Option<&Tensor>,
        target_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let token = self.token_embedding.forward(target_ids)?;
        let (_, seq_len, _) = token.dims3()?;
        let positional = self.positional_embedding.forward(seq_len)?;

        let embedded = token.broadcast_add(&positional)?;
        let mut hidden = self.dropout.forward(&embedded, &self.policy)?;

        for layer in &self.layers {
            hidden = layer.forward(
                &hidden,
                encoder_output,
                source_mask,
                target_mask,
                &self.policy,
            )?;
        }
        self.output_proj.forward(&hidden, &self.policy)
    }
}
