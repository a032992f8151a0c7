//! Sequence-to-sequence transformer assembled from the shared crates.
//!
//! [`Transformer`] wires an encoder stack and a decoder stack together:
//! source token ids flow through the encoder into contextual
//! representations, and the decoder attends over them (cross-attention)
//! while causally self-attending over the target prefix, producing
//! per-position logits over the target vocabulary.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod model;

pub use config::TransformerConfig;
pub use decoder::{Decoder, DecoderLayer};
pub use encoder::{Encoder, EncoderLayer};
pub use model::Transformer;
