//! Embedding tables for the sequence-to-sequence transformer.
//!
//! [`token::TokenEmbedding`] maps vocabulary indices to feature vectors;
//! [`positional::PositionalEmbedding`] is a learned table over absolute
//! positions, added to the token embeddings before the first layer.

pub mod positional;
pub mod token;

pub use positional::{PositionalEmbedding, PositionalEmbeddingConfig};
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
