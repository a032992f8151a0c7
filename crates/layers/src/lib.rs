//! Shared neural-network plumbing for the sequence-to-sequence transformer.
//!
//! Everything here operates on Candle tensors following the
//! `(batch, seq, hidden)` convention: affine projections, layer
//! normalisation, dropout, the residual+norm wrapper applied after every
//! sublayer, and the position-wise feed-forward block. Parameters are held as
//! [`candle_core::Var`] so an external training loop can update them in
//! place while forward passes only read.

pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod feed_forward;
pub mod linear;
pub mod norm;
pub mod residual;

pub use dtypes::PrecisionPolicy;
