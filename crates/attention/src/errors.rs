//! Error types emitted by the attention kernel and module.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    #[error("unsupported dtype: {requested}")]
    UnsupportedDType { requested: String },
    /// A tensor-backend failure propagated to the caller.
    #[error("{0}")]
    Backend(String),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }
}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
