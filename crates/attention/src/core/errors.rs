//! Error types emitted by the attention crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttentionError>;

/// Attention-specific error category.
///
/// A fully masked key row is deliberately absent: it is a defined degenerate
/// case handled by [`FullyMaskedRows`](crate::core::FullyMaskedRows).
#[derive(Debug, Error)]
pub enum AttentionError {
    /// Hyperparameters that cannot be bound to the supplied shapes.
    #[error("invalid configuration: {context}")]
    InvalidConfig { context: String },
    /// The supplied tensor shapes do not align with the documented contract.
    #[error("invalid tensor shape: {context}")]
    InvalidShape { context: String },
    #[error("unsupported dtype {requested}")]
    UnsupportedDType { requested: String },
    #[error("failed to read config file: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("failed to parse json config: {0}")]
    ConfigJson(#[from] serde_json::Error),
    #[error("failed to parse toml config: {0}")]
    ConfigToml(#[from] toml::de::Error),
    /// A tensor backend failure propagated to the caller.
    #[error(transparent)]
    Backend(#[from] candle_core::Error),
}

impl AttentionError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        Self::InvalidShape {
            context: context.into(),
        }
    }

    pub(crate) fn config(context: impl Into<String>) -> Self {
        Self::InvalidConfig {
            context: context.into(),
        }
    }
}
