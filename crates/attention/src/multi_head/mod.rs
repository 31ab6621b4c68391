//! Multi-head attention layer with explicit two-phase construction.
//!
//! A [`MultiHeadAttentionConfig`] holds the hyperparameters only. Binding it to
//! concrete feature sizes ([`MultiHeadAttentionConfig::bind`] or
//! [`MultiHeadAttentionConfig::bind_to_inputs`]) validates that the value
//! feature dimension splits evenly across heads and creates the projection
//! weights, producing an immutable [`MultiHeadAttention`].

mod config;
mod layer;

pub use config::{InputDims, MultiHeadAttentionConfig, Precision};
pub use layer::{AttentionInputs, AttentionOutput, MultiHeadAttention};
