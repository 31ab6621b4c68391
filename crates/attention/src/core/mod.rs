//! Core traits and types shared across attention implementations.
//!
//! Engines operate on head-split tensors with layout `[batch * heads, seq_len,
//! head_dim]`. Reductions accumulate in `f32` regardless of the incoming dtype
//! (`bf16`, `f16` or `f32`) and outputs are cast back to the query dtype.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, FullyMaskedRows};
pub use errors::{AttentionError, Result};

/// Attended values together with the normalised weights that produced them.
#[derive(Debug, Clone)]
pub struct Attended {
    /// `[batch * heads, q_len, v_dim]`, dtype of the query.
    pub output: Tensor,
    /// `[batch * heads, q_len, k_len]`, dtype of the query.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[n, q_len, d]`, `k` is `[n, k_len, d]` and `v` is
///   `[n, k_len, v_dim]`.
/// * `key_mask`, when present, is boolean valued (non-zero keeps the key) and
///   shaped `[n, k_len]`, `[n, 1, k_len]` or `[n, q_len, k_len]`.
pub trait Attention {
    /// Computes the attended values and the weights used to produce them.
    fn attend_with_weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        key_mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Attended>;

    /// Computes the attended values only.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        key_mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor> {
        Ok(self.attend_with_weights(q, k, v, key_mask, config)?.output)
    }
}
