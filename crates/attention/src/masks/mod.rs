//! Boolean masks and the tagged mask parameter of the multi-head layer.
//!
//! Masks produced here have dtype [`MASK_DTYPE`] with `1` marking a valid
//! position and `0` marking padding or a forbidden key. Caller-supplied masks
//! may use any numeric dtype; [`keep_mask`] normalises them.

pub mod causal;
pub mod padding;

use candle_core::{DType, Tensor};

use crate::core::Result;

/// Dtype shared by all boolean masks.
pub const MASK_DTYPE: DType = DType::U8;

pub use causal::build_causal_mask;
pub use padding::{
    padding_mask_from_booleans, padding_mask_from_lengths, padding_mask_from_token_ids,
};

/// Converts any numeric mask to [`MASK_DTYPE`], treating non-zero as valid.
pub fn keep_mask(mask: &Tensor) -> Result<Tensor> {
    if mask.dtype() == MASK_DTYPE {
        return Ok(mask.clone());
    }
    Ok(mask.ne(0f64)?)
}

/// Which sides of the attention a mask applies to.
///
/// The key mask decides which keys contribute to each query. The query mask
/// decides which output positions downstream layers treat as valid; it never
/// changes the attention scores.
#[derive(Debug, Clone, Default)]
pub enum AttentionMask {
    #[default]
    None,
    /// `[batch, q_len]`.
    QueryOnly(Tensor),
    /// `[batch, k_len]` or `[batch, q_len, k_len]`.
    KeyOnly(Tensor),
    /// Query mask first, then key mask.
    Both(Tensor, Tensor),
}

impl AttentionMask {
    /// Self-attention over a padded sequence masks both sides identically.
    pub fn self_attention(mask: Tensor) -> Self {
        Self::Both(mask.clone(), mask)
    }

    pub fn from_parts(query: Option<Tensor>, key: Option<Tensor>) -> Self {
        match (query, key) {
            (Some(q), Some(k)) => Self::Both(q, k),
            (Some(q), None) => Self::QueryOnly(q),
            (None, Some(k)) => Self::KeyOnly(k),
            (None, None) => Self::None,
        }
    }

    pub fn query(&self) -> Option<&Tensor> {
        match self {
            Self::QueryOnly(q) | Self::Both(q, _) => Some(q),
            Self::None | Self::KeyOnly(_) => None,
        }
    }

    pub fn key(&self) -> Option<&Tensor> {
        match self {
            Self::KeyOnly(k) | Self::Both(_, k) => Some(k),
            Self::None | Self::QueryOnly(_) => None,
        }
    }

    /// The mask forwarded with the attention output: the query mask, unchanged.
    pub fn propagate(&self) -> Option<Tensor> {
        self.query().cloned()
    }
}
