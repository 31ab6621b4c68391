//! Multi-head scaled dot-product attention on candle tensors.
//!
//! Inputs follow the `(batch, seq, features)` layout. The layer projects query,
//! key and value, splits the features into `head_num` heads folded into the
//! batch axis (`[batch * heads, seq, head_dim]`), runs scaled dot-product
//! attention per head, merges the heads back and applies an output projection.
//! Reductions are performed in `f32`; outputs keep the input dtype.
//!
//! Masks are explicit. [`AttentionMask`] states whether a mask applies to the
//! keys (which positions may be attended to), the queries (which output
//! positions are valid downstream), or both. Only the query mask is forwarded
//! with the output.

pub mod core;
pub mod heads;
pub mod masks;
pub mod multi_head;
pub mod reference;

pub use crate::core::{Attended, Attention, AttentionError, Config, FullyMaskedRows};
pub use heads::{merge_heads, split_heads};
pub use masks::AttentionMask;
pub use multi_head::{
    AttentionInputs, AttentionOutput, InputDims, MultiHeadAttention, MultiHeadAttentionConfig,
};
pub use reference::ScaledDotProductAttention;
