//! Reshapes between `(batch, seq, features)` and per-head batches.
//!
//! Heads are folded into the leading axis in head-major order: row
//! `b * heads + h` of a split tensor holds head `h` of batch element `b`, and
//! its feature `f` is feature `h * head_dim + f` of the input. Both directions
//! only move data, so `merge_heads(split_heads(t, h)?, h)?` reproduces `t`
//! bit for bit.

use candle_core::Tensor;

use crate::core::{AttentionError, Result};

fn check_heads(heads: usize) -> Result<()> {
    if heads == 0 {
        return Err(AttentionError::config("head count must be positive"));
    }
    Ok(())
}

/// `(batch, seq, features)` → `(batch * heads, seq, features / heads)`.
pub fn split_heads(tensor: &Tensor, heads: usize) -> Result<Tensor> {
    check_heads(heads)?;
    let (batch, seq, features) = match tensor.dims() {
        &[b, s, f] => (b, s, f),
        dims => {
            return Err(AttentionError::shape(format!(
                "split_heads expects [batch, seq, features], got {dims:?}"
            )))
        }
    };
    if features % heads != 0 {
        return Err(AttentionError::shape(format!(
            "feature dimension {features} of {:?} is not divisible by {heads} heads",
            tensor.dims()
        )));
    }
    let head_dim = features / heads;
    let split = tensor
        .reshape((batch, seq, heads, head_dim))?
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((batch * heads, seq, head_dim))?;
    Ok(split)
}

/// `(batch * heads, seq, head_dim)` → `(batch, seq, heads * head_dim)`.
pub fn merge_heads(tensor: &Tensor, heads: usize) -> Result<Tensor> {
    check_heads(heads)?;
    let (rows, seq, head_dim) = match tensor.dims() {
        &[n, s, d] => (n, s, d),
        dims => {
            return Err(AttentionError::shape(format!(
                "merge_heads expects [batch * heads, seq, head_dim], got {dims:?}"
            )))
        }
    };
    if rows % heads != 0 {
        return Err(AttentionError::shape(format!(
            "leading dimension {rows} of {:?} is not divisible by {heads} heads",
            tensor.dims()
        )));
    }
    let batch = rows / heads;
    let merged = tensor
        .reshape((batch, heads, seq, head_dim))?
        .permute((0, 2, 1, 3))?
        .contiguous()?
        .reshape((batch, seq, heads * head_dim))?;
    Ok(merged)
}

/// Repeats a `(batch, ...)` mask once per head, matching [`split_heads`].
pub fn expand_mask_to_heads(mask: &Tensor, heads: usize) -> Result<Tensor> {
    check_heads(heads)?;
    let dims = mask.dims();
    let Some((&batch, rest)) = dims.split_first() else {
        return Err(AttentionError::shape("mask must have a batch axis"));
    };
    let mut target = Vec::with_capacity(dims.len() + 1);
    target.push(batch);
    target.push(heads);
    target.extend_from_slice(rest);

    let mut flat = Vec::with_capacity(dims.len());
    flat.push(batch * heads);
    flat.extend_from_slice(rest);

    let expanded = mask
        .unsqueeze(1)?
        .broadcast_as(target)?
        .contiguous()?
        .reshape(flat)?;
    Ok(expanded)
}
