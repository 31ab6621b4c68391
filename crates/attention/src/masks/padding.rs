//! Builders for `[batch, seq_len]` padding masks.

use candle_core::{Device, Result, Tensor};

/// Marks the first `lengths[b]` positions of each row as valid.
///
/// Lengths longer than `seq_len` are clamped.
pub fn padding_mask_from_lengths(
    device: &Device,
    lengths: &[usize],
    seq_len: usize,
) -> Result<Tensor> {
    let data: Vec<u8> = lengths
        .iter()
        .flat_map(|&valid| (0..seq_len).map(move |p| u8::from(p < valid)))
        .collect();
    Tensor::from_vec(data, (lengths.len(), seq_len), device)
}

/// Builds a mask from padding flags, where `true` marks a padded position.
///
/// Every row must have the same length.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let seq_len = padding.first().map_or(0, Vec::len);
    if let Some(row) = padding.iter().find(|row| row.len() != seq_len) {
        candle_core::bail!(
            "all padding rows must share length {seq_len}, found a row of {}",
            row.len()
        );
    }
    let data: Vec<u8> = padding
        .iter()
        .flatten()
        .map(|&is_padding| u8::from(!is_padding))
        .collect();
    Tensor::from_vec(data, (padding.len(), seq_len), device)
}

/// Masks every position whose token id equals `padding_id`.
///
/// This is the usual convention for embeddings that reserve index zero for
/// padding.
pub fn padding_mask_from_token_ids(token_ids: &Tensor, padding_id: u32) -> Result<Tensor> {
    token_ids.ne(padding_id as f64)
}
