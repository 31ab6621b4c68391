//! Causal (history-only) masks.

use candle_core::{Device, Result, Tensor};

/// Builds a `[q_len, k_len]` mask where query `q` may see keys `0..=q + offset`.
///
/// `offset = k_len - q_len` when there are more keys than queries, so the
/// queries line up with the most recent keys. Otherwise the offset is zero and
/// query `q` sees exactly keys `k <= q`.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let data: Vec<u8> = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| u8::from(k <= q + offset)))
        .collect();
    Tensor::from_vec(data, (q_len, k_len), device)
}
