//! Scaled dot-product attention over head-split tensors.
//!
//! Scores are `Q · Kᵗ / sqrt(head_dim)`. Masked keys are set to `-inf` before
//! a softmax that subtracts the row maximum taken over unmasked keys only, so
//! masked keys receive exactly zero weight and rows with no valid key never
//! produce NaN. All arithmetic happens in `f32`.

use candle_core::{DType, Tensor, D};
use candle_nn::ops::softmax_last_dim;

use crate::core::{Attended, Attention, AttentionError, Config, FullyMaskedRows, Result};
use crate::masks::{build_causal_mask, keep_mask};

/// Stateless reference kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledDotProductAttention;

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend_with_weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        key_mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Attended> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::shape("q, k, v must reside on the same device"));
        }

        let dtype = q.dtype();
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }
        if k.dtype() != dtype || v.dtype() != dtype {
            return Err(AttentionError::UnsupportedDType {
                requested: format!(
                    "mixed q/k/v dtypes {dtype:?}/{:?}/{:?}",
                    k.dtype(),
                    v.dtype()
                ),
            });
        }

        let (n, q_len, head_dim) = q
            .dims3()
            .map_err(|_| AttentionError::shape(format!("q must be [n, q_len, d], got {:?}", q.dims())))?;
        let (kn, k_len, kd) = k
            .dims3()
            .map_err(|_| AttentionError::shape(format!("k must be [n, k_len, d], got {:?}", k.dims())))?;
        let (vn, vk, _) = v
            .dims3()
            .map_err(|_| AttentionError::shape(format!("v must be [n, k_len, v_dim], got {:?}", v.dims())))?;

        if k_len == 0 {
            return Err(AttentionError::shape(format!(
                "k must hold at least one key position, got {:?}",
                k.dims()
            )));
        }
        if kn != n || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{n}, ?, {head_dim}] got {:?}",
                k.dims()
            )));
        }
        if vn != n || vk != k_len {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{n}, {k_len}, ?] got {:?}",
                v.dims()
            )));
        }

        let mut keep = key_mask
            .map(|mask| broadcast_key_mask(mask, n, q_len, k_len))
            .transpose()?;
        if config.causal {
            let causal = build_causal_mask(device, q_len, k_len)?
                .broadcast_as((n, q_len, k_len))?
                .contiguous()?;
            keep = Some(match keep {
                Some(existing) => existing.mul(&causal)?,
                None => causal,
            });
        }

        log::trace!(
            "attention::reference n={n} q_len={q_len} k_len={k_len} head_dim={head_dim} masked={} causal={}",
            keep.is_some(),
            config.causal
        );

        let q32 = q.to_dtype(DType::F32)?;
        let k32 = k.to_dtype(DType::F32)?;
        let v32 = v.to_dtype(DType::F32)?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q32
            .matmul(&k32.transpose(1, 2)?.contiguous()?)?
            .affine(scale, 0.0)?;
        let weights = masked_softmax(&scores, keep.as_ref(), config.fully_masked_rows)?;
        let output = weights.matmul(&v32)?;

        Ok(Attended {
            output: output.to_dtype(dtype)?,
            weights: weights.to_dtype(dtype)?,
        })
    }
}

/// Normalises a key mask to a contiguous `[n, q_len, k_len]` u8 tensor.
fn broadcast_key_mask(mask: &Tensor, n: usize, q_len: usize, k_len: usize) -> Result<Tensor> {
    let mask = keep_mask(mask)?;
    let shaped = match mask.dims() {
        &[mn, mk] if mn == n && mk == k_len => mask.unsqueeze(1)?,
        &[mn, mq, mk] if mn == n && (mq == 1 || mq == q_len) && mk == k_len => mask,
        dims => {
            return Err(AttentionError::shape(format!(
                "key mask must be [{n}, {k_len}], [{n}, 1, {k_len}] or [{n}, {q_len}, {k_len}], got {dims:?}"
            )))
        }
    };
    Ok(shaped.broadcast_as((n, q_len, k_len))?.contiguous()?)
}

/// Softmax along the last axis that ignores keys where `keep` is zero.
///
/// `scores` is `f32`; `keep`, when present, is a u8 tensor of the same shape.
/// Rows without any kept key follow `fully_masked`.
pub fn masked_softmax(
    scores: &Tensor,
    keep: Option<&Tensor>,
    fully_masked: FullyMaskedRows,
) -> Result<Tensor> {
    let k_len = scores.dim(D::Minus1)?;
    if k_len == 0 {
        return Err(AttentionError::shape(format!(
            "cannot normalise scores over an empty key axis {:?}",
            scores.dims()
        )));
    }
    let Some(keep) = keep else {
        return Ok(softmax_last_dim(scores)?);
    };
    if keep.dims() != scores.dims() {
        return Err(AttentionError::shape(format!(
            "mask {:?} does not match scores {:?}",
            keep.dims(),
            scores.dims()
        )));
    }

    let device = scores.device();
    let neg_inf = Tensor::full(f32::NEG_INFINITY, scores.shape(), device)?;
    let masked = keep.where_cond(scores, &neg_inf)?;

    // -inf maxima (nothing kept) are clamped so the subtraction stays finite.
    let row_max = masked.max_keepdim(D::Minus1)?.maximum(f32::MIN)?;
    let exp = masked.broadcast_sub(&row_max)?.exp()?;
    let denom = exp.sum_keepdim(D::Minus1)?.maximum(f32::MIN_POSITIVE)?;
    let weights = exp.broadcast_div(&denom)?;

    match fully_masked {
        FullyMaskedRows::Zero => Ok(weights),
        FullyMaskedRows::Uniform => {
            let uniform = Tensor::full(1.0f32 / k_len as f32, scores.shape(), device)?;
            let has_key = keep
                .max_keepdim(D::Minus1)?
                .broadcast_as(scores.shape())?
                .contiguous()?;
            Ok(has_key.where_cond(&weights, &uniform)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 * 0.1 - 0.6).collect();
        let q = Tensor::from_vec(data.clone(), (2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().rev().copied().collect::<Vec<_>>(), (2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (2, 4, 8), device)?;
        Ok((q, k, v))
    }

    /// Loop-based attention with `keep[n][q][k]` flags.
    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        keep: Option<&Vec<Vec<Vec<u8>>>>,
    ) -> CandleResult<Vec<Vec<Vec<f32>>>> {
        let q = q.to_vec3::<f32>()?;
        let k = k.to_vec3::<f32>()?;
        let v = v.to_vec3::<f32>()?;
        let scale = 1.0 / (q[0][0].len() as f32).sqrt();
        let mut out = Vec::new();
        for n in 0..q.len() {
            let mut rows = Vec::new();
            for qi in 0..q[n].len() {
                let mut scores: Vec<Option<f32>> = (0..k[n].len())
                    .map(|ki| {
                        let allowed = keep.map_or(true, |m| m[n][qi][ki] != 0);
                        allowed.then(|| {
                            q[n][qi].iter().zip(&k[n][ki]).map(|(a, b)| a * b).sum::<f32>() * scale
                        })
                    })
                    .collect();
                let max = scores.iter().flatten().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let mut denom = 0.0;
                for s in scores.iter_mut().flatten() {
                    *s = (*s - max).exp();
                    denom += *s;
                }
                let mut row = vec![0f32; v[n][0].len()];
                for (ki, s) in scores.iter().enumerate() {
                    if let Some(w) = s {
                        for (d, acc) in row.iter_mut().enumerate() {
                            *acc += w / denom * v[n][ki][d];
                        }
                    }
                }
                rows.push(row);
            }
            out.push(rows);
        }
        Ok(out)
    }

    fn max_diff(a: &[Vec<Vec<f32>>], b: &[Vec<Vec<f32>>]) -> f32 {
        a.iter()
            .flatten()
            .flatten()
            .zip(b.iter().flatten().flatten())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f32::max)
    }

    #[test]
    fn matches_naive_without_mask() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let out = ScaledDotProductAttention.attend(&q, &k, &v, None, &Config::default())?;
        let expected = naive_attention(&q, &k, &v, None)?;
        assert!(max_diff(&out.to_vec3::<f32>()?, &expected) < 1e-5);
        Ok(())
    }

    #[test]
    fn matches_naive_with_key_mask() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = Tensor::new(&[[1u8, 1, 0, 0], [1, 0, 1, 0]], &device)?;
        let out = ScaledDotProductAttention.attend(&q, &k, &v, Some(&mask), &Config::default())?;

        let rows = mask.to_vec2::<u8>()?;
        let keep: Vec<Vec<Vec<u8>>> = rows.iter().map(|r| vec![r.clone(); 4]).collect();
        let expected = naive_attention(&q, &k, &v, Some(&keep))?;
        assert!(max_diff(&out.to_vec3::<f32>()?, &expected) < 1e-5);
        Ok(())
    }

    #[test]
    fn causal_matches_naive_lower_triangle() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let attended =
            ScaledDotProductAttention.attend_with_weights(&q, &k, &v, None, &Config::causal())?;

        let tri: Vec<Vec<u8>> = (0..4)
            .map(|qi| (0..4).map(|ki| u8::from(ki <= qi)).collect())
            .collect();
        let keep = vec![tri.clone(), tri];
        let expected = naive_attention(&q, &k, &v, Some(&keep))?;
        assert!(max_diff(&attended.output.to_vec3::<f32>()?, &expected) < 1e-5);

        let weights = attended.weights.to_vec3::<f32>()?;
        assert_eq!(weights[0][0][1], 0.0);
        assert_eq!(weights[1][2][3], 0.0);
        Ok(())
    }

    #[test]
    fn per_query_masks_are_honoured() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let keep = vec![
            vec![vec![1u8, 0, 0, 0], vec![0, 1, 0, 0], vec![1, 1, 1, 0], vec![1, 1, 1, 1]];
            2
        ];
        let flat: Vec<u8> = keep.iter().flatten().flatten().copied().collect();
        let mask = Tensor::from_vec(flat, (2, 4, 4), &device)?;
        let out = ScaledDotProductAttention.attend(&q, &k, &v, Some(&mask), &Config::default())?;
        let expected = naive_attention(&q, &k, &v, Some(&keep))?;
        assert!(max_diff(&out.to_vec3::<f32>()?, &expected) < 1e-5);
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((2, 4, 8), DType::F32, &device)?;
        let k_wide = Tensor::zeros((2, 4, 6), DType::F32, &device)?;
        let v = Tensor::zeros((2, 4, 8), DType::F32, &device)?;
        let err = ScaledDotProductAttention
            .attend(&q, &k_wide, &v, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let k = Tensor::zeros((2, 5, 8), DType::F32, &device)?;
        let err = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        Ok(())
    }

    #[test]
    fn batch_mismatch_is_a_shape_error() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((2, 4, 8), DType::F32, &device)?;
        let short = Tensor::zeros((1, 4, 8), DType::F32, &device)?;
        let err = ScaledDotProductAttention
            .attend(&q, &short, &q, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }), "{err}");

        let err = ScaledDotProductAttention
            .attend(&q, &q, &short, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn empty_key_sequence_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((2, 3, 4), DType::F32, &device)?;
        let k = Tensor::zeros((2, 0, 4), DType::F32, &device)?;
        for config in [
            Config::default(),
            Config::causal(),
            Config {
                fully_masked_rows: FullyMaskedRows::Uniform,
                ..Config::default()
            },
        ] {
            let err = ScaledDotProductAttention
                .attend(&q, &k, &k, None, &config)
                .unwrap_err();
            assert!(matches!(err, AttentionError::InvalidShape { .. }), "{err}");
        }

        let scores = Tensor::zeros((1, 2, 0), DType::F32, &device)?;
        let keep = Tensor::zeros((1, 2, 0), DType::U8, &device)?;
        for policy in [FullyMaskedRows::Zero, FullyMaskedRows::Uniform] {
            assert!(masked_softmax(&scores, None, policy).is_err());
            let err = masked_softmax(&scores, Some(&keep), policy).unwrap_err();
            assert!(matches!(err, AttentionError::InvalidShape { .. }), "{err}");
        }
        Ok(())
    }

    #[test]
    fn mask_shape_validation() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = Tensor::ones((2, 3), DType::U8, &device)?;
        let err = ScaledDotProductAttention
            .attend(&q, &k, &v, Some(&mask), &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let mask = Tensor::ones((2, 2, 4), DType::U8, &device)?;
        assert!(ScaledDotProductAttention
            .attend(&q, &k, &v, Some(&mask), &Config::default())
            .is_err());
        Ok(())
    }

    #[test]
    fn integer_inputs_are_unsupported() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 2), DType::U32, &device)?;
        let err = ScaledDotProductAttention
            .attend(&q, &q, &q, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
        Ok(())
    }

    #[test]
    fn dtype_matrix() -> Result<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let reference = ScaledDotProductAttention.attend(&q, &k, &v, None, &Config::default())?;
        for dtype in [DType::BF16, DType::F16] {
            let out = ScaledDotProductAttention
                .attend(
                    &q.to_dtype(dtype)?,
                    &k.to_dtype(dtype)?,
                    &v.to_dtype(dtype)?,
                    None,
                    &Config::default(),
                )?;
            assert_eq!(out.dtype(), dtype);
            let diff = out
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            assert!(diff < 5e-2, "dtype {dtype:?} diverged by {diff}");
        }
        Ok(())
    }

    #[test]
    fn numerical_stability() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000f32, (1, 4, 4), &device)?;
        let k = Tensor::full(-10_000f32, (1, 4, 4), &device)?;
        let v = Tensor::ones((1, 4, 4), DType::F32, &device)?;
        let out = ScaledDotProductAttention
            .attend(&q, &k, &v, None, &Config::default())?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| value.is_finite()));
        Ok(())
    }

    #[test]
    fn masked_keys_get_zero_weight_despite_huge_scores() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::ones((1, 2, 2), DType::F32, &device)?;
        let k = Tensor::new(&[[[1e6f32, 1e6], [0.0, 0.0], [-1.0, 2.0]]], &device)?;
        let v = Tensor::new(&[[[100f32], [1.0], [3.0]]], &device)?;
        let mask = Tensor::new(&[[0u8, 1, 1]], &device)?;
        let attended =
            ScaledDotProductAttention.attend_with_weights(&q, &k, &v, Some(&mask), &Config::default())?;

        for row in attended.weights.to_vec3::<f32>()?.remove(0) {
            assert!(row[0] < 1e-6);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn fully_masked_rows_follow_policy() -> Result<()> {
        let device = Device::Cpu;
        let q = Tensor::ones((1, 2, 2), DType::F32, &device)?;
        let k = Tensor::ones((1, 3, 2), DType::F32, &device)?;
        let v = Tensor::new(&[[[3f32, 0.0], [6.0, 3.0], [0.0, 6.0]]], &device)?;
        let mask = Tensor::zeros((1, 3), DType::U8, &device)?;

        let zero = ScaledDotProductAttention.attend_with_weights(&q, &k, &v, Some(&mask), &Config::default())?;
        let values = zero.output.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|&x| x == 0.0));
        let weights = zero.weights.flatten_all()?.to_vec1::<f32>()?;
        assert!(weights.iter().all(|&w| w == 0.0));

        let config = Config {
            fully_masked_rows: FullyMaskedRows::Uniform,
            ..Config::default()
        };
        let uniform = ScaledDotProductAttention.attend(&q, &k, &v, Some(&mask), &config)?;
        for row in uniform.to_vec3::<f32>()?.remove(0) {
            assert!((row[0] - 3.0).abs() < 1e-5);
            assert!((row[1] - 3.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn uniform_policy_leaves_partial_rows_alone() -> Result<()> {
        let device = Device::Cpu;
        let scores = Tensor::new(&[[[0f32, 1.0, 2.0], [5.0, 5.0, 5.0]]], &device)?;
        let keep = Tensor::new(&[[[1u8, 1, 0], [0, 0, 0]]], &device)?;
        let weights = masked_softmax(&scores, Some(&keep), FullyMaskedRows::Uniform)?
            .to_vec3::<f32>()?
            .remove(0);
        let e = 1f32.exp();
        assert!((weights[0][0] - 1.0 / (1.0 + e)).abs() < 1e-6);
        assert_eq!(weights[0][2], 0.0);
        assert!(weights[1].iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-6));
        Ok(())
    }
}
