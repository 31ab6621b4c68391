use candle_core::{DType, Device, Tensor};
use layers::{Linear, PrecisionPolicy, Projection};

use super::config::{InputDims, MultiHeadAttentionConfig};
use crate::core::{Attention, AttentionError, Result};
use crate::heads::{expand_mask_to_heads, merge_heads, split_heads};
use crate::masks::{keep_mask, AttentionMask};
use crate::reference::ScaledDotProductAttention;

/// Inputs of a forward pass.
#[derive(Debug, Clone, Copy)]
pub enum AttentionInputs<'a> {
    /// The tensor serves as query, key and value.
    SelfAttention(&'a Tensor),
    Cross {
        query: &'a Tensor,
        key: &'a Tensor,
        value: &'a Tensor,
    },
}

impl<'a> AttentionInputs<'a> {
    /// Returns `(query, key, value)`.
    pub fn resolve(&self) -> (&'a Tensor, &'a Tensor, &'a Tensor) {
        match *self {
            AttentionInputs::SelfAttention(x) => (x, x, x),
            AttentionInputs::Cross { query, key, value } => (query, key, value),
        }
    }
}

/// Result of a forward pass.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `[batch, q_len, d_model]`.
    pub hidden: Tensor,
    /// The query-side mask, forwarded unchanged for downstream layers.
    pub mask: Option<Tensor>,
    /// `[batch, heads, q_len, k_len]`.
    pub weights: Tensor,
}

/// A bound multi-head attention layer.
///
/// Parameters never change after binding, so a layer can be shared across
/// threads and evaluated concurrently.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: MultiHeadAttentionConfig,
    dims: InputDims,
    head_dim: usize,
    policy: PrecisionPolicy,
    query_proj: Projection,
    key_proj: Projection,
    value_proj: Projection,
    output_proj: Projection,
    engine: ScaledDotProductAttention,
}

impl MultiHeadAttention {
    pub(super) fn sample(
        config: MultiHeadAttentionConfig,
        dims: InputDims,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let d_model = dims.value;
        config.validate_feature_dim(d_model)?;
        let activation = config.activation_kind();
        let project = |input_dim: usize| {
            Projection::with_init(
                input_dim,
                d_model,
                config.use_bias,
                activation,
                &config.kernel_init,
                device,
                dtype,
            )
        };
        let query_proj = project(dims.query)?;
        let key_proj = project(dims.key)?;
        let value_proj = project(dims.value)?;
        let output_proj = project(d_model)?;
        Self::assemble(config, query_proj, key_proj, value_proj, output_proj)
    }

    /// Binds caller-owned projection weights.
    ///
    /// Every projection must map into the value feature dimension, and the
    /// output projection must be square.
    pub fn from_projections(
        config: MultiHeadAttentionConfig,
        query: Linear,
        key: Linear,
        value: Linear,
        output: Linear,
    ) -> Result<Self> {
        let activation = config.activation_kind();
        Self::assemble(
            config,
            Projection::new(query, activation),
            Projection::new(key, activation),
            Projection::new(value, activation),
            Projection::new(output, activation),
        )
    }

    fn assemble(
        config: MultiHeadAttentionConfig,
        query_proj: Projection,
        key_proj: Projection,
        value_proj: Projection,
        output_proj: Projection,
    ) -> Result<Self> {
        let d_model = value_proj.output_dim();
        let head_dim = config.validate_feature_dim(d_model)?;
        for (name, proj) in [("query", &query_proj), ("key", &key_proj)] {
            if proj.output_dim() != d_model {
                return Err(AttentionError::config(format!(
                    "{name} projection outputs {} features, expected {d_model}",
                    proj.output_dim()
                )));
            }
        }
        if output_proj.input_dim() != d_model || output_proj.output_dim() != d_model {
            return Err(AttentionError::config(format!(
                "output projection must be {d_model} -> {d_model}, got {} -> {}",
                output_proj.input_dim(),
                output_proj.output_dim()
            )));
        }

        let dims = InputDims {
            query: query_proj.input_dim(),
            key: key_proj.input_dim(),
            value: value_proj.input_dim(),
        };
        let policy = PrecisionPolicy::from_parameter_dtype(value_proj.linear().weight().dtype());
        log::info!(
            "attention::multi_head bind heads={heads} d_model={d_model} head_dim={head_dim} dims={dims:?} \
             activation={activation:?} use_bias={use_bias} causal={causal} fully_masked={fully_masked:?} \
             mixed_precision={mixed}",
            heads = config.head_num,
            activation = config.activation_kind(),
            use_bias = value_proj.linear().bias().is_some(),
            causal = config.attention.causal,
            fully_masked = config.attention.fully_masked_rows,
            mixed = policy.is_mixed_precision(),
        );

        Ok(Self {
            config,
            dims,
            head_dim,
            policy,
            query_proj,
            key_proj,
            value_proj,
            output_proj,
            engine: ScaledDotProductAttention::new(),
        })
    }

    pub fn config(&self) -> &MultiHeadAttentionConfig {
        &self.config
    }

    pub fn input_dims(&self) -> InputDims {
        self.dims
    }

    pub fn head_num(&self) -> usize {
        self.config.head_num
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Feature dimension of the output, equal to the value feature dimension.
    pub fn d_model(&self) -> usize {
        self.head_dim * self.config.head_num
    }

    /// Query, key, value and output projections, in that order.
    pub fn projections(&self) -> [&Projection; 4] {
        [
            &self.query_proj,
            &self.key_proj,
            &self.value_proj,
            &self.output_proj,
        ]
    }

    pub fn forward(
        &self,
        inputs: AttentionInputs<'_>,
        mask: &AttentionMask,
    ) -> Result<AttentionOutput> {
        let (query, key, value) = inputs.resolve();
        let (batch, q_len) = check_input("query", query, self.dims.query)?;
        let (key_batch, k_len) = check_input("key", key, self.dims.key)?;
        let (value_batch, v_len) = check_input("value", value, self.dims.value)?;
        if key_batch != batch || value_batch != batch {
            return Err(AttentionError::shape(format!(
                "batch sizes differ: query {:?}, key {:?}, value {:?}",
                query.dims(),
                key.dims(),
                value.dims()
            )));
        }
        if v_len != k_len {
            return Err(AttentionError::shape(format!(
                "key and value sequence lengths differ: key {:?}, value {:?}",
                key.dims(),
                value.dims()
            )));
        }
        if k_len == 0 {
            return Err(AttentionError::shape(format!(
                "key must hold at least one position, got {:?}",
                key.dims()
            )));
        }

        if let Some(query_mask) = mask.query() {
            if query_mask.dims() != [batch, q_len] {
                return Err(AttentionError::shape(format!(
                    "query mask must be [{batch}, {q_len}], got {:?}",
                    query_mask.dims()
                )));
            }
        }
        let key_mask = match mask.key() {
            Some(key_mask) => {
                let dims = key_mask.dims();
                if dims != [batch, k_len] && dims != [batch, q_len, k_len] {
                    return Err(AttentionError::shape(format!(
                        "key mask must be [{batch}, {k_len}] or [{batch}, {q_len}, {k_len}], got {dims:?}"
                    )));
                }
                Some(expand_mask_to_heads(&keep_mask(key_mask)?, self.config.head_num)?)
            }
            None => None,
        };

        log::debug!(
            "attention::multi_head forward batch={batch} q_len={q_len} k_len={k_len} key_mask={} query_mask={}",
            key_mask.is_some(),
            mask.query().is_some()
        );

        let heads = self.config.head_num;
        let q = split_heads(&self.query_proj.forward(query, &self.policy)?, heads)?;
        let k = split_heads(&self.key_proj.forward(key, &self.policy)?, heads)?;
        let v = split_heads(&self.value_proj.forward(value, &self.policy)?, heads)?;

        let attended =
            self.engine
                .attend_with_weights(&q, &k, &v, key_mask.as_ref(), &self.config.attention)?;
        let merged = merge_heads(&attended.output, heads)?;
        let hidden = self.output_proj.forward(&merged, &self.policy)?;
        let weights = attended.weights.reshape((batch, heads, q_len, k_len))?;

        Ok(AttentionOutput {
            hidden,
            mask: mask.propagate(),
            weights,
        })
    }
}

/// Validates a `(batch, seq, features)` input and returns `(batch, seq)`.
fn check_input(name: &str, tensor: &Tensor, features: usize) -> Result<(usize, usize)> {
    match tensor.dims() {
        &[batch, seq, actual] if actual == features => Ok((batch, seq)),
        dims => Err(AttentionError::shape(format!(
            "{name} must be [batch, seq, {features}], got {dims:?}"
        ))),
    }
}
