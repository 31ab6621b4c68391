use std::{fs, path::Path};

use candle_core::{DType, Device};
use layers::{ActivationKind, LinearInit};
use serde::{Deserialize, Serialize};

use super::layer::{AttentionInputs, MultiHeadAttention};
use crate::core::{AttentionError, Config, Result};

/// Storage dtype for projection weights sampled by [`MultiHeadAttentionConfig::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Hyperparameters of a multi-head attention layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiHeadAttentionConfig {
    /// Number of heads; must divide the value feature dimension.
    pub head_num: usize,
    /// Activation applied after every projection. `None` is the identity.
    #[serde(default)]
    pub activation: Option<ActivationKind>,
    #[serde(default = "default_use_bias")]
    pub use_bias: bool,
    #[serde(default)]
    pub kernel_init: LinearInit,
    /// Weight dtype used by [`bind`](Self::bind). `bind_to_inputs` follows
    /// the query dtype instead.
    #[serde(default)]
    pub precision: Precision,
    /// Options forwarded to the scaled dot-product engine.
    #[serde(default)]
    pub attention: Config,
}

fn default_use_bias() -> bool {
    true
}

impl MultiHeadAttentionConfig {
    pub fn new(head_num: usize) -> Self {
        Self {
            head_num,
            activation: None,
            use_bias: true,
            kernel_init: LinearInit::default(),
            precision: Precision::default(),
            attention: Config::default(),
        }
    }

    pub fn with_activation(mut self, activation: ActivationKind) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Restrict every query to the keys at or before its position.
    pub fn with_causal(mut self, causal: bool) -> Self {
        self.attention.causal = causal;
        self
    }

    pub fn activation_kind(&self) -> ActivationKind {
        self.activation.unwrap_or_default()
    }

    /// Loads a configuration from `.json` or `.toml` (the default when the
    /// file has no extension).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(AttentionError::config(format!(
                    "unsupported configuration extension '{other}'"
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the hyperparameters that do not depend on input shapes.
    pub fn validate(&self) -> Result<()> {
        if self.head_num == 0 {
            return Err(AttentionError::config("head_num must be greater than zero"));
        }
        Ok(())
    }

    /// Checks that `feature_dim` splits evenly across the heads.
    pub fn validate_feature_dim(&self, feature_dim: usize) -> Result<usize> {
        self.validate()?;
        if feature_dim == 0 || feature_dim % self.head_num != 0 {
            return Err(AttentionError::config(format!(
                "feature dimension {feature_dim} is not divisible by head_num {}",
                self.head_num
            )));
        }
        Ok(feature_dim / self.head_num)
    }

    /// Binds the configuration to known input feature sizes, sampling
    /// projection weights on `device`.
    pub fn bind(&self, dims: InputDims, device: &Device) -> Result<MultiHeadAttention> {
        MultiHeadAttention::sample(self.clone(), dims, device, self.precision.dtype())
    }

    /// Binds against the shapes, device and dtype of concrete inputs.
    ///
    /// Weights take the query dtype and `precision` is not consulted; use
    /// [`bind`](Self::bind) with [`InputDims::from_inputs`] to keep it.
    pub fn bind_to_inputs(&self, inputs: &AttentionInputs<'_>) -> Result<MultiHeadAttention> {
        let dims = InputDims::from_inputs(inputs)?;
        let (query, _, _) = inputs.resolve();
        MultiHeadAttention::sample(self.clone(), dims, query.device(), query.dtype())
    }
}

/// Feature sizes of the query, key and value inputs.
///
/// The value size doubles as the model dimension of the layer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDims {
    pub query: usize,
    pub key: usize,
    pub value: usize,
}

impl InputDims {
    pub fn self_attention(features: usize) -> Self {
        Self {
            query: features,
            key: features,
            value: features,
        }
    }

    pub fn from_inputs(inputs: &AttentionInputs<'_>) -> Result<Self> {
        let (query, key, value) = inputs.resolve();
        let last = |name: &str, tensor: &candle_core::Tensor| match tensor.dims() {
            &[_, _, features] => Ok(features),
            dims => Err(AttentionError::shape(format!(
                "{name} must be [batch, seq, features], got {dims:?}"
            ))),
        };
        Ok(Self {
            query: last("query", query)?,
            key: last("key", key)?,
            value: last("value", value)?,
        })
    }
}
