//! Dense affine projections.
//!
//! Inputs are shaped `(batch, seq, in_dim)` or `(rows, in_dim)` and produce the
//! same leading dimensions with `out_dim` features. Weights use the
//! `(out_dim, in_dim)` layout, so the forward pass computes `x · Wᵗ + b` in the
//! compute dtype of the supplied [`PrecisionPolicy`].

use candle_core::{DType, Device, Error, Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::{checks, dtypes::PrecisionPolicy};

/// Static shape description of a [`Linear`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Whether an additive bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Weight initialisation policies. Biases always start at zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinearInit {
    /// Glorot uniform.
    XavierUniform,
    /// Glorot normal.
    #[default]
    XavierNormal,
    /// He uniform; `negative_slope` of zero gives the ReLU gain.
    KaimingUniform { negative_slope: f64 },
    /// He normal.
    KaimingNormal { negative_slope: f64 },
    /// Multiplies the samples of another policy by `scale`.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl LinearInit {
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    fn sample_f32(&self, shape: (usize, usize), device: &Device) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        match self {
            LinearInit::XavierUniform => {
                let bound = (6.0 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::rand(-bound, bound, shape, device)
            }
            LinearInit::XavierNormal => {
                let std = (2.0 / (fan_in + fan_out)).sqrt() as f32;
                Tensor::randn(0f32, std, shape, device)
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = (3.0f64.sqrt() * gain / fan_in.sqrt()) as f32;
                Tensor::rand(-bound, bound, shape, device)
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0 / (1.0 + negative_slope.powi(2))).sqrt();
                Tensor::randn(0f32, (gain / fan_in.sqrt()) as f32, shape, device)
            }
            LinearInit::Scaled { base, scale } => base.sample_f32(shape, device)?.affine(*scale, 0.0),
        }
    }
}

/// Dense affine projection with an optional bias.
///
/// Parameters are immutable after construction, so a `Linear` can be shared
/// across threads and evaluated concurrently.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Wraps caller-owned parameters after validating their shapes.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_rank("linear.weight", &weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            &weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", &weight, &checks::FLOAT_DTYPES)?;
        match (config.bias, bias.as_ref()) {
            (true, Some(b)) => {
                checks::expect_shape("linear.bias", b, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", b, &checks::FLOAT_DTYPES)?;
            }
            (false, Some(_)) => {
                return Err(Error::Msg("bias provided but config disables bias".into()))
            }
            (true, None) => return Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => {}
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Samples fresh weights with `init`; the bias starts at zero.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init
            .sample_f32((config.output_dim, config.input_dim), device)?
            .to_dtype(dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Square identity projection without bias.
    pub fn identity(dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let mut data = vec![0f32; dim * dim];
        for i in 0..dim {
            data[i * dim + i] = 1.0;
        }
        let weight = Tensor::from_vec(data, (dim, dim), device)?.to_dtype(dtype)?;
        Self::new(LinearConfig::new(dim, dim).with_bias(false), weight, None)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let x = policy.cast_for_matmul(input)?;
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let out_dim = self.config.output_dim;

        let mut output = match x.dims() {
            &[batch, seq, in_dim] if in_dim == self.config.input_dim => x
                .reshape((batch * seq, in_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, out_dim))?,
            &[_, in_dim] if in_dim == self.config.input_dim => x.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear expects [B, T, {}] or [T, {}] input, got {:?}",
                    self.config.input_dim, self.config.input_dim, dims
                )))
            }
        };

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&policy.cast_for_matmul(bias)?)?;
        }
        policy.cast_to_storage(&output)
    }
}
