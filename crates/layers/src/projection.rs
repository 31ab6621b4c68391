//! Dense projection followed by an activation, `activation(x · Wᵗ + b)`.

use std::sync::Arc;

use candle_core::{DType, Device, Result, Tensor};

use crate::activations::{builtin, Activation, ActivationKind};
use crate::dtypes::PrecisionPolicy;
use crate::linear::{Linear, LinearConfig, LinearInit};

/// A [`Linear`] layer paired with its activation.
#[derive(Debug, Clone)]
pub struct Projection {
    linear: Linear,
    activation: Arc<dyn Activation>,
}

impl Projection {
    pub fn new(linear: Linear, activation: ActivationKind) -> Self {
        Self {
            linear,
            activation: builtin(activation),
        }
    }

    /// Samples a new projection from `input_dim` to `output_dim` features.
    pub fn with_init(
        input_dim: usize,
        output_dim: usize,
        use_bias: bool,
        activation: ActivationKind,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let config = LinearConfig::new(input_dim, output_dim).with_bias(use_bias);
        let linear = Linear::with_init(config, init, device, dtype)?;
        Ok(Self::new(linear, activation))
    }

    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    pub fn activation(&self) -> ActivationKind {
        self.activation.kind()
    }

    pub fn input_dim(&self) -> usize {
        self.linear.config().input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.linear.config().output_dim
    }

    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let projected = self.linear.forward(input, policy)?;
        self.activation.forward(&projected, policy)
    }
}
