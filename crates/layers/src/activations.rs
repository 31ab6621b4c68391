//! Activations applied on top of dense projections.
//!
//! Activations are shape preserving. Each one evaluates in the compute dtype of
//! the supplied [`PrecisionPolicy`] and returns a tensor in storage dtype so it
//! can be chained after [`Linear`](crate::linear::Linear) without extra casts.

use std::sync::Arc;

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity an [`Activation`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// Pass-through; the default when a layer has no activation configured.
    #[default]
    Identity,
    Relu,
    /// Erf-based GELU.
    Gelu,
    /// `x * sigmoid(x)`.
    Silu,
    Tanh,
    Sigmoid,
}

/// Common interface for activation functions.
pub trait Activation: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ActivationKind;

    /// Applies the activation using the precision rules in `policy`.
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

#[derive(Debug)]
struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if self.kind == ActivationKind::Identity {
            return policy.cast_to_storage(input);
        }
        let x = policy.cast_for_matmul(input)?;
        let y = match self.kind {
            ActivationKind::Identity => x,
            ActivationKind::Relu => x.relu()?,
            ActivationKind::Gelu => x.gelu_erf()?,
            ActivationKind::Silu => x.silu()?,
            ActivationKind::Tanh => x.tanh()?,
            ActivationKind::Sigmoid => (x.neg()?.exp()? + 1.0)?.recip()?,
        };
        policy.cast_to_storage(&y)
    }
}

/// Returns a shared built-in activation implementation.
pub fn builtin(kind: ActivationKind) -> Arc<dyn Activation> {
    Arc::new(BuiltinActivation { kind })
}
