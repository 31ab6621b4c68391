//! Precision policy for projection layers.
//!
//! Parameters may be stored as `f16`/`bf16`, but matmuls and activations are
//! evaluated in at least `f32`. [`PrecisionPolicy`] records both dtypes so
//! every layer casts the same way before and after its compute step.

use candle_core::{DType, Result, Tensor};

/// Storage and compute dtypes used by a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Builds a policy with explicit storage and compute dtypes.
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// Promotes half-precision parameter dtypes to `f32` for compute.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    /// Casts a tensor to the compute dtype.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
