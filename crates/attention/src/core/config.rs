//! Run-time options for the scaled dot-product engine.

use serde::{Deserialize, Serialize};

/// What the engine does with a query row whose keys are all masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullyMaskedRows {
    /// All weights are zero, so the attended vector is zero.
    #[default]
    Zero,
    /// Weights spread evenly over every key, giving the mean value vector.
    Uniform,
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Hide keys that come after each query position.
    ///
    /// When `k_len > q_len` queries align with the most recent `q_len` keys.
    #[serde(default)]
    pub causal: bool,
    #[serde(default)]
    pub fully_masked_rows: FullyMaskedRows,
}

impl Config {
    pub fn causal() -> Self {
        Self {
            causal: true,
            ..Self::default()
        }
    }
}
