//! Portable, exact implementations of scaled dot-product attention.
//!
//! These paths favour clarity over absolute performance and define the
//! numerical behaviour every other kernel is measured against.

pub mod scaled_dot_product;

pub use scaled_dot_product::{masked_softmax, ScaledDotProductAttention};
