//! Projection building blocks for the attention layer.
//!
//! The attention crate treats trainable weight application as a collaborator:
//! it hands `(batch, seq, features)` tensors to a [`Projection`] and receives
//! the projected features back. This crate owns those projections together with
//! the activation catalogue and the precision policy that governs casting.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod projection;

pub use activations::{builtin, Activation, ActivationKind};
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use projection::Projection;
