//! Runs self-attention over a zero-padded token batch and prints the shapes
//! and the propagated mask.
//!
//! Usage: `mha-demo [config.toml|config.json]`. Set `RUST_LOG=debug` to see
//! the layer's bind and forward records.

use anyhow::{Context, Result};
use attention::masks::padding_mask_from_token_ids;
use attention::{AttentionInputs, AttentionMask, InputDims, MultiHeadAttentionConfig};
use candle_core::{Device, Module, Tensor};
use candle_nn::Embedding;

const VOCAB: usize = 16;
const HIDDEN: usize = 8;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => MultiHeadAttentionConfig::from_path(&path)
            .with_context(|| format!("loading attention config from {path}"))?,
        None => MultiHeadAttentionConfig::new(2),
    };

    let device = Device::Cpu;
    let token_ids = Tensor::new(&[[3u32, 7, 1, 9, 0, 0], [5, 2, 0, 0, 0, 0]], &device)?;
    let mask = padding_mask_from_token_ids(&token_ids, 0)?;
    let table = Tensor::randn(0f32, 1.0, (VOCAB, HIDDEN), &device)?;
    let embedded = Embedding::new(table, HIDDEN).forward(&token_ids)?;

    let inputs = AttentionInputs::SelfAttention(&embedded);
    let layer = config.bind(InputDims::from_inputs(&inputs)?, &device)?;
    let output = layer.forward(inputs, &AttentionMask::self_attention(mask))?;

    println!(
        "heads={} head_dim={} d_model={}",
        layer.head_num(),
        layer.head_dim(),
        layer.d_model()
    );
    println!("input   {:?}", embedded.dims());
    println!("output  {:?}", output.hidden.dims());
    println!("weights {:?}", output.weights.dims());
    if let Some(mask) = output.mask {
        println!("mask    {:?}", mask.to_vec2::<u8>()?);
    }
    Ok(())
}
