//! vgg-blstm-rs CLI — encoder smoke run.
//!
//! Builds the encoder with freshly initialized weights on CPU, pushes a
//! random feature batch through it, and prints a one-line JSON summary of
//! the result to stdout:
//!
//! ```json
//! {"lstm_impl":"peephole","output_shape":[8,120,256],"time_major":false}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use vgg_blstm_rs::{EncoderConfig, VggBlstmEncoder};

#[derive(Parser, Debug)]
#[command(
    name = "encode",
    about = "Run one forward pass of the VGG+BLSTM encoder",
    long_about = "Builds the encoder with random weights on CPU and encodes a\n\
                  random feature batch. Useful as a smoke test and for sizing\n\
                  the graph for a given configuration."
)]
struct Args {
    /// JSON config file; omitted fields fall back to defaults.
    #[arg(long)]
    config: Option<String>,

    /// Recurrent backend: basic, peephole, block, fused, or cudnn.
    #[arg(long)]
    lstm_impl: Option<String>,

    /// Recurrent units per direction.
    #[arg(long)]
    num_units: Option<usize>,

    /// Number of stacked bidirectional layers.
    #[arg(long)]
    num_layers: Option<usize>,

    /// Batch size of the random input.
    #[arg(long, default_value_t = 8)]
    batch: usize,

    /// Number of timesteps of the random input.
    #[arg(long, default_value_t = 120)]
    time: usize,

    /// Dropout keep probability (1.0 = inference).
    #[arg(long, default_value_t = 1.0)]
    keep_prob: f32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EncoderConfig::from_json_file(path)?,
        None => EncoderConfig::default(),
    };
    if let Some(lstm_impl) = args.lstm_impl {
        config.lstm_impl = lstm_impl;
    }
    if let Some(num_units) = args.num_units {
        config.num_units = num_units;
    }
    if let Some(num_layers) = args.num_layers {
        config.num_layers = num_layers;
    }

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    tracing::info!(lstm_impl = %config.lstm_impl, "building encoder");
    let encoder = VggBlstmEncoder::new(config.clone(), vb)?;

    let feat = config.num_channels() * config.splice * 3;
    let inputs = Tensor::randn(0.0_f32, 1.0, (args.batch, args.time, feat), &device)?;
    let seq_lens = vec![args.time; args.batch];

    tracing::info!(batch = args.batch, time = args.time, feat, "encoding");
    let (outputs, _final_state) = encoder.forward(&inputs, &seq_lens, args.keep_prob)?;

    let summary = serde_json::json!({
        "lstm_impl": config.lstm_impl,
        "output_shape": outputs.dims(),
        "time_major": config.time_major,
    });
    println!("{summary}");
    Ok(())
}
