//! Configuration for the VGG+BLSTM encoder.
//!
//! The encoder is fully described by an immutable [`EncoderConfig`] created
//! once at model-build time. The recurrent backend is selected by the
//! `lstm_impl` string field; the five recognized values are modeled by
//! [`CellKind`], parsed when the recurrent stack is built.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Recurrent-cell backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Plain cell: standard gates, no peephole connections.
    Basic,
    /// Peephole-capable cell with optional output projection and
    /// cell-state clipping. The only backend that honors `num_proj`.
    Peephole,
    /// Block cell: one combined gate kernel over `[x; h]` per step.
    Block,
    /// Block-fused cell: input-side gate pre-activations for the whole
    /// sequence are computed in a single batched matmul.
    Fused,
    /// Packed-parameter cell: all weights in one flat buffer, the layout
    /// GPU RNN kernels consume. Ignores peephole/clipping/projection.
    Cudnn,
}

impl CellKind {
    /// The five recognized selector strings.
    pub const NAMES: [&'static str; 5] = ["basic", "peephole", "block", "fused", "cudnn"];

    pub fn as_str(&self) -> &'static str {
        match self {
            CellKind::Basic => "basic",
            CellKind::Peephole => "peephole",
            CellKind::Block => "block",
            CellKind::Fused => "fused",
            CellKind::Cudnn => "cudnn",
        }
    }
}

impl FromStr for CellKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(CellKind::Basic),
            "peephole" => Ok(CellKind::Peephole),
            "block" => Ok(CellKind::Block),
            "fused" => Ok(CellKind::Fused),
            "cudnn" => Ok(CellKind::Cudnn),
            _ => Err(Error::UnknownCell { name: s.to_string() }),
        }
    }
}

impl std::fmt::Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hyperparameters of the VGG+BLSTM encoder.
///
/// `input_size` is the per-frame feature width and must be a multiple of 3
/// (static + Δ + ΔΔ channels). The full per-timestep input vector is
/// `num_channels × splice × 3` wide, where `num_channels = input_size / 3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Per-frame feature width (must be divisible by 3).
    pub input_size: usize,

    /// Number of neighboring frames spliced as context.
    pub splice: usize,

    /// Recurrent units per direction in each layer.
    pub num_units: usize,

    /// Projection width (must be nonzero). Honored only by the
    /// `peephole` backend; silently ignored by the other four.
    pub num_proj: usize,

    /// Number of stacked bidirectional layers.
    pub num_layers: usize,

    /// Backend-cell selector, one of [`CellKind::NAMES`].
    pub lstm_impl: String,

    /// Whether gates see the cell state directly.
    pub use_peephole: bool,

    /// Weight-init scale: uniform half-range for recurrent kernels,
    /// normal stddev for conv/bridge kernels.
    pub parameter_init: f64,

    /// Cell-state clipping range; clipping is enabled when > 0.
    pub clip_activation: f64,

    /// If true, outputs are `[T, B, out]` instead of `[B, T, out]`.
    pub time_major: bool,

    /// Weight-tree prefix for all encoder parameters.
    pub name: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            input_size: 120,
            splice: 11,
            num_units: 256,
            num_proj: 256,
            num_layers: 5,
            lstm_impl: "peephole".to_string(),
            use_peephole: true,
            parameter_init: 0.1,
            clip_activation: 50.0,
            time_major: false,
            name: "vgg_blstm".to_string(),
        }
    }
}

impl EncoderConfig {
    /// Check the construction-time invariants.
    pub fn validate(&self) -> Result<()> {
        if self.input_size % 3 != 0 {
            return Err(Error::Config(format!(
                "input_size must be a multiple of 3 (static + Δ + ΔΔ), got {}",
                self.input_size
            )));
        }
        if self.num_proj == 0 {
            return Err(Error::Config("num_proj must be nonzero".to_string()));
        }
        Ok(())
    }

    /// Number of static feature channels (`input_size / 3`).
    pub fn num_channels(&self) -> usize {
        self.input_size / 3
    }

    /// Projection width actually in effect.
    ///
    /// Only the `peephole` backend supports projection; for every other
    /// selector the configured `num_proj` is discarded.
    pub fn effective_proj(&self) -> Option<usize> {
        match self.lstm_impl.parse::<CellKind>() {
            Ok(CellKind::Peephole) => Some(self.num_proj),
            _ => None,
        }
    }

    /// Trailing dimension of the encoded output sequence.
    pub fn output_dim(&self) -> usize {
        self.effective_proj().unwrap_or(self.num_units)
    }

    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to [`EncoderConfig::default`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}
