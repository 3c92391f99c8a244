//! Stacked bidirectional recurrence over the bridged sequence.
//!
//! Five interchangeable cell backends behind the [`LstmCell`] trait:
//!
//! - [`basic`] — standard gates, no peephole connections
//! - [`peephole`] — peephole gates, cell clipping, optional projection
//! - [`block`] — one combined gate kernel over `[x; h]` per step
//! - [`fused`] — input-side gate pre-activations batched over the sequence
//! - [`cudnn`] — single packed parameter buffer, init scale only
//!
//! [`BlstmStack`] selects the backend from the configured selector string
//! and runs `num_layers` bidirectional layers of it. Forward and backward
//! outputs are summed per layer, so the merged width stays at the cell's
//! output width throughout the stack.
//!
//! ## Sequence lengths
//!
//! Each example carries a valid length; frames past it are padding. The
//! scan driver blends states under a `{0, 1}` mask: padded steps keep the
//! previous state and emit zeros. Because padded steps also leave the zero
//! initial state untouched, the backward scan (iterating `T-1..0`) starts
//! its real recurrence at the last valid frame — exactly a reversal of the
//! valid prefix, with no per-example gather.

pub mod basic;
pub mod block;
pub mod cudnn;
pub mod fused;
pub mod peephole;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder};

use crate::bridge;
use crate::config::{CellKind, EncoderConfig};
use crate::{Error, Result};

/// Hidden/cell state of one recurrent direction.
#[derive(Debug, Clone)]
pub struct LstmState {
    /// Hidden state, `[B, output_dim]`.
    pub h: Tensor,
    /// Cell state, `[B, cell_dim]`.
    pub c: Tensor,
}

/// Final state of the last bidirectional layer.
#[derive(Debug, Clone)]
pub struct BlstmState {
    pub forward: LstmState,
    pub backward: LstmState,
}

/// Scan direction over the time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Common interface for the five recurrent-cell backends.
pub trait LstmCell {
    /// Width of the emitted hidden state (units, or projection width).
    fn output_dim(&self) -> usize;

    /// Width of the internal cell state.
    fn cell_dim(&self) -> usize;

    /// One recurrence step; `x` is `[B, in_dim]`.
    fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState>;

    fn zero_state(&self, batch: usize, dtype: DType, device: &Device) -> Result<LstmState> {
        Ok(LstmState {
            h: Tensor::zeros((batch, self.output_dim()), dtype, device)?,
            c: Tensor::zeros((batch, self.cell_dim()), dtype, device)?,
        })
    }

    /// Scan a whole sequence `[B, T, in_dim]` under a validity mask
    /// `[B, T]`, returning masked outputs `[B, T, output_dim]` and the
    /// final state.
    fn run(&self, xs: &Tensor, mask: &Tensor, direction: Direction) -> Result<(Tensor, LstmState)> {
        let (batch, time, _) = xs.dims3()?;
        let zero = self.zero_state(batch, xs.dtype(), xs.device())?;
        masked_scan(time, zero, mask, direction, |t, state| {
            let x = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            self.step(&x, state)
        })
    }
}

/// Drive a step function over the time axis with masked state blending.
///
/// `step_fn(t, state)` computes the candidate next state for frame `t`.
/// Rows whose mask is 0 at `t` keep their previous state and contribute a
/// zero output row.
pub(crate) fn masked_scan<F>(
    time: usize,
    zero: LstmState,
    mask: &Tensor,
    direction: Direction,
    mut step_fn: F,
) -> Result<(Tensor, LstmState)>
where
    F: FnMut(usize, &LstmState) -> Result<LstmState>,
{
    let mut steps: Vec<usize> = (0..time).collect();
    if direction == Direction::Backward {
        steps.reverse();
    }

    let mut state = zero;
    let mut outputs = Vec::with_capacity(time);
    for &t in &steps {
        let keep = mask.narrow(1, t, 1)?; // [B, 1]
        let carry = keep.affine(-1.0, 1.0)?; // 1 - keep
        let next = step_fn(t, &state)?;

        outputs.push(next.h.broadcast_mul(&keep)?);
        state = LstmState {
            h: (next.h.broadcast_mul(&keep)? + state.h.broadcast_mul(&carry)?)?,
            c: (next.c.broadcast_mul(&keep)? + state.c.broadcast_mul(&carry)?)?,
        };
    }

    if direction == Direction::Backward {
        outputs.reverse();
    }
    Ok((Tensor::stack(&outputs, 1)?, state))
}

/// Validity mask `[B, T]`: 1 while `t < seq_lens[b]`, 0 after.
pub(crate) fn sequence_mask(
    seq_lens: &[usize],
    time: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let mut data = Vec::with_capacity(seq_lens.len() * time);
    for &len in seq_lens {
        for t in 0..time {
            data.push(if t < len { 1.0_f32 } else { 0.0 });
        }
    }
    let mask = Tensor::from_vec(data, (seq_lens.len(), time), device)?;
    Ok(mask.to_dtype(dtype)?)
}

/// Uniform initializer over `[-scale, scale]` for recurrent weights.
pub(crate) fn uniform_init(scale: f64) -> Init {
    Init::Uniform {
        lo: -scale,
        up: scale,
    }
}

/// Peephole weights: diagonal cell-to-gate connections.
pub(crate) struct Peephole {
    pub i: Tensor,
    pub f: Tensor,
    pub o: Tensor,
}

impl Peephole {
    pub(crate) fn new(units: usize, init_scale: f64, vb: VarBuilder) -> Result<Self> {
        let init = uniform_init(init_scale);
        Ok(Self {
            i: vb.get_with_hints(units, "w_ci", init)?,
            f: vb.get_with_hints(units, "w_cf", init)?,
            o: vb.get_with_hints(units, "w_co", init)?,
        })
    }
}

/// Split a `[B, 4·units]` pre-activation into the i/f/g/o gates.
pub(crate) fn split_gates(gates: &Tensor, units: usize) -> Result<(Tensor, Tensor, Tensor, Tensor)> {
    let i = gates.narrow(1, 0, units)?;
    let f = gates.narrow(1, units, units)?;
    let g = gates.narrow(1, 2 * units, units)?;
    let o = gates.narrow(1, 3 * units, units)?;
    Ok((i, f, g, o))
}

/// Shared gate arithmetic for one step.
///
/// `gates` is the `[B, 4·units]` pre-activation in i/f/g/o order. Applies
/// peephole terms and cell clipping when configured; projection (if any)
/// is the caller's concern.
pub(crate) fn lstm_gate_step(
    gates: &Tensor,
    state: &LstmState,
    peephole: Option<&Peephole>,
    cell_clip: Option<f64>,
    units: usize,
) -> Result<LstmState> {
    let (i, f, g, o) = split_gates(gates, units)?;

    let (i, f) = match peephole {
        Some(p) => (
            (i + state.c.broadcast_mul(&p.i)?)?,
            (f + state.c.broadcast_mul(&p.f)?)?,
        ),
        None => (i, f),
    };

    let i = candle_nn::ops::sigmoid(&i)?;
    let f = candle_nn::ops::sigmoid(&f)?;
    let g = g.tanh()?;

    let mut c = ((f * &state.c)? + (i * g)?)?;
    if let Some(clip) = cell_clip {
        c = c.clamp(-clip, clip)?;
    }

    let o = match peephole {
        Some(p) => (o + c.broadcast_mul(&p.o)?)?,
        None => o,
    };
    let o = candle_nn::ops::sigmoid(&o)?;
    let h = (o * c.tanh()?)?;

    Ok(LstmState { h, c })
}

fn build_cell(
    kind: CellKind,
    config: &EncoderConfig,
    in_dim: usize,
    vb: VarBuilder,
) -> Result<Box<dyn LstmCell>> {
    let units = config.num_units;
    let init = config.parameter_init;
    let clip = (config.clip_activation > 0.0).then_some(config.clip_activation);

    let cell: Box<dyn LstmCell> = match kind {
        CellKind::Basic => Box::new(basic::BasicCell::new(in_dim, units, init, vb)?),
        CellKind::Peephole => Box::new(peephole::PeepholeCell::new(
            in_dim,
            units,
            config.effective_proj(),
            config.use_peephole,
            clip,
            init,
            vb,
        )?),
        CellKind::Block => Box::new(block::BlockCell::new(
            in_dim,
            units,
            config.use_peephole,
            clip,
            init,
            vb,
        )?),
        CellKind::Fused => Box::new(fused::FusedCell::new(
            in_dim,
            units,
            config.use_peephole,
            clip,
            init,
            vb,
        )?),
        CellKind::Cudnn => Box::new(cudnn::CudnnCell::new(in_dim, units, init, vb)?),
    };
    Ok(cell)
}

struct BlstmLayer {
    fw: Box<dyn LstmCell>,
    bw: Box<dyn LstmCell>,
}

/// `num_layers` bidirectional layers of the selected cell backend.
pub struct BlstmStack {
    layers: Vec<BlstmLayer>,
}

impl std::fmt::Debug for BlstmStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlstmStack").finish_non_exhaustive()
    }
}

impl BlstmStack {
    /// Build the stack. The `lstm_impl` selector is parsed here; an
    /// unrecognized value fails with [`Error::UnknownCell`].
    pub fn new(config: &EncoderConfig, input_dim: usize, vb: VarBuilder) -> Result<Self> {
        let kind: CellKind = config.lstm_impl.parse()?;
        if config.num_layers == 0 {
            return Err(Error::Config("num_layers must be at least 1".to_string()));
        }

        let mut layers = Vec::with_capacity(config.num_layers);
        let mut in_dim = input_dim;
        for i in 0..config.num_layers {
            let vb_layer = vb.pp(format!("layer_{i}"));
            let fw = build_cell(kind, config, in_dim, vb_layer.pp("fw"))?;
            let bw = build_cell(kind, config, in_dim, vb_layer.pp("bw"))?;
            in_dim = fw.output_dim();
            layers.push(BlstmLayer { fw, bw });
        }
        Ok(Self { layers })
    }

    /// Trailing dimension of the stack output.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.fw.output_dim())
    }

    /// `xs` `[B, T, in]`, one valid length per example.
    ///
    /// Returns the merged sequence `[B, T, output_dim]` and the final
    /// state of the last layer. `keep_prob` governs the output dropout of
    /// every layer.
    pub fn forward(
        &self,
        xs: &Tensor,
        seq_lens: &[usize],
        keep_prob: f32,
    ) -> Result<(Tensor, BlstmState)> {
        let (batch, time, _) = xs.dims3()?;
        if seq_lens.len() != batch {
            return Err(Error::Config(format!(
                "expected {batch} sequence lengths, got {}",
                seq_lens.len()
            )));
        }
        let mask = sequence_mask(seq_lens, time, xs.dtype(), xs.device())?;

        let mut xs = xs.clone();
        let mut last_state = None;
        for layer in &self.layers {
            let (out_fw, state_fw) = layer.fw.run(&xs, &mask, Direction::Forward)?;
            let (out_bw, state_bw) = layer.bw.run(&xs, &mask, Direction::Backward)?;
            let merged = (out_fw + out_bw)?;
            xs = bridge::dropout(&merged, keep_prob)?;
            last_state = Some(BlstmState {
                forward: state_fw,
                backward: state_bw,
            });
        }

        let state =
            last_state.ok_or_else(|| Error::Config("empty recurrent stack".to_string()))?;
        Ok((xs, state))
    }
}
