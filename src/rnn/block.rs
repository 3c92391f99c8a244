//! Block cell: one combined gate kernel over `[x; h]`.
//!
//! Input and hidden state are concatenated and multiplied against a single
//! `[in + units, 4·units]` kernel, so each step costs one matmul instead
//! of two. Supports peephole connections and cell clipping; no projection.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::rnn::{lstm_gate_step, uniform_init, LstmCell, LstmState, Peephole};
use crate::Result;

pub struct BlockCell {
    kernel: Tensor, // [in_dim + units, 4·units]
    bias: Tensor,   // [4·units]
    peephole: Option<Peephole>,
    cell_clip: Option<f64>,
    units: usize,
}

impl BlockCell {
    pub fn new(
        in_dim: usize,
        units: usize,
        use_peephole: bool,
        cell_clip: Option<f64>,
        init_scale: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init = uniform_init(init_scale);
        let peephole = if use_peephole {
            Some(Peephole::new(units, init_scale, vb.pp("peephole"))?)
        } else {
            None
        };
        Ok(Self {
            kernel: vb.get_with_hints((in_dim + units, 4 * units), "kernel", init)?,
            bias: vb.get_with_hints(4 * units, "bias", init)?,
            peephole,
            cell_clip,
            units,
        })
    }
}

impl LstmCell for BlockCell {
    fn output_dim(&self) -> usize {
        self.units
    }

    fn cell_dim(&self) -> usize {
        self.units
    }

    fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState> {
        let xh = Tensor::cat(&[x, &state.h], 1)?;
        let gates = xh.matmul(&self.kernel)?.broadcast_add(&self.bias)?;
        lstm_gate_step(
            &gates,
            state,
            self.peephole.as_ref(),
            self.cell_clip,
            self.units,
        )
    }
}
