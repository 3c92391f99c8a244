//! Plain cell: standard i/f/g/o gates, no peephole connections.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::rnn::{lstm_gate_step, uniform_init, LstmCell, LstmState};
use crate::Result;

/// Standard cell with separate input and recurrent kernels.
pub struct BasicCell {
    w_ih: Tensor, // [in_dim, 4·units]
    w_hh: Tensor, // [units, 4·units]
    bias: Tensor, // [4·units]
    units: usize,
}

impl BasicCell {
    pub fn new(in_dim: usize, units: usize, init_scale: f64, vb: VarBuilder) -> Result<Self> {
        let init = uniform_init(init_scale);
        Ok(Self {
            w_ih: vb.get_with_hints((in_dim, 4 * units), "w_ih", init)?,
            w_hh: vb.get_with_hints((units, 4 * units), "w_hh", init)?,
            bias: vb.get_with_hints(4 * units, "bias", init)?,
            units,
        })
    }
}

impl LstmCell for BasicCell {
    fn output_dim(&self) -> usize {
        self.units
    }

    fn cell_dim(&self) -> usize {
        self.units
    }

    fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState> {
        let gates = x
            .matmul(&self.w_ih)?
            .add(&state.h.matmul(&self.w_hh)?)?
            .broadcast_add(&self.bias)?;
        lstm_gate_step(&gates, state, None, None, self.units)
    }
}
