//! Peephole-capable cell with cell clipping and optional projection.
//!
//! The only backend that honors a projection width: when configured, the
//! hidden state is projected down after the gate arithmetic, and the
//! recurrent kernel operates on the projected width.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::rnn::{lstm_gate_step, uniform_init, LstmCell, LstmState, Peephole};
use crate::Result;

pub struct PeepholeCell {
    w_ih: Tensor,  // [in_dim, 4·units]
    w_hh: Tensor,  // [out_dim, 4·units]
    bias: Tensor,  // [4·units]
    peephole: Option<Peephole>,
    w_proj: Option<Tensor>, // [units, proj]
    cell_clip: Option<f64>,
    units: usize,
    out_dim: usize,
}

impl PeepholeCell {
    pub fn new(
        in_dim: usize,
        units: usize,
        proj: Option<usize>,
        use_peephole: bool,
        cell_clip: Option<f64>,
        init_scale: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init = uniform_init(init_scale);
        let out_dim = proj.unwrap_or(units);

        let peephole = if use_peephole {
            Some(Peephole::new(units, init_scale, vb.pp("peephole"))?)
        } else {
            None
        };
        let w_proj = match proj {
            Some(p) => Some(vb.get_with_hints((units, p), "w_proj", init)?),
            None => None,
        };

        Ok(Self {
            w_ih: vb.get_with_hints((in_dim, 4 * units), "w_ih", init)?,
            w_hh: vb.get_with_hints((out_dim, 4 * units), "w_hh", init)?,
            bias: vb.get_with_hints(4 * units, "bias", init)?,
            peephole,
            w_proj,
            cell_clip,
            units,
            out_dim,
        })
    }
}

impl LstmCell for PeepholeCell {
    fn output_dim(&self) -> usize {
        self.out_dim
    }

    fn cell_dim(&self) -> usize {
        self.units
    }

    fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState> {
        let gates = x
            .matmul(&self.w_ih)?
            .add(&state.h.matmul(&self.w_hh)?)?
            .broadcast_add(&self.bias)?;
        let inner = lstm_gate_step(
            &gates,
            state,
            self.peephole.as_ref(),
            self.cell_clip,
            self.units,
        )?;

        let h = match &self.w_proj {
            Some(w) => inner.h.matmul(w)?,
            None => inner.h,
        };
        Ok(LstmState { h, c: inner.c })
    }
}
