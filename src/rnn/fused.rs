//! Block-fused cell: whole-sequence input projection.
//!
//! Same packed `[in + units, 4·units]` kernel as the block cell, but the
//! input half of the gate pre-activations is computed for every timestep
//! in one batched matmul before the scan; the per-step loop is left with
//! only the recurrent matmul. Numerically identical to the block cell.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::rnn::{
    lstm_gate_step, masked_scan, uniform_init, Direction, LstmCell, LstmState, Peephole,
};
use crate::Result;

pub struct FusedCell {
    w_x: Tensor, // [in_dim, 4·units] — input rows of the packed kernel
    w_h: Tensor, // [units, 4·units] — recurrent rows
    bias: Tensor,
    peephole: Option<Peephole>,
    cell_clip: Option<f64>,
    units: usize,
}

impl FusedCell {
    pub fn new(
        in_dim: usize,
        units: usize,
        use_peephole: bool,
        cell_clip: Option<f64>,
        init_scale: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init = uniform_init(init_scale);
        let kernel = vb.get_with_hints((in_dim + units, 4 * units), "kernel", init)?;
        let w_x = kernel.narrow(0, 0, in_dim)?;
        let w_h = kernel.narrow(0, in_dim, units)?;
        let peephole = if use_peephole {
            Some(Peephole::new(units, init_scale, vb.pp("peephole"))?)
        } else {
            None
        };
        Ok(Self {
            w_x,
            w_h,
            bias: vb.get_with_hints(4 * units, "bias", init)?,
            peephole,
            cell_clip,
            units,
        })
    }
}

impl LstmCell for FusedCell {
    fn output_dim(&self) -> usize {
        self.units
    }

    fn cell_dim(&self) -> usize {
        self.units
    }

    fn step(&self, x: &Tensor, state: &LstmState) -> Result<LstmState> {
        let gates = x
            .matmul(&self.w_x)?
            .add(&state.h.matmul(&self.w_h)?)?
            .broadcast_add(&self.bias)?;
        lstm_gate_step(
            &gates,
            state,
            self.peephole.as_ref(),
            self.cell_clip,
            self.units,
        )
    }

    fn run(&self, xs: &Tensor, mask: &Tensor, direction: Direction) -> Result<(Tensor, LstmState)> {
        let (batch, time, in_dim) = xs.dims3()?;
        let x_proj = xs
            .contiguous()?
            .reshape((batch * time, in_dim))?
            .matmul(&self.w_x)?
            .reshape((batch, time, 4 * self.units))?;

        let zero = self.zero_state(batch, xs.dtype(), xs.device())?;
        masked_scan(time, zero, mask, direction, |t, state| {
            let gates = x_proj
                .narrow(1, t, 1)?
                .squeeze(1)?
                .add(&state.h.matmul(&self.w_h)?)?
                .broadcast_add(&self.bias)?;
            lstm_gate_step(
                &gates,
                state,
                self.peephole.as_ref(),
                self.cell_clip,
                self.units,
            )
        })
    }
}
