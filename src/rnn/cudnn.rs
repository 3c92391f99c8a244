//! Packed-parameter cell.
//!
//! Every parameter lives in one flat buffer — the input-side gate kernels,
//! then the recurrent kernels, then the gate biases — the layout
//! hardware-accelerated RNN kernels consume in a single opaque region.
//! The buffer is uniform-initialized directly from the configured scale.
//!
//! Peephole connections, cell clipping, and projection are not supported
//! by this backend.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::rnn::{lstm_gate_step, uniform_init, LstmCell, LstmState};
use crate::Result;

pub struct CudnnCell {
    w_x: Tensor,  // [in_dim, 4·units] view into the packed buffer
    w_h: Tensor,  // [units, 4·units] view
    bias: Tensor, // [4·units] view
    units: usize,
}

impl CudnnCell {
    pub fn new(in_dim: usize, units: usize, init_scale: f64, vb: VarBuilder) -> Result<Self> {
        let gate_width = 4 * units;
        let span = (in_dim + units + 1) * gate_width;
        let packed = vb.get_with_hints(span, "packed", uniform_init(init_scale))?;

        let w_x = packed
            .narrow(0, 0, in_dim * gate_width)?
            .reshape((in_dim, gate_width))?;
        let w_h = packed
            .narrow(0, in_dim * gate_width, units * gate_width)?
            .reshape((units, gate_width))?;
        let bias = packed.narrow(0, (in_dim + units) * gate_width, gate_width)?;

        Ok(Self {
            w_x,
            w_h,
            bias,
            units,
        })
    }
}

impl LstmCell for CudnnCell {
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
        lstm_gate_step(&gates, state, None, None, self.units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rnn::Direction;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn packed_buffer_holds_every_parameter() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _cell = CudnnCell::new(6, 8, 0.1, vb).unwrap();

        let vars = varmap.all_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].elem_count(), (6 + 8 + 1) * 4 * 8);
    }

    #[test]
    fn run_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = CudnnCell::new(4, 6, 0.1, vb).unwrap();

        let xs = Tensor::randn(0.0_f32, 1.0, (2, 5, 4), &device).unwrap();
        let mask = Tensor::ones((2, 5), DType::F32, &device).unwrap();
        let (out, last) = cell.run(&xs, &mask, Direction::Backward).unwrap();
        assert_eq!(out.dims(), &[2, 5, 6]);
        assert_eq!(last.h.dims(), &[2, 6]);
    }
}
