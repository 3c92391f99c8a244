//! Linear bridge between the VGG front-end and the recurrent stack.
//!
//! Reduces the flattened post-pooling feature map
//! (`⌈C/4⌉ × ⌈S/4⌉ × 128` wide) to a fixed 256-unit representation, then
//! applies dropout on the way into the recurrent layers.

use candle_core::{Module, Tensor};
use candle_nn::{Init, Linear, VarBuilder};

use crate::Result;

/// Width of the bridged representation fed to the recurrent stack.
pub const BRIDGE_DIM: usize = 256;

/// Inverted dropout, active only while `keep_prob < 1`.
///
/// `keep_prob = 1` is the inference path and returns the input unchanged.
pub(crate) fn dropout(x: &Tensor, keep_prob: f32) -> Result<Tensor> {
    if keep_prob >= 1.0 {
        Ok(x.clone())
    } else {
        Ok(candle_nn::ops::dropout(x, 1.0 - keep_prob)?)
    }
}

/// Fully connected `flattened → 256` projection with ReLU.
pub struct Bridge {
    linear: Linear,
}

impl Bridge {
    pub fn new(in_dim: usize, init_scale: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (BRIDGE_DIM, in_dim),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: init_scale,
            },
        )?;
        let bias = vb.get_with_hints(BRIDGE_DIM, "bias", Init::Const(0.0))?;
        Ok(Self {
            linear: Linear::new(weight, Some(bias)),
        })
    }

    /// `[N, in_dim]` → `[N, 256]`
    pub fn forward(&self, x: &Tensor, keep_prob: f32) -> Result<Tensor> {
        let x = self.linear.forward(x)?.relu()?;
        dropout(&x, keep_prob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    #[test]
    fn bridge_output_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let bridge = Bridge::new(3840, 0.1, vb).unwrap();
        let x = Tensor::randn(0.0_f32, 1.0, (6, 3840), &device).unwrap();
        let out = bridge.forward(&x, 1.0).unwrap();
        assert_eq!(out.dims(), &[6, BRIDGE_DIM]);
    }

    #[test]
    fn bridge_output_is_non_negative() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let bridge = Bridge::new(64, 0.5, vb).unwrap();
        let x = Tensor::randn(0.0_f32, 1.0, (4, 64), &device).unwrap();
        let out = bridge.forward(&x, 1.0).unwrap();
        let min: f32 = out
            .flatten_all()
            .unwrap()
            .min(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(min >= 0.0, "ReLU output must be non-negative, got {min}");
    }

    #[test]
    fn dropout_is_identity_at_keep_one() {
        let device = Device::Cpu;
        let x = Tensor::randn(0.0_f32, 1.0, (3, 8), &device).unwrap();
        let out = dropout(&x, 1.0).unwrap();
        let diff: f32 = (&x - &out)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(diff, 0.0);
    }
}
