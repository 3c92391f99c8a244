//! Convolutional front-end: a small VGG-style stack.
//!
//! Two sequential stages, each two 3×3 convolutions (stride 1, padding 1)
//! with ReLU, followed by batch normalization and a 2×2 max pool:
//!
//! ```text
//! [N, 3, C, S] ─→ Conv3×3(3→64)  + ReLU ─→ Conv3×3(64→64)   + ReLU
//!              ─→ BatchNorm ─→ MaxPool2×2          [N, 64, ⌈C/2⌉, ⌈S/2⌉]
//!              ─→ Conv3×3(64→128) + ReLU ─→ Conv3×3(128→128) + ReLU
//!              ─→ BatchNorm ─→ MaxPool2×2          [N, 128, ⌈C/4⌉, ⌈S/4⌉]
//! ```
//!
//! `N = batch × time`, `C = num_channels`, `S = splice`. Pooling uses
//! ceiling semantics: odd spatial dims are edge-padded to even before the
//! stride-2 pool, so the net reduction per axis is `⌈d / 4⌉`.
//!
//! Batch normalization always uses the statistics of the current batch.

use candle_core::{Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Init, VarBuilder};

use crate::Result;

/// Channel depth after the first stage.
const STAGE1_CHANNELS: usize = 64;
/// Channel depth after the second stage.
const STAGE2_CHANNELS: usize = 128;

/// 3×3 convolution, stride 1, padding 1, normal-initialized weights.
fn conv3x3(in_c: usize, out_c: usize, init_scale: f64, vb: VarBuilder) -> Result<Conv2d> {
    let weight = vb.get_with_hints(
        (out_c, in_c, 3, 3),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: init_scale,
        },
    )?;
    let bias = vb.get_with_hints(out_c, "bias", Init::Const(0.0))?;
    let config = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    Ok(Conv2d::new(weight, Some(bias), config))
}

/// Batch normalization over `[N, C, H, W]` using current-batch statistics.
struct BatchNorm2d {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl BatchNorm2d {
    fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(channels, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(channels, "bias", Init::Const(0.0))?;
        Ok(Self {
            weight,
            bias,
            eps: 1e-5,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // Per-channel statistics over batch and both spatial axes.
        let mean = x.mean_keepdim((0, 2, 3))?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim((0, 2, 3))?;
        let std = (var + self.eps)?.sqrt()?;
        let normed = centered.broadcast_div(&std)?;

        let w = self.weight.reshape((1, (), 1, 1))?;
        let b = self.bias.reshape((1, (), 1, 1))?;
        Ok(normed.broadcast_mul(&w)?.broadcast_add(&b)?)
    }
}

/// 2×2/stride-2 max pool with ceiling semantics.
///
/// Odd dims are edge-padded first; replicating the edge value leaves the
/// window max unchanged, which matches pooling over the valid region only.
fn max_pool_ceil(x: &Tensor) -> Result<Tensor> {
    let (_n, _c, h, w) = x.dims4()?;
    let mut x = x.clone();
    if h % 2 == 1 {
        x = x.pad_with_same(2, 0, 1)?;
    }
    if w % 2 == 1 {
        x = x.pad_with_same(3, 0, 1)?;
    }
    Ok(x.max_pool2d(2)?)
}

/// One VGG stage: two convolutions, batch norm, max pool.
struct VggStage {
    conv1: Conv2d,
    conv2: Conv2d,
    norm: BatchNorm2d,
}

impl VggStage {
    fn new(in_c: usize, out_c: usize, init_scale: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: conv3x3(in_c, out_c, init_scale, vb.pp("conv1"))?,
            conv2: conv3x3(out_c, out_c, init_scale, vb.pp("conv2"))?,
            norm: BatchNorm2d::new(out_c, vb.pp("norm"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv1.forward(x)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        let x = self.norm.forward(&x)?;
        max_pool_ceil(&x)
    }
}

/// The full two-stage convolutional front-end.
pub struct VggFrontend {
    stage1: VggStage,
    stage2: VggStage,
}

impl VggFrontend {
    pub fn new(init_scale: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            stage1: VggStage::new(3, STAGE1_CHANNELS, init_scale, vb.pp("vgg1"))?,
            stage2: VggStage::new(STAGE1_CHANNELS, STAGE2_CHANNELS, init_scale, vb.pp("vgg2"))?,
        })
    }

    /// Flattened feature width after both stages for the given input dims:
    /// `⌈num_channels / 4⌉ × ⌈splice / 4⌉ × 128`.
    pub fn output_dim(num_channels: usize, splice: usize) -> usize {
        num_channels.div_ceil(4) * splice.div_ceil(4) * STAGE2_CHANNELS
    }

    /// `[N, 3, C, S]` → `[N, 128, ⌈C/4⌉, ⌈S/4⌉]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.stage1.forward(x)?;
        self.stage2.forward(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    #[test]
    fn frontend_output_shape() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let vgg = VggFrontend::new(0.1, vb).unwrap();

        // 40 channels, splice 11 → spatial dims 10 × 3
        let x = Tensor::randn(0.0_f32, 1.0, (4, 3, 40, 11), &device).unwrap();
        let out = vgg.forward(&x).unwrap();
        assert_eq!(out.dims(), &[4, 128, 10, 3]);
    }

    #[test]
    fn frontend_ceil_division_on_odd_dims() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let vgg = VggFrontend::new(0.1, vb).unwrap();

        // 41 channels → ⌈41/2⌉=21 → ⌈21/2⌉=11; splice 5 → 3 → 2
        let x = Tensor::randn(0.0_f32, 1.0, (2, 3, 41, 5), &device).unwrap();
        let out = vgg.forward(&x).unwrap();
        assert_eq!(out.dims(), &[2, 128, 11, 2]);
    }

    #[test]
    fn output_dim_matches_forward() {
        let device = Device::Cpu;
        for (channels, splice) in [(40usize, 11usize), (41, 11), (39, 5), (80, 3)] {
            let (_varmap, vb) = make_vb(&device);
            let vgg = VggFrontend::new(0.1, vb).unwrap();
            let x = Tensor::randn(0.0_f32, 1.0, (2, 3, channels, splice), &device).unwrap();
            let out = vgg.forward(&x).unwrap();
            let flat = out.flatten_from(1).unwrap();
            assert_eq!(
                flat.dim(1).unwrap(),
                VggFrontend::output_dim(channels, splice),
                "channels={channels} splice={splice}"
            );
        }
    }

    #[test]
    fn batch_norm_normalizes_per_channel() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let norm = BatchNorm2d::new(4, vb).unwrap();

        let x = Tensor::randn(3.0_f32, 2.0, (8, 4, 6, 6), &device).unwrap();
        let out = norm.forward(&x).unwrap();

        // With weight=1 and bias=0 the per-channel mean is ~0 and var ~1.
        let mean = out.mean_keepdim((0, 2, 3)).unwrap();
        let mean_abs_max: f32 = mean
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(mean_abs_max < 1e-4, "mean {mean_abs_max}");

        let var = out
            .sqr()
            .unwrap()
            .mean_keepdim((0, 2, 3))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        for v in var {
            assert!((v - 1.0).abs() < 1e-2, "var {v}");
        }
    }

    #[test]
    fn max_pool_ceil_keeps_edge_column() {
        let device = Device::Cpu;
        // 1×1×2×3 input; the odd width forces an edge pad on the last axis.
        let x = Tensor::from_vec(
            vec![1.0_f32, 2.0, 7.0, 3.0, 4.0, 5.0],
            (1, 1, 2, 3),
            &device,
        )
        .unwrap();
        let out = max_pool_ceil(&x).unwrap();
        assert_eq!(out.dims(), &[1, 1, 1, 2]);
        let values = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        // First window max(1,2,3,4)=4, edge window max(7,5)=7.
        assert_eq!(values, vec![4.0, 7.0]);
    }
}
