//! End-to-end VGG+BLSTM encoder.
//!
//! Assembles the convolutional front-end, the 256-wide bridge, and the
//! stacked bidirectional recurrence into a single callable object. The
//! forward pass takes the feature batch, per-example sequence lengths,
//! and a dropout keep probability, and returns the encoded sequence plus
//! the final recurrent state.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use tracing::debug;

use crate::bridge::{Bridge, BRIDGE_DIM};
use crate::config::EncoderConfig;
use crate::rnn::{BlstmStack, BlstmState};
use crate::vgg::VggFrontend;
use crate::{Error, Result};

pub struct VggBlstmEncoder {
    config: EncoderConfig,
    vgg: VggFrontend,
    bridge: Bridge,
    rnn: BlstmStack,
}

impl std::fmt::Debug for VggBlstmEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VggBlstmEncoder").finish_non_exhaustive()
    }
}

impl VggBlstmEncoder {
    /// Build the encoder under the `config.name` weight prefix.
    ///
    /// Fails when `input_size` is not a multiple of 3, when `num_proj` is
    /// zero, or when `lstm_impl` is not one of the five recognized
    /// backends.
    pub fn new(config: EncoderConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let vb = vb.pp(&config.name);

        let vgg = VggFrontend::new(config.parameter_init, vb.clone())?;
        let bridge_in = VggFrontend::output_dim(config.num_channels(), config.splice);
        let bridge = Bridge::new(bridge_in, config.parameter_init, vb.pp("bridge"))?;
        let rnn = BlstmStack::new(&config, BRIDGE_DIM, vb.pp("rnn"))?;

        debug!(
            lstm_impl = %config.lstm_impl,
            num_layers = config.num_layers,
            output_dim = config.output_dim(),
            "built VGG+BLSTM encoder"
        );
        Ok(Self {
            config,
            vgg,
            bridge,
            rnn,
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Trailing dimension of the encoded sequence.
    pub fn output_dim(&self) -> usize {
        self.config.output_dim()
    }

    /// Encode a feature batch.
    ///
    /// - `inputs`: `[B, T, num_channels × splice × 3]`
    /// - `seq_lens`: one valid length per example
    /// - `keep_prob`: dropout keep probability in `(0, 1]`; 1 disables
    ///   dropout (inference)
    ///
    /// Returns `([B, T, output_dim], final_state)`, with the first two
    /// output axes swapped when `time_major` is set.
    pub fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep_prob: f32,
    ) -> Result<(Tensor, BlstmState)> {
        if !(0.0..=1.0).contains(&keep_prob) || keep_prob == 0.0 {
            return Err(Error::Config(format!(
                "keep_prob must be in (0, 1], got {keep_prob}"
            )));
        }

        let (batch, time, feat) = inputs.dims3()?;
        let channels = self.config.num_channels();
        let splice = self.config.splice;
        let expected = channels * splice * 3;
        if feat != expected {
            return Err(Error::Config(format!(
                "input feature width {feat} does not match \
                 num_channels × splice × 3 = {expected}"
            )));
        }

        // [B, T, C·S·3] → [B·T, C, S, 3] → [B·T, 3, C, S]
        let x = inputs
            .reshape((batch * time, channels, splice, 3))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;

        let x = self.vgg.forward(&x)?;
        debug!(shape = ?x.dims(), "vgg feature map");

        let x = x.flatten_from(1)?;
        let x = self.bridge.forward(&x, keep_prob)?;
        let x = x.reshape((batch, time, BRIDGE_DIM))?;
        debug!(shape = ?x.dims(), "bridged sequence");

        let (outputs, final_state) = self.rnn.forward(&x, seq_lens, keep_prob)?;
        let outputs = if self.config.time_major {
            outputs.transpose(0, 1)?.contiguous()?
        } else {
            outputs
        };
        Ok((outputs, final_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellKind;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    fn small_config() -> EncoderConfig {
        EncoderConfig {
            input_size: 12, // 4 channels × 3
            splice: 5,
            num_units: 12,
            num_proj: 6,
            num_layers: 2,
            lstm_impl: "basic".to_string(),
            parameter_init: 0.1,
            clip_activation: 50.0,
            ..Default::default()
        }
    }

    fn feature_batch(config: &EncoderConfig, batch: usize, time: usize, device: &Device) -> Tensor {
        let feat = config.num_channels() * config.splice * 3;
        Tensor::randn(0.0_f32, 1.0, (batch, time, feat), device).unwrap()
    }

    #[test]
    fn construction_rejects_bad_input_size() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            input_size: 13,
            ..small_config()
        };
        let err = VggBlstmEncoder::new(config, vb).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn construction_rejects_zero_projection() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            num_proj: 0,
            ..small_config()
        };
        assert!(VggBlstmEncoder::new(config, vb).is_err());
    }

    #[test]
    fn construction_rejects_unknown_backend() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            lstm_impl: "bidirectional-gru".to_string(),
            ..small_config()
        };
        let err = VggBlstmEncoder::new(config, vb).unwrap_err();
        assert!(matches!(err, Error::UnknownCell { .. }), "got {err:?}");
    }

    #[test]
    fn every_backend_encodes_to_its_output_width() {
        let device = Device::Cpu;
        for name in CellKind::NAMES {
            let (_varmap, vb) = make_vb(&device);
            let config = EncoderConfig {
                lstm_impl: name.to_string(),
                ..small_config()
            };
            let expected = config.output_dim();
            let inputs = feature_batch(&config, 2, 4, &device);
            let encoder = VggBlstmEncoder::new(config, vb).unwrap();

            let (out, state) = encoder.forward(&inputs, &[4, 2], 1.0).unwrap();
            assert_eq!(out.dims(), &[2, 4, expected], "{name}");
            assert_eq!(state.forward.h.dims(), &[2, expected], "{name}");
        }
    }

    #[test]
    fn projection_width_applies_only_to_peephole_backend() {
        let device = Device::Cpu;

        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            lstm_impl: "peephole".to_string(),
            ..small_config()
        };
        let inputs = feature_batch(&config, 1, 3, &device);
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();
        let (out, _) = encoder.forward(&inputs, &[3], 1.0).unwrap();
        assert_eq!(out.dim(2).unwrap(), 6);

        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            lstm_impl: "block".to_string(),
            ..small_config()
        };
        let inputs = feature_batch(&config, 1, 3, &device);
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();
        let (out, _) = encoder.forward(&inputs, &[3], 1.0).unwrap();
        assert_eq!(out.dim(2).unwrap(), 12);
    }

    #[test]
    fn time_major_swaps_leading_axes() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = EncoderConfig {
            time_major: true,
            ..small_config()
        };
        let inputs = feature_batch(&config, 3, 5, &device);
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();
        let (out, _) = encoder.forward(&inputs, &[5, 5, 1], 1.0).unwrap();
        assert_eq!(out.dims(), &[5, 3, 12]);
    }

    #[test]
    fn forward_rejects_wrong_feature_width() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = small_config();
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();

        let inputs = Tensor::randn(0.0_f32, 1.0, (2, 4, 61), &device).unwrap();
        assert!(encoder.forward(&inputs, &[4, 4], 1.0).is_err());
    }

    #[test]
    fn forward_rejects_bad_keep_prob() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = small_config();
        let inputs = feature_batch(&config, 1, 2, &device);
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();
        assert!(encoder.forward(&inputs, &[2], 0.0).is_err());
        assert!(encoder.forward(&inputs, &[2], 1.5).is_err());
    }

    #[test]
    fn dropout_active_during_training_pass() {
        let device = Device::Cpu;
        let (_varmap, vb) = make_vb(&device);
        let config = small_config();
        let inputs = feature_batch(&config, 1, 3, &device);
        let encoder = VggBlstmEncoder::new(config, vb).unwrap();

        // Forward must succeed with dropout enabled; shapes are unchanged.
        let (out, _) = encoder.forward(&inputs, &[3], 0.5).unwrap();
        assert_eq!(out.dims(), &[1, 3, 12]);
    }
}
