//! Compressor Node
//!
//! Feed-forward dynamics compressor with a soft knee, linked channel
//! detection and smoothed attack/release. Follows the parameter set of the
//! pushed [`CompressorConfig`]: threshold and knee in dB, attack and release
//! in seconds, and a linear makeup gain.

use crate::config::CompressorConfig;
use crate::engine::buffer::{db_to_linear, DEFAULT_SAMPLE_RATE};
use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

/// Level floor used when converting silence to dB
const FLOOR_DB: f32 = -120.0;

/// Compressor stage
#[derive(Debug, Clone)]
pub struct CompressorNode {
    params: CompressorConfig,
    sample_rate: u32,
    /// Attack coefficient for gain smoothing
    attack_coeff: f32,
    /// Release coefficient for gain smoothing
    release_coeff: f32,
    /// Current smoothed gain reduction (linear, shared by all channels)
    gain_reduction: f32,
}

impl CompressorNode {
    pub fn new(params: &CompressorConfig) -> Self {
        let mut node = Self {
            params: params.clone(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain_reduction: 1.0,
        };
        node.params.clamp();
        node.update_coefficients();
        node
    }

    /// Replace the parameters; the envelope is kept
    pub fn set_params(&mut self, params: &CompressorConfig) {
        self.params = params.clone();
        self.params.clamp();
        self.update_coefficients();
    }

    pub fn params(&self) -> &CompressorConfig {
        &self.params
    }

    /// Current gain reduction in dB for metering
    pub fn gain_reduction_db(&self) -> f32 {
        linear_to_db(self.gain_reduction)
    }

    /// Update attack/release coefficients based on sample rate and time constants
    fn update_coefficients(&mut self) {
        // coeff = exp(-1 / time_in_samples)
        let attack_samples = self.params.attack * self.sample_rate as f32;
        let release_samples = self.params.release * self.sample_rate as f32;

        self.attack_coeff = if attack_samples > 0.0 {
            (-1.0 / attack_samples).exp()
        } else {
            0.0
        };
        self.release_coeff = if release_samples > 0.0 {
            (-1.0 / release_samples).exp()
        } else {
            0.0
        };
    }

    /// Gain reduction in dB (zero or negative) for an input level in dB
    fn compute_gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold;
        let ratio = self.params.ratio;
        let knee = self.params.knee;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Ratio ramps quadratically from 1:1 at the knee start
                let knee_factor = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * knee_factor * knee_factor;
                let over = input_db - knee_start;
                (knee_start + over / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }
}

impl Default for CompressorNode {
    fn default() -> Self {
        Self::new(&CompressorConfig::default())
    }
}

fn linear_to_db(linear: f32) -> f32 {
    if linear > 0.0 {
        (20.0 * linear.log10()).max(FLOOR_DB)
    } else {
        FLOOR_DB
    }
}

impl AudioNode for CompressorNode {
    impl_node_common!(NodeKind::Compressor);

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, _input_channels: &[usize]) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let output = &mut outputs[0];
        output.copy_from(&inputs[0]);

        let makeup = self.params.gain;
        for frame in 0..output.len() {
            // Linked detection: loudest channel drives every channel
            let level = output
                .samples
                .iter()
                .map(|channel| channel[frame].abs())
                .fold(0.0_f32, f32::max);

            let target = db_to_linear(self.compute_gain_reduction_db(linear_to_db(level)));
            let coeff = if target < self.gain_reduction {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain_reduction = coeff * self.gain_reduction + (1.0 - coeff) * target;

            let total_gain = self.gain_reduction * makeup;
            for channel in &mut output.samples {
                channel[frame] *= total_gain;
            }
        }
    }

    fn reset(&mut self) {
        self.gain_reduction = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use approx::assert_relative_eq;

    fn hard_knee(threshold: f32, ratio: f32) -> CompressorConfig {
        CompressorConfig {
            enabled: true,
            threshold,
            knee: 0.0,
            ratio,
            attack: 0.0,
            release: 0.0,
            gain: 1.0,
        }
    }

    fn constant_block(value: f32, len: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(len, ChannelLayout::Stereo);
        buffer.samples.iter_mut().for_each(|ch| ch.fill(value));
        buffer
    }

    fn run(node: &mut CompressorNode, input: AudioBuffer) -> AudioBuffer {
        let mut outputs = vec![AudioBuffer::new(input.len(), ChannelLayout::Stereo)];
        node.process(&[input], &mut outputs);
        outputs.remove(0)
    }

    #[test]
    fn test_params_clamped() {
        let node = CompressorNode::new(&CompressorConfig {
            ratio: 50.0,
            knee: -3.0,
            ..Default::default()
        });
        assert_eq!(node.params().ratio, 20.0);
        assert_eq!(node.params().knee, 0.0);
    }

    #[test]
    fn test_gain_computer_hard_knee() {
        let node = CompressorNode::new(&hard_knee(-20.0, 4.0));
        assert_eq!(node.compute_gain_reduction_db(-30.0), 0.0);
        // 12 dB over threshold at 4:1 leaves 3 dB over
        assert_relative_eq!(node.compute_gain_reduction_db(-8.0), -9.0, epsilon = 1e-4);
    }

    #[test]
    fn test_gain_computer_soft_knee() {
        let mut params = hard_knee(-20.0, 4.0);
        params.knee = 10.0;
        let node = CompressorNode::new(&params);
        assert_eq!(node.compute_gain_reduction_db(-26.0), 0.0);
        let in_knee = node.compute_gain_reduction_db(-20.0);
        assert!(in_knee < 0.0 && in_knee > -3.75);
        assert_relative_eq!(node.compute_gain_reduction_db(-5.0), -11.25, epsilon = 1e-4);
    }

    #[test]
    fn test_process_below_threshold_is_transparent() {
        let mut node = CompressorNode::new(&hard_knee(-6.0, 4.0));
        let out = run(&mut node, constant_block(0.1, 64));
        assert_relative_eq!(out.channel(0)[63], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_process_above_threshold_reduces() {
        let mut node = CompressorNode::new(&hard_knee(-20.0, 4.0));
        let out = run(&mut node, constant_block(1.0, 64));
        // 0 dB in, -15 dB out
        assert_relative_eq!(out.channel(1)[63], db_to_linear(-15.0), epsilon = 1e-4);
        assert_relative_eq!(node.gain_reduction_db(), -15.0, epsilon = 1e-3);
    }

    #[test]
    fn test_makeup_gain_is_linear() {
        let mut params = hard_knee(0.0, 1.0);
        params.gain = 2.0;
        let mut node = CompressorNode::new(&params);
        let out = run(&mut node, constant_block(0.25, 8));
        assert_relative_eq!(out.channel(0)[7], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_attack_smooths_reduction() {
        let mut params = hard_knee(-20.0, 4.0);
        params.attack = 0.01;
        let mut node = CompressorNode::new(&params);
        node.prepare(48000, 128, &[2]);
        let out = run(&mut node, constant_block(1.0, 4));
        assert!(out.channel(0)[0] > db_to_linear(-15.0));
        node.reset();
        assert_eq!(node.gain_reduction_db(), 0.0);
    }
}
