//! Channel routing nodes used by the dual-chain topology

use std::f32::consts::FRAC_PI_2;

use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, ChannelMode, NodeKind};
use crate::impl_node_common;

// ============================================================================
// Splitter
// ============================================================================

/// Splits a stereo signal into two mono outputs (left, right)
///
/// The input is forced to two channels, so a mono source is duplicated onto
/// both outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelSplitter;

impl AudioNode for ChannelSplitter {
    impl_node_common!(NodeKind::Splitter);

    fn num_outputs(&self) -> usize {
        2
    }

    fn input_mode(&self, _input: usize) -> ChannelMode {
        ChannelMode::Explicit(2)
    }

    fn output_channels(&self, _input_channels: &[usize], _output: usize) -> usize {
        1
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let input = &inputs[0];
        for (channel, output) in outputs.iter_mut().enumerate() {
            match input.samples.get(channel) {
                Some(src) => output.channel_mut(0).copy_from_slice(src),
                None => output.fill_silence(),
            }
        }
    }
}

// ============================================================================
// Merger
// ============================================================================

/// Merges two mono inputs into one stereo output
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMerger;

impl AudioNode for ChannelMerger {
    impl_node_common!(NodeKind::Merger);

    fn num_inputs(&self) -> usize {
        2
    }

    fn input_mode(&self, _input: usize) -> ChannelMode {
        ChannelMode::Explicit(1)
    }

    fn output_channels(&self, _input_channels: &[usize], _output: usize) -> usize {
        2
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let output = &mut outputs[0];
        for (channel, input) in inputs.iter().enumerate() {
            output.channel_mut(channel).copy_from_slice(input.channel(0));
        }
    }
}

// ============================================================================
// Stereo Panner
// ============================================================================

/// Equal-power stereo panner
///
/// Mono input is placed in the stereo field; stereo input keeps both channels
/// and shifts energy toward one side.
#[derive(Debug, Clone, Copy)]
pub struct StereoPanner {
    pan: f32,
    input_channels: usize,
}

impl StereoPanner {
    /// Create a panner, `pan` clamped to -1 (left) ..= 1 (right)
    pub fn new(pan: f32) -> Self {
        Self {
            pan: pan.clamp(-1.0, 1.0),
            input_channels: 2,
        }
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Left and right gains for the current position
    fn gains(&self) -> (f32, f32) {
        let x = if self.input_channels == 1 {
            (self.pan + 1.0) / 2.0
        } else if self.pan <= 0.0 {
            self.pan + 1.0
        } else {
            self.pan
        };
        ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin())
    }
}

impl Default for StereoPanner {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AudioNode for StereoPanner {
    impl_node_common!(NodeKind::Panner);

    fn output_channels(&self, _input_channels: &[usize], _output: usize) -> usize {
        2
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize, input_channels: &[usize]) {
        self.input_channels = input_channels.first().copied().unwrap_or(1).min(2);
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        let (gain_l, gain_r) = self.gains();
        let frames = input.len().min(output.len());

        if input.channels() == 1 {
            let mono = input.channel(0);
            for i in 0..frames {
                output.samples[0][i] = mono[i] * gain_l;
                output.samples[1][i] = mono[i] * gain_r;
            }
            return;
        }

        let (left, right) = (input.channel(0), input.channel(1));
        for i in 0..frames {
            let (l, r) = if self.pan <= 0.0 {
                (left[i] + right[i] * gain_l, right[i] * gain_r)
            } else {
                (left[i] * gain_l, right[i] + left[i] * gain_r)
            };
            output.samples[0][i] = l;
            output.samples[1][i] = r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_1_SQRT_2;
    use test_case::test_case;

    fn block(channels: usize, values: &[f32]) -> AudioBuffer {
        let mut buffer = AudioBuffer::with_channels(channels, 4, 48000);
        for (ch, &value) in values.iter().enumerate() {
            buffer.channel_mut(ch).fill(value);
        }
        buffer
    }

    fn pan(position: f32, input: AudioBuffer) -> (f32, f32) {
        let mut panner = StereoPanner::new(position);
        panner.prepare(48000, 4, &[input.channels()]);
        let mut outputs = vec![block(2, &[])];
        panner.process(&[input], &mut outputs);
        (outputs[0].channel(0)[0], outputs[0].channel(1)[0])
    }

    #[test]
    fn test_splitter_and_merger() {
        let mut splitter = ChannelSplitter;
        let mut split = vec![block(1, &[]), block(1, &[])];
        splitter.process(&[block(2, &[0.25, 0.75])], &mut split);
        assert_eq!(split[0].channel(0)[0], 0.25);
        assert_eq!(split[1].channel(0)[0], 0.75);

        let mut merger = ChannelMerger;
        let mut merged = vec![block(2, &[])];
        merger.process(&split, &mut merged);
        assert_eq!(merged[0].channel(0), &[0.25; 4]);
        assert_eq!(merged[0].channel(1), &[0.75; 4]);
    }

    #[test_case(-1.0, 1.0, 0.0 ; "hard left")]
    #[test_case(0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2 ; "center")]
    #[test_case(1.0, 0.0, 1.0 ; "hard right")]
    fn test_mono_equal_power(position: f32, left: f32, right: f32) {
        let (l, r) = pan(position, block(1, &[1.0]));
        assert_relative_eq!(l, left, epsilon = 1e-6);
        assert_relative_eq!(r, right, epsilon = 1e-6);
    }

    #[test]
    fn test_stereo_center_is_transparent() {
        let (l, r) = pan(0.0, block(2, &[0.3, 0.6]));
        assert_relative_eq!(l, 0.3, epsilon = 1e-6);
        assert_relative_eq!(r, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_stereo_pan_right_moves_left_energy() {
        let (l, r) = pan(0.5, block(2, &[1.0, 0.0]));
        assert_relative_eq!(l, FRAC_1_SQRT_2, epsilon = 1e-6);
        assert_relative_eq!(r, FRAC_1_SQRT_2, epsilon = 1e-6);

        let (l, r) = pan(1.0, block(2, &[1.0, 1.0]));
        assert_relative_eq!(l, 0.0, epsilon = 1e-6);
        assert_relative_eq!(r, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pan_clamped() {
        assert_eq!(StereoPanner::new(3.0).pan(), 1.0);
    }
}
