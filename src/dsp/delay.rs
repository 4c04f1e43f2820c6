//! Delay Node
//!
//! Plain wet-only delay line. The chain routes a dry tap around it when the
//! config asks for dry and wet to be summed.

use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

/// Multi-channel delay line with a fixed maximum length
#[derive(Debug, Clone)]
pub struct DelayNode {
    /// Delay time in seconds (0 to `max_delay_seconds`)
    delay_seconds: f32,
    max_delay_seconds: f32,
    sample_rate: u32,
    /// Circular buffer per channel
    buffers: Vec<Vec<f32>>,
    /// Current write position in the circular buffers
    write_pos: usize,
}

impl DelayNode {
    /// Create a delay line able to hold up to `max_delay_seconds`
    pub fn new(delay_seconds: f32, max_delay_seconds: f32) -> Self {
        let max_delay_seconds = max_delay_seconds.max(0.0);
        Self {
            delay_seconds: delay_seconds.clamp(0.0, max_delay_seconds),
            max_delay_seconds,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE,
            buffers: Vec::new(),
            write_pos: 0,
        }
    }

    /// Set delay time in seconds, clamped to the maximum
    pub fn set_delay_seconds(&mut self, seconds: f32) {
        self.delay_seconds = seconds.clamp(0.0, self.max_delay_seconds);
    }

    pub fn delay_seconds(&self) -> f32 {
        self.delay_seconds
    }

    pub fn max_delay_seconds(&self) -> f32 {
        self.max_delay_seconds
    }

    /// Delay in whole samples at the prepared sample rate
    pub fn delay_samples(&self) -> usize {
        (self.delay_seconds * self.sample_rate as f32).round() as usize
    }

    fn buffer_len(&self) -> usize {
        (self.max_delay_seconds * self.sample_rate as f32).ceil() as usize + 1
    }
}

impl AudioNode for DelayNode {
    impl_node_common!(NodeKind::Delay);

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, input_channels: &[usize]) {
        let channels = input_channels.first().copied().unwrap_or(1);
        let resized = sample_rate != self.sample_rate
            || self.buffers.len() != channels
            || self.buffers.first().map_or(true, |b| b.len() != self.buffer_len());
        if resized {
            self.sample_rate = sample_rate;
            let len = self.buffer_len();
            self.buffers = vec![vec![0.0; len]; channels];
            self.write_pos = 0;
        }
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        let frames = input.len().min(output.len());

        let size = self.buffers.first().map_or(0, Vec::len);
        if size == 0 {
            output.copy_from(input);
            return;
        }
        let delay = self.delay_samples().min(size - 1);

        for (ch, line) in self.buffers.iter_mut().enumerate() {
            let (Some(src), Some(dst)) = (input.samples.get(ch), output.samples.get_mut(ch)) else {
                continue;
            };
            let mut pos = self.write_pos;
            for i in 0..frames {
                line[pos] = src[i];
                let read_pos = if pos >= delay {
                    pos - delay
                } else {
                    size - (delay - pos)
                };
                dst[i] = line[read_pos];
                pos = (pos + 1) % size;
            }
        }

        self.write_pos = (self.write_pos + frames) % size;
    }

    fn reset(&mut self) {
        for line in &mut self.buffers {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }
}
