//! Audio Buffer Management
//!
//! Planar block buffers shared by every graph node, plus the level helpers
//! used for silence detection and CLI statistics.

use crate::error::{Result, TabFxError};

// ============================================================================
// Constants
// ============================================================================

/// Default sample rate for sessions (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default render quantum in frames
pub const DEFAULT_BLOCK_SIZE: usize = 128;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Calculate the RMS (Root Mean Square) level of an audio buffer in dB
///
/// Returns -f32::INFINITY for empty or silent buffers.
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total_samples = buffer.channels() * buffer.len();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

/// Calculate the peak level of an audio buffer in dB
pub fn calculate_peak(buffer: &AudioBuffer) -> f32 {
    linear_to_db(buffer.peak())
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Block of non-interleaved 32-bit float audio
///
/// Every node in the graph reads and writes these. Buffers are sized once
/// when the render plan is compiled and then reused block after block, so
/// the methods used from the render path (`fill_silence`, `mix_from`,
/// `copy_from`) never allocate.
///
/// # Example
/// ```
/// use tabfx::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(128, ChannelLayout::Stereo);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 128);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a zeroed buffer with the given layout at the default rate
    pub fn new(num_samples: usize, layout: ChannelLayout) -> Self {
        Self::with_channels(layout.num_channels(), num_samples, DEFAULT_SAMPLE_RATE)
    }

    /// Create a zeroed buffer with an arbitrary channel count
    pub fn with_channels(channels: usize, num_samples: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; channels],
            sample_rate,
        }
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// Returns an error if the data length doesn't match the channel count.
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(TabFxError::invalid(
                "interleaved",
                interleaved.len(),
                "a multiple of the channel count",
            ));
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ...)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.channels() * self.len());
        for sample_idx in 0..self.len() {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the channel layout if it is mono or stereo
    pub fn channel_layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_count(self.channels())
    }

    /// Immutable access to one channel
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Mutable access to one channel
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Reshape the buffer. Allocates; only call from the control context.
    pub fn resize(&mut self, channels: usize, num_samples: usize) {
        self.samples.resize_with(channels, Vec::new);
        for channel in &mut self.samples {
            channel.resize(num_samples, 0.0);
        }
    }

    /// Zero every sample
    pub fn fill_silence(&mut self) {
        for channel in &mut self.samples {
            channel.fill(0.0);
        }
    }

    /// Add `src` into this buffer, up- or down-mixing between channel counts
    ///
    /// Mono to many copies the mono signal into every channel, stereo to mono
    /// averages left and right (speaker mixing rules). Other mismatches add
    /// channel-by-channel and drop the remainder.
    pub fn mix_from(&mut self, src: &AudioBuffer) {
        let frames = self.len().min(src.len());
        let (dst_ch, src_ch) = (self.channels(), src.channels());

        if src_ch == 0 || dst_ch == 0 {
            return;
        }

        if src_ch == dst_ch {
            for (dst, src) in self.samples.iter_mut().zip(&src.samples) {
                for i in 0..frames {
                    dst[i] += src[i];
                }
            }
        } else if src_ch == 1 {
            let mono = &src.samples[0];
            for dst in &mut self.samples {
                for i in 0..frames {
                    dst[i] += mono[i];
                }
            }
        } else if dst_ch == 1 && src_ch == 2 {
            let dst = &mut self.samples[0];
            for i in 0..frames {
                dst[i] += 0.5 * (src.samples[0][i] + src.samples[1][i]);
            }
        } else {
            for (dst, src) in self.samples.iter_mut().zip(&src.samples) {
                for i in 0..frames {
                    dst[i] += src[i];
                }
            }
        }
    }

    /// Overwrite this buffer with `src`, using the same mixing rules as [`mix_from`]
    ///
    /// [`mix_from`]: AudioBuffer::mix_from
    pub fn copy_from(&mut self, src: &AudioBuffer) {
        self.fill_silence();
        self.mix_from(src);
    }

    /// Absolute peak across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// True when no sample reaches `threshold` in magnitude
    pub fn is_silent(&self, threshold: f32) -> bool {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .all(|&s| s.abs() < threshold)
    }

    /// Check that every sample is finite (no NaN or Inf)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .all(|s| s.is_finite())
    }
}
