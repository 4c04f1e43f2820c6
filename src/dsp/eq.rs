//! Graphic Equalizer
//!
//! One biquad node per band, kept in a pool indexed by band so a config push
//! reuses the stages it already has.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EqualizerConfig;
use crate::engine::AudioBuffer;
use crate::graph::{AudioGraph, AudioNode, NodeId, NodeKind};
use crate::impl_node_common;

/// Center frequency of band 0
pub const BASE_FREQUENCY: f32 = 31.25;

/// Q of a ten-band equalizer; scales with the band count
pub const BASE_Q: f32 = 1.41;

/// Filter type for a biquad stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Bell curve boost/cut
    #[default]
    Peak,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::UNITY
    }
}

impl BiquadCoeffs {
    const UNITY: BiquadCoeffs = BiquadCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Calculate biquad coefficients using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        // Clamp frequency to valid range (below Nyquist)
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        // Amplitude for peak and shelf filters
        let a = (10.0_f64).powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
        };

        // Normalize by a0
        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Biquad filter state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64, // x[n-1]
    x2: f64, // x[n-2]
    y1: f64, // y[n-1]
    y2: f64, // y[n-2]
}

impl BiquadState {
    /// Direct Form I
    #[inline]
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

// ============================================================================
// Band Layout
// ============================================================================

/// Center frequency of band `index` in a `band_count`-band equalizer
///
/// Bands are spaced `1 / round(band_count / 10)` octaves apart from 31.25 Hz.
pub fn band_frequency(index: usize, band_count: usize) -> f32 {
    let bands_per_octave = (band_count as f32 / 10.0).round().max(1.0);
    BASE_FREQUENCY * 2.0_f32.powf(index as f32 / bands_per_octave)
}

/// Q shared by every band of a `band_count`-band equalizer
pub fn band_q(band_count: usize) -> f32 {
    BASE_Q * (band_count as f32 / 10.0)
}

/// Shelves at both ends, peaking filters in between
pub fn band_filter_type(index: usize, band_count: usize) -> FilterType {
    if index == 0 {
        FilterType::LowShelf
    } else if index + 1 == band_count {
        FilterType::HighShelf
    } else {
        FilterType::Peak
    }
}

// ============================================================================
// Biquad Filter Node
// ============================================================================

/// Single biquad filter stage
#[derive(Debug, Clone)]
pub struct BiquadFilterNode {
    filter_type: FilterType,
    frequency: f32,
    q: f32,
    gain_db: f32,
    sample_rate: u32,
    coeffs: BiquadCoeffs,
    /// One per channel
    states: Vec<BiquadState>,
}

impl BiquadFilterNode {
    pub fn new(filter_type: FilterType, frequency: f32, q: f32, gain_db: f32) -> Self {
        let mut node = Self {
            filter_type,
            frequency,
            q,
            gain_db,
            sample_rate: crate::engine::buffer::DEFAULT_SAMPLE_RATE,
            coeffs: BiquadCoeffs::UNITY,
            states: Vec::new(),
        };
        node.update_coefficients();
        node
    }

    /// Change every parameter at once; filter history is kept
    pub fn set_params(&mut self, filter_type: FilterType, frequency: f32, q: f32, gain_db: f32) {
        self.filter_type = filter_type;
        self.frequency = frequency;
        self.q = q;
        self.gain_db = gain_db;
        self.update_coefficients();
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    fn update_coefficients(&mut self) {
        self.coeffs = BiquadCoeffs::calculate(
            self.filter_type,
            self.sample_rate as f64,
            self.frequency as f64,
            self.gain_db as f64,
            self.q as f64,
        );
    }
}

impl AudioNode for BiquadFilterNode {
    impl_node_common!(NodeKind::Filter);

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, input_channels: &[usize]) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
        let channels = input_channels.first().copied().unwrap_or(1);
        self.states.resize_with(channels, BiquadState::default);
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let output = &mut outputs[0];
        output.copy_from(&inputs[0]);

        for (channel, state) in output.samples.iter_mut().zip(self.states.iter_mut()) {
            for sample in channel.iter_mut() {
                *sample = state.process(*sample as f64, &self.coeffs) as f32;
            }
        }
    }

    fn reset(&mut self) {
        self.states.fill(BiquadState::default());
    }
}

// ============================================================================
// Filter Bank Pool
// ============================================================================

/// Equalizer stages of one effect chain, indexed by band
///
/// Stages are created the first time their band index is needed and then
/// reused on every later push, whatever the band count. The pool never
/// shrinks.
#[derive(Debug, Clone, Default)]
pub struct FilterBankPool {
    stages: Vec<NodeId>,
}

impl FilterBankPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stages ever created
    pub fn allocated(&self) -> usize {
        self.stages.len()
    }

    /// Stage for band `index`, if created
    pub fn stage(&self, index: usize) -> Option<NodeId> {
        self.stages.get(index).copied()
    }

    /// Configure the stages for `eq` and return the ones to link, in band order
    ///
    /// Returns an empty list if the equalizer is inactive. Only bands with a
    /// non-zero value are returned.
    pub fn configure(&mut self, graph: &mut AudioGraph, eq: &EqualizerConfig) -> Vec<NodeId> {
        if !eq.is_active() {
            return Vec::new();
        }

        let band_count = eq.band_values.len();
        let q = band_q(band_count);
        let mut linked = Vec::new();

        for (index, &value) in eq.band_values.iter().enumerate() {
            if value == 0.0 {
                continue;
            }

            let filter_type = band_filter_type(index, band_count);
            let frequency = band_frequency(index, band_count);
            let gain_db = eq.band_gain_db(index);

            while self.stages.len() <= index {
                let band = self.stages.len();
                let node = BiquadFilterNode::new(
                    band_filter_type(band, band_count),
                    band_frequency(band, band_count),
                    q,
                    0.0,
                );
                self.stages.push(graph.add_node(node));
                debug!(band, "Created equalizer stage");
            }

            let id = self.stages[index];
            if let Some(stage) = graph.node_mut::<BiquadFilterNode>(id) {
                stage.set_params(filter_type, frequency, q, gain_db);
            }
            linked.push(id);
        }

        linked
    }
}
