//! Granular Pitch Shifter
//!
//! Two delay taps whose delay times ramp cyclically. A ramping delay time
//! resamples the signal: a shrinking delay raises pitch, a growing one lowers
//! it. Each tap is faded out around its ramp reset while the other tap, half
//! a cycle behind, is at full level, so the resets are never heard.
//!
//! The ramp and fade tables depend only on the sample rate. They are built
//! once per rate and shared by every shifter through a [`PitchTableCache`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

// ============================================================================
// Constants
// ============================================================================

/// Length of one ramp cycle in seconds
pub const CYCLE_SECONDS: f32 = 0.1;

/// Length of each fade in seconds
pub const FADE_SECONDS: f32 = 0.05;

/// Delay swept by a full ramp at a multiplier of 1
pub const BASE_DELAY_SECONDS: f32 = 0.1;

/// Longest delay a tap can reach
const MAX_DELAY_SECONDS: f32 = 1.0;

/// Ramp multiplier for a shift in semitones
///
/// Positive multipliers shift up, negative ones shift down.
pub fn pitch_multiplier(semitone: f32) -> f32 {
    2.0_f32.powf(1.0 + semitone / 12.0) - 2.0
}

// ============================================================================
// Tables
// ============================================================================

/// Read-only ramp and fade tables for one sample rate
#[derive(Debug)]
pub struct PitchTables {
    sample_rate: u32,
    /// Delay ramp for shifting down, rising from 0 to 1
    shift_down: Vec<f32>,
    /// Delay ramp for shifting up, falling from 1 to 0
    shift_up: Vec<f32>,
    /// Crossfade envelope: rising root ramp, plateau, falling root ramp
    fade: Vec<f32>,
    /// Cycle offset of the second tap
    offset: usize,
}

impl PitchTables {
    /// Build the tables for `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let length = ((CYCLE_SECONDS * sr) as usize).max(2);
        let fade_length = ((FADE_SECONDS * sr) as usize).clamp(1, length);
        let fade_index = length - fade_length;

        let shift_down = (0..length).map(|i| i as f32 / length as f32).collect();
        let shift_up = (0..length)
            .map(|i| (length - i) as f32 / length as f32)
            .collect();
        let fade = (0..length)
            .map(|i| {
                if i < fade_length {
                    (i as f32 / fade_length as f32).sqrt()
                } else if i >= fade_index {
                    (1.0 - (i - fade_index) as f32 / fade_length as f32).sqrt()
                } else {
                    1.0
                }
            })
            .collect();

        Self {
            sample_rate,
            shift_down,
            shift_up,
            fade,
            offset: (((CYCLE_SECONDS - FADE_SECONDS) * sr) as usize) % length,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Cycle length in samples
    pub fn len(&self) -> usize {
        self.fade.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fade.is_empty()
    }

    pub fn shift_down(&self) -> &[f32] {
        &self.shift_down
    }

    pub fn shift_up(&self) -> &[f32] {
        &self.shift_up
    }

    pub fn fade(&self) -> &[f32] {
        &self.fade
    }

    /// How far the second tap runs behind the first, in samples
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Shared cache of [`PitchTables`], keyed by sample rate
///
/// Holds weak references only: tables are built on the first request for a
/// rate and freed when the last shifter using them is dropped.
#[derive(Debug, Clone, Default)]
pub struct PitchTableCache {
    tables: Arc<Mutex<HashMap<u32, Weak<PitchTables>>>>,
}

impl PitchTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tables for `sample_rate`, building them if no one holds them
    pub fn get(&self, sample_rate: u32) -> Arc<PitchTables> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(&sample_rate).and_then(Weak::upgrade) {
            return existing;
        }

        tables.retain(|_, weak| weak.strong_count() > 0);
        let built = Arc::new(PitchTables::new(sample_rate));
        tables.insert(sample_rate, Arc::downgrade(&built));
        debug!(sample_rate, length = built.len(), "Built pitch tables");
        built
    }

    /// Number of sample rates with tables still in use
    pub fn live_count(&self) -> usize {
        self.tables
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

// ============================================================================
// Pitch Shifter
// ============================================================================

/// Granular pitch shifter stage
#[derive(Debug)]
pub struct PitchShifter {
    cache: PitchTableCache,
    tables: Option<Arc<PitchTables>>,
    semitone: f32,
    /// Use the shift-up ramp instead of the shift-down one
    shift_up: bool,
    /// Delay swept by one ramp, in seconds
    depth: f32,
    sample_rate: u32,
    /// Input history per channel
    lines: Vec<Vec<f32>>,
    write_pos: usize,
    /// Position of the first tap within the cycle
    phase: usize,
}

impl PitchShifter {
    /// Create a shifter. Tables are fetched from `cache` when the node is prepared.
    pub fn new(cache: PitchTableCache, semitone: f32) -> Self {
        let mut shifter = Self {
            cache,
            tables: None,
            semitone: 0.0,
            shift_up: false,
            depth: 0.0,
            sample_rate: 0,
            lines: Vec::new(),
            write_pos: 0,
            phase: 0,
        };
        shifter.set_semitone(semitone);
        shifter
    }

    /// Retune without resetting the delay lines
    pub fn set_semitone(&mut self, semitone: f32) {
        let multiplier = pitch_multiplier(semitone);
        self.semitone = semitone;
        self.shift_up = multiplier > 0.0;
        self.depth = 0.5 * BASE_DELAY_SECONDS * multiplier.abs();
    }

    pub fn semitone(&self) -> f32 {
        self.semitone
    }

    pub fn is_shifting_up(&self) -> bool {
        self.shift_up
    }

    /// Delay swept by one ramp, in seconds
    pub fn depth(&self) -> f32 {
        self.depth
    }

    /// Read `line` `delay` samples behind `pos`, interpolating linearly
    #[inline]
    fn read(line: &[f32], pos: usize, delay: f32) -> f32 {
        let size = line.len();
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let a = line[(pos + size - whole % size) % size];
        let b = line[(pos + size - (whole + 1) % size) % size];
        a + (b - a) * frac
    }
}

impl AudioNode for PitchShifter {
    impl_node_common!(NodeKind::PitchShifter);

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, input_channels: &[usize]) {
        let stale = self
            .tables
            .as_ref()
            .map_or(true, |tables| tables.sample_rate() != sample_rate);
        if stale {
            self.tables = Some(self.cache.get(sample_rate));
            self.phase = 0;
        }

        let channels = input_channels.first().copied().unwrap_or(1);
        if sample_rate != self.sample_rate || self.lines.len() != channels {
            self.sample_rate = sample_rate;
            let size = (MAX_DELAY_SECONDS * sample_rate as f32) as usize + 2;
            self.lines = vec![vec![0.0; size]; channels];
            self.write_pos = 0;
        }
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let input = &inputs[0];
        let output = &mut outputs[0];

        let (Some(tables), Some(size)) = (self.tables.as_ref(), self.lines.first().map(Vec::len))
        else {
            output.copy_from(input);
            return;
        };

        let ramp = if self.shift_up {
            tables.shift_up()
        } else {
            tables.shift_down()
        };
        let fade = tables.fade();
        let cycle = tables.len();
        let offset = tables.offset();
        let depth = self.depth * self.sample_rate as f32;
        let max_delay = (size - 2) as f32;
        let frames = input.len().min(output.len());

        for i in 0..frames {
            let phase1 = self.phase;
            let phase2 = (self.phase + cycle - offset) % cycle;
            let delay1 = (depth * ramp[phase1]).min(max_delay);
            let delay2 = (depth * ramp[phase2]).min(max_delay);
            let (gain1, gain2) = (fade[phase1], fade[phase2]);

            for (ch, line) in self.lines.iter_mut().enumerate() {
                let sample = input.samples.get(ch).map_or(0.0, |src| src[i]);
                line[self.write_pos] = sample;
                let tap1 = Self::read(line, self.write_pos, delay1);
                let tap2 = Self::read(line, self.write_pos, delay2);
                if let Some(dst) = output.samples.get_mut(ch) {
                    dst[i] = tap1 * gain1 + tap2 * gain2;
                }
            }

            self.write_pos = (self.write_pos + 1) % size;
            self.phase = (self.phase + 1) % cycle;
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
        self.phase = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;
    use test_case::test_case;

    const SR: u32 = 48000;

    fn sine(frequency: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * i as f32 / SR as f32).sin())
            .collect()
    }

    fn shift(semitone: f32, signal: &[f32]) -> Vec<f32> {
        let mut shifter = PitchShifter::new(PitchTableCache::new(), semitone);
        shifter.prepare(SR, 128, &[1]);
        let mut out = Vec::with_capacity(signal.len());
        for chunk in signal.chunks(128) {
            let mut input = AudioBuffer::with_channels(1, chunk.len(), SR);
            input.channel_mut(0).copy_from_slice(chunk);
            let mut outputs = vec![AudioBuffer::with_channels(1, chunk.len(), SR)];
            shifter.process(&[input], &mut outputs);
            out.extend_from_slice(outputs[0].channel(0));
        }
        out
    }

    /// Dominant frequency estimate from rising zero crossings
    fn crossing_rate(signal: &[f32]) -> f32 {
        let crossings = signal
            .windows(2)
            .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
            .count();
        crossings as f32 * SR as f32 / signal.len() as f32
    }

    #[test_case(12.0, 2.0 ; "octave up")]
    #[test_case(0.0, 0.0 ; "unison")]
    #[test_case(-12.0, -1.0 ; "octave down")]
    fn test_multiplier(semitone: f32, expected: f32) {
        assert_relative_eq!(pitch_multiplier(semitone), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_table_shapes() {
        let tables = PitchTables::new(SR);
        assert_eq!(tables.len(), 4800);
        assert_eq!(tables.offset(), 2400);
        assert_eq!(tables.shift_down()[0], 0.0);
        assert_eq!(tables.shift_up()[0], 1.0);
        assert!(tables.shift_down().windows(2).all(|w| w[1] > w[0]));
        assert!(tables.shift_up().windows(2).all(|w| w[1] < w[0]));

        let fade = tables.fade();
        assert_eq!(fade[0], 0.0);
        assert_relative_eq!(fade[2399], (2399.0_f32 / 2400.0).sqrt());
        assert_relative_eq!(fade[2400], 1.0);
        assert!(fade[4799] < 0.03);
    }

    #[test]
    fn test_taps_complement_each_other() {
        let tables = PitchTables::new(SR);
        let fade = tables.fade();
        for phase in (0..tables.len()).step_by(97) {
            let other = (phase + tables.len() - tables.offset()) % tables.len();
            let power = fade[phase].powi(2) + fade[other].powi(2);
            assert_relative_eq!(power, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_cache_shares_and_releases() {
        let cache = PitchTableCache::new();
        let a = cache.get(SR);
        let b = cache.get(SR);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.live_count(), 1);

        let c = cache.get(44100);
        assert_eq!(cache.live_count(), 2);
        drop(c);
        assert_eq!(cache.live_count(), 1);
        drop(a);
        drop(b);
        assert_eq!(cache.live_count(), 0);
    }

    #[test]
    fn test_direction_follows_multiplier() {
        let cache = PitchTableCache::new();
        let mut shifter = PitchShifter::new(cache, 7.0);
        assert!(shifter.is_shifting_up());
        shifter.set_semitone(-3.0);
        assert!(!shifter.is_shifting_up());
        assert_relative_eq!(
            shifter.depth(),
            0.5 * BASE_DELAY_SECONDS * pitch_multiplier(-3.0).abs()
        );
    }

    #[test]
    fn test_octave_up_raises_frequency() {
        let out = shift(12.0, &sine(300.0, SR as usize));
        let rate = crossing_rate(&out[SR as usize / 4..]);
        assert!(rate > 450.0, "measured {rate} Hz");
    }

    #[test]
    fn test_octave_down_lowers_frequency() {
        let out = shift(-12.0, &sine(600.0, SR as usize));
        let rate = crossing_rate(&out[SR as usize / 4..]);
        assert!(rate < 450.0, "measured {rate} Hz");
    }

    #[test]
    fn test_output_is_finite() {
        let out = shift(24.0, &sine(1000.0, SR as usize / 2));
        assert!(out.iter().all(|s| s.is_finite()));
    }
}
