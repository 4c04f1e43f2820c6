//! Gain Node
//!
//! Linear output level stage. Every effect chain ends in one.

use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

// ============================================================================
// Constants
// ============================================================================

/// Largest linear gain accepted (+24 dB)
const MAX_GAIN: f32 = 15.848932;

// ============================================================================
// Gain Node
// ============================================================================

/// Multiplies every sample by a linear gain
///
/// # Example
/// ```
/// use tabfx::dsp::GainNode;
///
/// let mut gain = GainNode::new(0.25);
/// assert_eq!(gain.gain(), 0.25);
/// gain.set_gain(1.0);
/// assert!(gain.is_unity());
/// ```
#[derive(Debug, Clone)]
pub struct GainNode {
    gain: f32,
}

impl GainNode {
    /// Create a gain stage, clamped to 0..=+24 dB
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, MAX_GAIN),
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, MAX_GAIN);
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_unity(&self) -> bool {
        (self.gain - 1.0).abs() < f32::EPSILON
    }
}

impl Default for GainNode {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AudioNode for GainNode {
    impl_node_common!(NodeKind::Gain);

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        let output = &mut outputs[0];
        output.copy_from(&inputs[0]);

        // Unity gain optimization
        if self.is_unity() {
            return;
        }

        for channel in &mut output.samples {
            for sample in channel.iter_mut() {
                *sample *= self.gain;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
