//! Effect parameters pushed by the configuration source
//!
//! Every field has a default, so partial JSON documents deserialize. Values
//! are validated with [`CaptureConfig::validate`] before they reach a graph.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabFxError};

/// Band counts the equalizer accepts
pub const SUPPORTED_BAND_COUNTS: [usize; 3] = [10, 20, 30];

// ============================================================================
// Pitch
// ============================================================================

/// Which pitch shifter a chain uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchAlgorithm {
    /// Built-in granular delay-modulation shifter
    #[default]
    Fast,
    /// External, lazily loaded high-quality unit
    Accurate,
}

// ============================================================================
// Equalizer
// ============================================================================

/// Graphic equalizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EqualizerConfig {
    pub enabled: bool,
    /// Gain per band, scaled by `factor` into dB
    pub band_values: Vec<f32>,
    pub factor: f32,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            band_values: vec![0.0; 10],
            factor: 1.0,
        }
    }
}

impl EqualizerConfig {
    /// True if the equalizer would change the signal
    pub fn is_active(&self) -> bool {
        self.enabled && self.band_values.iter().any(|&v| v != 0.0)
    }

    /// Gain of band `index` in dB
    pub fn band_gain_db(&self, index: usize) -> f32 {
        self.band_values.get(index).copied().unwrap_or(0.0) * self.factor
    }

    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_BAND_COUNTS.contains(&self.band_values.len()) {
            return Err(TabFxError::invalid(
                "equalizer.bandValues",
                self.band_values.len(),
                "10, 20 or 30 bands",
            ));
        }
        if let Some(value) = self.band_values.iter().find(|v| !v.is_finite()) {
            return Err(TabFxError::invalid(
                "equalizer.bandValues",
                value,
                "finite values",
            ));
        }
        ensure_finite("equalizer.factor", self.factor)
    }
}

// ============================================================================
// Compressor
// ============================================================================

/// Dynamics compressor settings
///
/// Threshold and knee are in dB, attack and release in seconds; `gain` is a
/// linear makeup multiplier applied after compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressorConfig {
    pub enabled: bool,
    pub threshold: f32,
    pub knee: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
    pub gain: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: -24.0,
            knee: 30.0,
            ratio: 12.0,
            attack: 0.003,
            release: 0.25,
            gain: 1.0,
        }
    }
}

impl CompressorConfig {
    /// Clamp parameters to the ranges the compressor supports
    pub fn clamp(&mut self) {
        self.threshold = self.threshold.clamp(-100.0, 0.0);
        self.knee = self.knee.clamp(0.0, 40.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack = self.attack.clamp(0.0, 1.0);
        self.release = self.release.clamp(0.0, 1.0);
        self.gain = self.gain.max(0.0);
    }

    pub fn validate(&self) -> Result<()> {
        ensure_finite("compressor.threshold", self.threshold)?;
        ensure_finite("compressor.knee", self.knee)?;
        ensure_finite("compressor.ratio", self.ratio)?;
        ensure_finite("compressor.attack", self.attack)?;
        ensure_finite("compressor.release", self.release)?;
        ensure_finite("compressor.gain", self.gain)
    }
}

// ============================================================================
// Effect Config
// ============================================================================

/// Parameters for one effect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectConfig {
    pub enabled: bool,
    /// Shift in semitones; `None` or 0 means no pitch stage
    pub pitch_semitone: Option<f32>,
    pub pitch_algorithm: PitchAlgorithm,
    /// Output level; the applied gain is `volume²`
    pub volume: f32,
    pub delay_seconds: f32,
    /// Sum the dry signal with the delayed one instead of wet only
    pub delay_merge: bool,
    pub equalizer: EqualizerConfig,
    pub compressor: CompressorConfig,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pitch_semitone: None,
            pitch_algorithm: PitchAlgorithm::Fast,
            volume: 1.0,
            delay_seconds: 0.0,
            delay_merge: false,
            equalizer: EqualizerConfig::default(),
            compressor: CompressorConfig::default(),
        }
    }
}

impl EffectConfig {
    /// Non-zero semitone shift, if any
    pub fn active_semitone(&self) -> Option<f32> {
        self.pitch_semitone.filter(|&s| s != 0.0)
    }

    /// Linear gain of the output stage
    pub fn output_gain(&self) -> f32 {
        if self.enabled && self.volume != 1.0 {
            self.volume * self.volume
        } else {
            1.0
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(semitone) = self.pitch_semitone {
            ensure_finite("pitchSemitone", semitone)?;
        }
        ensure_finite("volume", self.volume)?;
        ensure_finite("delaySeconds", self.delay_seconds)?;
        if self.delay_seconds < 0.0 {
            return Err(TabFxError::invalid(
                "delaySeconds",
                self.delay_seconds,
                "a non-negative duration",
            ));
        }
        self.equalizer.validate()?;
        self.compressor.validate()
    }
}

// ============================================================================
// Capture Config
// ============================================================================

/// Everything pushed for one source
///
/// A present `secondary` splits the signal into left and right halves, each
/// with its own chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureConfig {
    pub enabled: bool,
    pub primary: EffectConfig,
    pub secondary: Option<EffectConfig>,
    pub pan: Option<f32>,
    pub mono_output: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: EffectConfig::default(),
            secondary: None,
            pan: None,
            mono_output: false,
        }
    }
}

impl CaptureConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CaptureConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// True if the signal is split into two chains
    pub fn is_split(&self) -> bool {
        self.enabled && self.secondary.is_some()
    }

    /// Pan position if a panning stage is needed
    pub fn active_pan(&self) -> Option<f32> {
        self.pan.filter(|&p| self.enabled && p != 0.0)
    }

    /// True if the output is downmixed to one channel
    pub fn is_mono(&self) -> bool {
        self.enabled && self.mono_output
    }

    pub fn validate(&self) -> Result<()> {
        self.primary.validate()?;
        if let Some(secondary) = &self.secondary {
            secondary.validate()?;
        }
        if let Some(pan) = self.pan {
            if !pan.is_finite() || !(-1.0..=1.0).contains(&pan) {
                return Err(TabFxError::invalid("pan", pan, "-1 to 1"));
            }
        }
        Ok(())
    }
}

fn ensure_finite(param: &str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(TabFxError::invalid(param, value, "a finite number"))
    }
}
