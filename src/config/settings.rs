//! Engine-wide settings
//!
//! Loaded once at startup from JSON. Missing fields fall back to defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE};
use crate::error::{Result, TabFxError};

/// Limits and thresholds for reverse playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReverseSettings {
    /// Longest clip that can be recorded
    pub max_duration_seconds: f32,
    /// Buffer capacity allocated when recording starts
    pub initial_capacity_seconds: f32,
    /// Blocks whose samples all stay below this magnitude count as silent
    pub silence_threshold: f32,
    /// Consecutive silent blocks that end a recording
    pub silent_blocks_to_finish: u32,
}

impl Default for ReverseSettings {
    fn default() -> Self {
        Self {
            max_duration_seconds: 60.0,
            initial_capacity_seconds: 5.0,
            silence_threshold: 1e-4,
            silent_blocks_to_finish: 16,
        }
    }
}

impl ReverseSettings {
    /// Maximum recording length in frames
    pub fn max_frames(&self, sample_rate: u32) -> usize {
        (self.max_duration_seconds * sample_rate as f32).round() as usize
    }

    /// Initial buffer capacity in frames, never above the maximum
    pub fn initial_frames(&self, sample_rate: u32) -> usize {
        let initial = (self.initial_capacity_seconds * sample_rate as f32).round() as usize;
        initial.clamp(1, self.max_frames(sample_rate).max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_duration_seconds > 0.0 && self.max_duration_seconds.is_finite()) {
            return Err(TabFxError::invalid(
                "reverse.maxDurationSeconds",
                self.max_duration_seconds,
                "a positive duration",
            ));
        }
        if !(self.initial_capacity_seconds > 0.0 && self.initial_capacity_seconds.is_finite()) {
            return Err(TabFxError::invalid(
                "reverse.initialCapacitySeconds",
                self.initial_capacity_seconds,
                "a positive duration",
            ));
        }
        if !(self.silence_threshold >= 0.0 && self.silence_threshold.is_finite()) {
            return Err(TabFxError::invalid(
                "reverse.silenceThreshold",
                self.silence_threshold,
                "a non-negative level",
            ));
        }
        if self.silent_blocks_to_finish == 0 {
            return Err(TabFxError::invalid(
                "reverse.silentBlocksToFinish",
                self.silent_blocks_to_finish,
                "at least 1",
            ));
        }
        Ok(())
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub sample_rate: u32,
    /// Frames per render block
    pub block_size: usize,
    /// Channel count of the shared destination
    pub destination_channels: usize,
    /// Longest delay a delay stage can hold
    pub max_delay_seconds: f32,
    /// Failures after which the accurate pitch unit is disabled for a chain
    pub accurate_failure_limit: u32,
    pub reverse: ReverseSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            destination_channels: 2,
            max_delay_seconds: 5.0,
            accurate_failure_limit: 10,
            reverse: ReverseSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Load and validate settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: EngineSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(8000..=384_000).contains(&self.sample_rate) {
            return Err(TabFxError::invalid(
                "sampleRate",
                self.sample_rate,
                "8000 to 384000 Hz",
            ));
        }
        if self.block_size == 0 || self.block_size > 8192 {
            return Err(TabFxError::invalid("blockSize", self.block_size, "1 to 8192"));
        }
        if !(1..=2).contains(&self.destination_channels) {
            return Err(TabFxError::invalid(
                "destinationChannels",
                self.destination_channels,
                "1 or 2",
            ));
        }
        if !(self.max_delay_seconds > 0.0 && self.max_delay_seconds.is_finite()) {
            return Err(TabFxError::invalid(
                "maxDelaySeconds",
                self.max_delay_seconds,
                "a positive duration",
            ));
        }
        if self.accurate_failure_limit == 0 {
            return Err(TabFxError::invalid(
                "accurateFailureLimit",
                self.accurate_failure_limit,
                "at least 1",
            ));
        }
        self.reverse.validate()
    }
}
