//! Configuration types
//!
//! - [`CaptureConfig`] / [`EffectConfig`]: per-source effect parameters
//! - [`EngineSettings`]: engine-wide limits loaded at startup

pub mod effect;
pub mod settings;

pub use effect::{
    CaptureConfig, CompressorConfig, EffectConfig, EqualizerConfig, PitchAlgorithm,
    SUPPORTED_BAND_COUNTS,
};
pub use settings::{EngineSettings, ReverseSettings};
