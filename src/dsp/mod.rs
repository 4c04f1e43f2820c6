//! DSP Nodes
//!
//! Every processing stage the effect graph can contain. All of them
//! implement [`AudioNode`](crate::graph::AudioNode).

pub mod accurate;
mod chain;
mod compressor;
mod delay;
pub mod eq;
mod gain;
pub mod pitch;
mod routing;

pub use accurate::{
    AccuratePitchLoader, AccuratePitchModule, AccuratePitchNode, AccuratePitchProvider,
    AccuratePitchUnit,
};
pub use chain::{ChainContext, EffectChain};
pub use compressor::CompressorNode;
pub use delay::DelayNode;
pub use eq::{BiquadFilterNode, FilterBankPool, FilterType};
pub use gain::GainNode;
pub use pitch::{PitchShifter, PitchTableCache, PitchTables};
pub use routing::{ChannelMerger, ChannelSplitter, StereoPanner};
