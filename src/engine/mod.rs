//! Audio Engine Module
//!
//! Block buffers and level helpers, plus the reverse playback engine.

pub mod buffer;
pub mod reverse;

pub use buffer::{
    calculate_peak, calculate_rms, db_to_linear, linear_to_db, AudioBuffer, ChannelLayout,
    DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE,
};
pub use reverse::{
    reverse_pair, ReverseCommand, ReverseControl, ReverseEngine, ReverseEvent, ReverseNode,
    ReverseState,
};
