//! tabfx - Real-time effect graphs for captured tab audio
//!
//! Each captured source gets its own signal graph that is re-synthesized in
//! place whenever its configuration changes:
//!
//! ```text
//! source ─▶ [pitch] ─▶ [eq bands] ─▶ [compressor] ─▶ [delay] ─▶ gain ─▶ [pan] ─▶ [reverse] ─▶ destination
//! ```
//!
//! A stereo split runs two such chains, one per channel, and merges them back.
//!
//! # Architecture
//!
//! - [`graph`]: node arena, edge diffing, render plan, topology builder
//! - [`dsp`]: the processing stages, including the granular pitch shifter
//! - [`engine`]: block buffers and the reverse playback state machine
//! - [`session`]: capture sessions, control plane and host boundaries
//! - [`config`]: effect parameters and engine settings
//! - [`cli`]: the `tabfx-cli` commands

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph;
pub mod session;

pub use config::{CaptureConfig, EffectConfig, EngineSettings};
pub use engine::AudioBuffer;
pub use error::{Result, TabFxError};
pub use session::{
    CaptureSessionManager, ControlRequest, ControlResponse, SessionRenderer, SourceId,
};
