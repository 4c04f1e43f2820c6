//! Capture Sessions
//!
//! One session per captured source: its stream, its effect graph and an
//! optional reverse sub-session.
//!
//! The work is split between two handles created together:
//! [`CaptureSessionManager`] lives in the control context and owns every
//! lifecycle and topology change, [`SessionRenderer`] lives in the audio
//! callback and renders the sessions the manager hands it.

pub mod control;
pub mod manager;
pub mod playback;
pub mod renderer;
pub mod stream;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use control::{CaptureStatus, ControlRequest, ControlResponse, ReverseMessage};
pub use manager::{CaptureSessionManager, PollSummary};
pub use playback::{MediaAction, NullPlaybackController, PlaybackController};
pub use renderer::SessionRenderer;
pub use stream::{
    CapturedStream, EndedNotice, EndedObserver, RejectingSupplier, StreamSupplier, ToneStream,
    ToneSupplier,
};

/// Identifier of a captured source (a browser tab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque grant handed to the stream supplier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamToken(pub String);

impl StreamToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifies one media element on a source's page
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaKey(pub String);

impl MediaKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
