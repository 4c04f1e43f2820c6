//! Page playback controller boundary

use serde::{Deserialize, Serialize};

use super::{MediaKey, SourceId};

/// What to do with one media element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaAction {
    Pause,
    Resume,
}

/// Controls media elements on a source's page
///
/// Commands are fire-and-forget; the engine never waits for them.
pub trait PlaybackController: Send {
    /// Media currently playing on `source`
    fn playing_media(&mut self, source: SourceId) -> Vec<MediaKey>;

    fn send(&mut self, source: SourceId, media: &MediaKey, action: MediaAction);
}

/// Controller for hosts without page access
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlaybackController;

impl PlaybackController for NullPlaybackController {
    fn playing_media(&mut self, _source: SourceId) -> Vec<MediaKey> {
        Vec::new()
    }

    fn send(&mut self, _source: SourceId, _media: &MediaKey, _action: MediaAction) {}
}
