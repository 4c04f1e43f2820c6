//! Captured stream boundary
//!
//! The host owns the actual capture API. The engine only sees a
//! [`CapturedStream`] that fills blocks and can be stopped, obtained from a
//! [`StreamSupplier`] that may refuse.

use std::f32::consts::TAU;

use crossbeam_channel::Sender;
use uuid::Uuid;

use super::{SourceId, StreamToken};
use crate::engine::AudioBuffer;
use crate::error::{Result, TabFxError};

/// A stream-ended report, tagged with the session it belongs to
///
/// The tag lets the manager drop reports that arrive after the source has
/// been released and captured again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndedNotice {
    pub source: SourceId,
    pub session: Uuid,
}

/// Handle a stream uses to report that it has ended
///
/// Safe to call from any thread and any number of times.
#[derive(Debug, Clone)]
pub struct EndedObserver {
    notice: EndedNotice,
    sender: Sender<EndedNotice>,
}

impl EndedObserver {
    pub(crate) fn new(source: SourceId, session: Uuid, sender: Sender<EndedNotice>) -> Self {
        Self {
            notice: EndedNotice { source, session },
            sender,
        }
    }

    pub fn source(&self) -> SourceId {
        self.notice.source
    }

    pub fn session(&self) -> Uuid {
        self.notice.session
    }

    /// Queue the end notification; never blocks
    pub fn notify(&self) {
        let _ = self.sender.try_send(self.notice);
    }
}

/// Audio delivered by the capture API
pub trait CapturedStream: Send {
    /// Channels the stream produces
    fn channel_count(&self) -> usize;

    /// Fill one block. Returns false once the stream has ended, in which case
    /// the block is silent.
    fn read(&mut self, block: &mut AudioBuffer) -> bool;

    /// Register the end observer. Called once, right after acquisition.
    fn observe_end(&mut self, _observer: EndedObserver) {}

    /// Stop capturing and release the underlying tracks
    fn stop(&mut self);
}

/// Turns a capture grant into a stream
pub trait StreamSupplier: Send {
    fn acquire(&mut self, source: SourceId, token: &StreamToken) -> Result<Box<dyn CapturedStream>>;
}

impl<F> StreamSupplier for F
where
    F: FnMut(SourceId, &StreamToken) -> Result<Box<dyn CapturedStream>> + Send,
{
    fn acquire(&mut self, source: SourceId, token: &StreamToken) -> Result<Box<dyn CapturedStream>> {
        self(source, token)
    }
}

/// Supplier used until the host installs one
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectingSupplier;

impl StreamSupplier for RejectingSupplier {
    fn acquire(&mut self, source: SourceId, _token: &StreamToken) -> Result<Box<dyn CapturedStream>> {
        Err(TabFxError::StreamAcquisition {
            source_id: source,
            reason: "no stream supplier installed".to_string(),
        })
    }
}

// ============================================================================
// Synthetic Streams
// ============================================================================

/// Sine tone source for offline rendering and tests
///
/// The tone can be limited to a number of frames (silence follows) and the
/// stream can be made to end after a number of frames.
#[derive(Debug, Clone)]
pub struct ToneStream {
    channels: usize,
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    phase: f32,
    position: usize,
    tone_frames: Option<usize>,
    end_after: Option<usize>,
    stopped: bool,
    observer: Option<EndedObserver>,
}

impl ToneStream {
    pub fn new(channels: usize, sample_rate: u32, frequency: f32, amplitude: f32) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            frequency,
            amplitude,
            phase: 0.0,
            position: 0,
            tone_frames: None,
            end_after: None,
            stopped: false,
            observer: None,
        }
    }

    /// Emit the tone for `frames` frames, then silence
    pub fn with_tone_frames(mut self, frames: usize) -> Self {
        self.tone_frames = Some(frames);
        self
    }

    /// End the stream after `frames` frames
    pub fn ending_after(mut self, frames: usize) -> Self {
        self.end_after = Some(frames);
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn has_ended(&self) -> bool {
        self.stopped || self.end_after.is_some_and(|end| self.position >= end)
    }
}

impl CapturedStream for ToneStream {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn read(&mut self, block: &mut AudioBuffer) -> bool {
        block.fill_silence();
        if self.has_ended() {
            return false;
        }

        let increment = self.frequency / self.sample_rate as f32;
        for i in 0..block.len() {
            let audible = self.tone_frames.map_or(true, |limit| self.position < limit);
            if audible {
                let value = self.amplitude * (TAU * self.phase).sin();
                for channel in block.samples.iter_mut() {
                    channel[i] = value;
                }
            }
            self.phase = (self.phase + increment).fract();
            self.position += 1;
        }

        if self.has_ended() {
            if let Some(observer) = &self.observer {
                observer.notify();
            }
        }
        true
    }

    fn observe_end(&mut self, observer: EndedObserver) {
        self.observer = Some(observer);
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Supplier producing [`ToneStream`]s
#[derive(Debug, Clone)]
pub struct ToneSupplier {
    pub channels: usize,
    pub sample_rate: u32,
    pub frequency: f32,
    pub amplitude: f32,
}

impl StreamSupplier for ToneSupplier {
    fn acquire(&mut self, _source: SourceId, _token: &StreamToken) -> Result<Box<dyn CapturedStream>> {
        Ok(Box::new(ToneStream::new(
            self.channels,
            self.sample_rate,
            self.frequency,
            self.amplitude,
        )))
    }
}
