//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use tabfx::config::{EngineSettings, ReverseSettings};
use tabfx::dsp::{AccuratePitchLoader, AccuratePitchModule, AccuratePitchUnit};
use tabfx::engine::AudioBuffer;
use tabfx::session::{
    CapturedStream, EndedObserver, MediaAction, MediaKey, PlaybackController, SourceId,
};
use tabfx::{Result, TabFxError};

pub const BLOCK: usize = 64;
pub const SAMPLE_RATE: u32 = 48000;

/// Route library logs through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small blocks and a short silence window
pub fn settings() -> EngineSettings {
    EngineSettings {
        sample_rate: SAMPLE_RATE,
        block_size: BLOCK,
        reverse: ReverseSettings {
            max_duration_seconds: 1.0,
            initial_capacity_seconds: 0.01,
            silence_threshold: 1e-4,
            silent_blocks_to_finish: 2,
        },
        ..Default::default()
    }
}

// ============================================================================
// Streams
// ============================================================================

/// Plays a fixed clip on every channel, then silence
pub struct ClipStream {
    channels: usize,
    clip: Vec<f32>,
    position: usize,
    stopped: Arc<Mutex<bool>>,
    observer: Option<EndedObserver>,
}

impl ClipStream {
    pub fn new(channels: usize, clip: Vec<f32>) -> Self {
        Self {
            channels,
            clip,
            position: 0,
            stopped: Arc::new(Mutex::new(false)),
            observer: None,
        }
    }

    /// Shared flag set when the engine stops the stream
    pub fn stopped_flag(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.stopped)
    }

    pub fn boxed(self) -> Result<Box<dyn CapturedStream>> {
        Ok(Box::new(self))
    }
}

impl CapturedStream for ClipStream {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn read(&mut self, block: &mut AudioBuffer) -> bool {
        block.fill_silence();
        if *self.stopped.lock() {
            return false;
        }
        for i in 0..block.len() {
            let value = self.clip.get(self.position).copied().unwrap_or(0.0);
            for channel in block.samples.iter_mut() {
                channel[i] = value;
            }
            self.position += 1;
        }
        true
    }

    fn observe_end(&mut self, observer: EndedObserver) {
        self.observer = Some(observer);
    }

    fn stop(&mut self) {
        *self.stopped.lock() = true;
    }
}

/// Ramp clip with distinct, non-silent samples
pub fn ramp(frames: usize) -> Vec<f32> {
    (0..frames).map(|i| 0.1 + 0.8 * i as f32 / frames as f32).collect()
}

// ============================================================================
// Page Playback
// ============================================================================

pub type ActionLog = Arc<Mutex<Vec<(SourceId, MediaKey, MediaAction)>>>;

/// Reports a fixed set of playing media and records every action
pub struct RecordingPlayback {
    playing: Vec<MediaKey>,
    log: ActionLog,
}

impl RecordingPlayback {
    pub fn new(playing: &[&str]) -> (Self, ActionLog) {
        let log = ActionLog::default();
        let controller = Self {
            playing: playing.iter().map(|key| MediaKey::new(*key)).collect(),
            log: Arc::clone(&log),
        };
        (controller, log)
    }
}

impl PlaybackController for RecordingPlayback {
    fn playing_media(&mut self, _source: SourceId) -> Vec<MediaKey> {
        self.playing.clone()
    }

    fn send(&mut self, source: SourceId, media: &MediaKey, action: MediaAction) {
        self.log.lock().push((source, media.clone(), action));
    }
}

// ============================================================================
// Accurate Pitch
// ============================================================================

/// Loader whose every load fails
#[derive(Default)]
pub struct FailingLoader {
    pub loads: AtomicU32,
}

impl AccuratePitchLoader for FailingLoader {
    fn load(&self) -> Result<Arc<dyn AccuratePitchModule>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Err(TabFxError::UnitLoad {
            unit: "accurate pitch".to_string(),
            reason: "module unavailable".to_string(),
        })
    }
}

/// Unit that copies its input
struct CopyUnit;

impl AccuratePitchUnit for CopyUnit {
    fn set_semitones(&mut self, _semitones: f32) {}

    fn process(&mut self, input: &AudioBuffer, output: &mut AudioBuffer) -> Result<()> {
        output.copy_from(input);
        Ok(())
    }
}

struct CopyModule;

impl AccuratePitchModule for CopyModule {
    fn create_unit(&self, _sample_rate: u32) -> Result<Box<dyn AccuratePitchUnit>> {
        Ok(Box::new(CopyUnit))
    }
}

/// Loader that succeeds with a copying unit
#[derive(Default)]
pub struct CopyLoader {
    pub loads: AtomicU32,
}

impl AccuratePitchLoader for CopyLoader {
    fn load(&self) -> Result<Arc<dyn AccuratePitchModule>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CopyModule))
    }
}
