//! Reverse Playback Engine
//!
//! Records a clip from the live signal, reverses it and plays it back once.
//!
//! ```text
//! PRE ──first non-silent block──▶ RECORDING ──silence / overflow / PLAY──▶ PLAYING
//!  │                                                                        │
//!  └────────────PLAY──────────────────────────────────────────────────────▶─┤
//!                                                          clip exhausted   ▼
//!                                        any ──release──────────────▶ RELEASED
//! ```
//!
//! The audio side ([`ReverseNode`]) sits in the session graph. The control
//! side ([`ReverseControl`]) sends commands and receives events through
//! wait-free SPSC rings, and reads the current state from an atomic.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::ReverseSettings;
use crate::engine::AudioBuffer;
use crate::graph::{AudioNode, NodeKind};
use crate::impl_node_common;

/// Capacity of the command and event rings
const QUEUE_CAPACITY: usize = 16;

// ============================================================================
// State
// ============================================================================

/// Reverse session states, in the only order they can be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ReverseState {
    /// Waiting for sound
    #[default]
    Pre = 0,
    /// Appending input to the clip
    Recording = 1,
    /// Playing the reversed clip
    Playing = 2,
    /// Finished; terminal
    Released = 3,
}

impl ReverseState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReverseState::Pre,
            1 => ReverseState::Recording,
            2 => ReverseState::Playing,
            _ => ReverseState::Released,
        }
    }
}

impl fmt::Display for ReverseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReverseState::Pre => write!(f, "Pre"),
            ReverseState::Recording => write!(f, "Recording"),
            ReverseState::Playing => write!(f, "Playing"),
            ReverseState::Released => write!(f, "Released"),
        }
    }
}

/// Control-to-audio requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseCommand {
    /// Stop recording and start playback at the next block
    Play,
    /// Stop immediately
    Release,
}

/// Audio-to-control notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseEvent {
    /// Playback started with a clip of this many frames
    Playing { frames: usize },
    /// The clip has been played to the end
    Released,
}

/// Reverse frames `[0, len)` of every channel in place
pub fn reverse_frames(channels: &mut [Vec<f32>], len: usize) {
    for channel in channels {
        let len = len.min(channel.len());
        channel[..len].reverse();
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Buffering state machine, driven one block at a time
///
/// Allocates only when the clip outgrows its buffer while recording; growth
/// doubles the capacity up to the configured maximum.
#[derive(Debug, Clone)]
pub struct ReverseEngine {
    state: ReverseState,
    /// Clip storage per channel; each has `capacity` frames
    buffer: Vec<Vec<f32>>,
    capacity: usize,
    max_frames: usize,
    recorded: usize,
    played: usize,
    silence_threshold: f32,
    silent_blocks_to_finish: u32,
    /// Consecutive silent blocks at the end of the clip
    silent_blocks: u32,
    /// Frames those silent blocks occupy
    silent_frames: usize,
    play_requested: bool,
}

impl ReverseEngine {
    /// Allocate the initial buffer for `channels` channels
    pub fn new(channels: usize, settings: &ReverseSettings, sample_rate: u32) -> Self {
        let max_frames = settings.max_frames(sample_rate).max(1);
        let capacity = settings.initial_frames(sample_rate);
        Self {
            state: ReverseState::Pre,
            buffer: vec![vec![0.0; capacity]; channels.max(1)],
            capacity,
            max_frames,
            recorded: 0,
            played: 0,
            silence_threshold: settings.silence_threshold,
            silent_blocks_to_finish: settings.silent_blocks_to_finish.max(1),
            silent_blocks: 0,
            silent_frames: 0,
            play_requested: false,
        }
    }

    pub fn state(&self) -> ReverseState {
        self.state
    }

    pub fn recorded_frames(&self) -> usize {
        self.recorded
    }

    pub fn played_frames(&self) -> usize {
        self.played
    }

    /// Frames the buffer can hold without growing
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn channels(&self) -> usize {
        self.buffer.len()
    }

    /// The recorded (or, once playing, reversed) clip of one channel
    pub fn clip(&self, channel: usize) -> &[f32] {
        self.buffer
            .get(channel)
            .map_or(&[][..], |samples| &samples[..self.recorded])
    }

    /// Make room for `channels` channels. Allocates; control context only.
    ///
    /// The clip never loses a channel once recorded: a narrower input keeps
    /// the extra channels, which record the first input channel from then on.
    /// A channel added mid-clip starts as a copy of channel 0.
    pub fn set_channels(&mut self, channels: usize) {
        let capacity = self.capacity;
        let recorded = self.recorded;
        while self.buffer.len() < channels {
            let mut samples = vec![0.0; capacity];
            if let Some(first) = self.buffer.first() {
                samples[..recorded].copy_from_slice(&first[..recorded]);
            }
            self.buffer.push(samples);
        }
    }

    /// Ask for playback to start at the next block
    pub fn request_play(&mut self) {
        if matches!(self.state, ReverseState::Pre | ReverseState::Recording) {
            self.play_requested = true;
        }
    }

    /// Jump to RELEASED. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.state == ReverseState::Released {
            return false;
        }
        self.state = ReverseState::Released;
        true
    }

    /// Run one block
    ///
    /// Output is silent except while playing. Events are passed to `emit` in
    /// the order they happen; each kind is emitted at most once per session.
    pub fn process(
        &mut self,
        input: &AudioBuffer,
        output: &mut AudioBuffer,
        mut emit: impl FnMut(ReverseEvent),
    ) {
        output.fill_silence();

        if self.play_requested {
            self.play_requested = false;
            if matches!(self.state, ReverseState::Pre | ReverseState::Recording) {
                self.start_playing(&mut emit);
                if self.state == ReverseState::Released {
                    return;
                }
            }
        }

        match self.state {
            ReverseState::Pre => {
                if !input.is_silent(self.silence_threshold) {
                    self.state = ReverseState::Recording;
                    self.record(input, &mut emit);
                }
            }
            ReverseState::Recording => self.record(input, &mut emit),
            ReverseState::Playing => self.play(output, &mut emit),
            ReverseState::Released => {}
        }
    }

    fn record(&mut self, input: &AudioBuffer, emit: &mut impl FnMut(ReverseEvent)) {
        let frames = input.len();
        let silent = input.is_silent(self.silence_threshold);

        if self.recorded + frames > self.max_frames {
            self.start_playing(emit);
            return;
        }
        if self.recorded + frames > self.capacity {
            self.grow(self.recorded + frames);
        }

        for (ch, samples) in self.buffer.iter_mut().enumerate() {
            let dst = &mut samples[self.recorded..self.recorded + frames];
            match input.samples.get(ch).or_else(|| input.samples.first()) {
                Some(src) => dst.copy_from_slice(&src[..frames]),
                None => dst.fill(0.0),
            }
        }
        self.recorded += frames;

        if silent {
            self.silent_blocks += 1;
            self.silent_frames += frames;
            if self.silent_blocks >= self.silent_blocks_to_finish {
                self.recorded -= self.silent_frames;
                self.start_playing(emit);
            }
        } else {
            self.silent_blocks = 0;
            self.silent_frames = 0;
        }
    }

    fn grow(&mut self, needed: usize) {
        let mut capacity = self.capacity.max(1);
        while capacity < needed {
            capacity *= 2;
        }
        self.capacity = capacity.min(self.max_frames);
        for samples in &mut self.buffer {
            samples.resize(self.capacity, 0.0);
        }
    }

    fn start_playing(&mut self, emit: &mut impl FnMut(ReverseEvent)) {
        reverse_frames(&mut self.buffer, self.recorded);
        self.played = 0;
        self.state = ReverseState::Playing;
        emit(ReverseEvent::Playing {
            frames: self.recorded,
        });
        if self.played >= self.recorded {
            self.finish(emit);
        }
    }

    fn play(&mut self, output: &mut AudioBuffer, emit: &mut impl FnMut(ReverseEvent)) {
        let frames = output.len().min(self.recorded - self.played);
        let start = self.played;

        for (ch, dst) in output.samples.iter_mut().enumerate() {
            let src = self
                .buffer
                .get(ch)
                .or_else(|| self.buffer.first())
                .map(|samples| &samples[start..start + frames]);
            if let Some(src) = src {
                dst[..frames].copy_from_slice(src);
            }
        }
        self.played += frames;

        if self.played >= self.recorded {
            self.finish(emit);
        }
    }

    fn finish(&mut self, emit: &mut impl FnMut(ReverseEvent)) {
        self.state = ReverseState::Released;
        emit(ReverseEvent::Released);
    }
}

// ============================================================================
// Audio Side
// ============================================================================

/// Graph stage driving a [`ReverseEngine`]
pub struct ReverseNode {
    engine: ReverseEngine,
    commands: rtrb::Consumer<ReverseCommand>,
    events: rtrb::Producer<ReverseEvent>,
    state: Arc<AtomicU8>,
}

impl ReverseNode {
    pub fn engine(&self) -> &ReverseEngine {
        &self.engine
    }
}

impl AudioNode for ReverseNode {
    impl_node_common!(NodeKind::Reverse);

    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize, input_channels: &[usize]) {
        self.engine
            .set_channels(input_channels.first().copied().unwrap_or(1));
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        while let Ok(command) = self.commands.pop() {
            match command {
                ReverseCommand::Play => self.engine.request_play(),
                ReverseCommand::Release => {
                    self.engine.release();
                }
            }
        }

        let events = &mut self.events;
        self.engine.process(&inputs[0], &mut outputs[0], |event| {
            // Each event kind is pushed at most once, so the ring cannot fill
            let _ = events.push(event);
        });
        self.state
            .store(self.engine.state() as u8, Ordering::Release);
    }
}

// ============================================================================
// Control Side
// ============================================================================

/// Control-context handle of one reverse session
pub struct ReverseControl {
    commands: rtrb::Producer<ReverseCommand>,
    events: rtrb::Consumer<ReverseEvent>,
    state: Arc<AtomicU8>,
}

impl ReverseControl {
    /// State as of the last processed block
    pub fn state(&self) -> ReverseState {
        ReverseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the audio side to start playback early
    pub fn request_play(&mut self) -> bool {
        self.commands.push(ReverseCommand::Play).is_ok()
    }

    /// Stop the session; the state reads RELEASED immediately
    pub fn release(&mut self) {
        let _ = self.commands.push(ReverseCommand::Release);
        self.state
            .store(ReverseState::Released as u8, Ordering::Release);
    }

    /// Next pending event from the audio side
    pub fn pop_event(&mut self) -> Option<ReverseEvent> {
        self.events.pop().ok()
    }
}

/// Create a connected audio/control pair
pub fn reverse_pair(
    channels: usize,
    settings: &ReverseSettings,
    sample_rate: u32,
) -> (ReverseNode, ReverseControl) {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(QUEUE_CAPACITY);
    let (event_tx, event_rx) = rtrb::RingBuffer::new(QUEUE_CAPACITY);
    let state = Arc::new(AtomicU8::new(ReverseState::Pre as u8));

    let node = ReverseNode {
        engine: ReverseEngine::new(channels, settings, sample_rate),
        commands: command_rx,
        events: event_tx,
        state: Arc::clone(&state),
    };
    let control = ReverseControl {
        commands: command_tx,
        events: event_rx,
        state,
    };
    (node, control)
}
