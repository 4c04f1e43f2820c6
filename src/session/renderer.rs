//! Session Renderer
//!
//! Audio-context half of the session manager. [`SessionRenderer`] holds no
//! session state of its own: each session's stream and graph live in a
//! [`RenderSlot`] shared with the control side. The renderer only ever
//! `try_lock`s a slot, so a session whose topology is being rebuilt sits
//! out that one block instead of stalling the callback.
//!
//! Slots arrive and leave through a wait-free command ring. A removed slot
//! travels back on a second ring so its graph and stream are freed in the
//! control context.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use uuid::Uuid;

use super::stream::{CapturedStream, EndedNotice};
use super::SourceId;
use crate::engine::AudioBuffer;
use crate::graph::AudioGraph;

/// Capacity of the command and retire rings
pub(crate) const RENDER_QUEUE_CAPACITY: usize = 64;

/// Sessions the renderer holds before its slot list has to grow
const SLOT_CAPACITY: usize = 32;

// ============================================================================
// Slots
// ============================================================================

/// The part of a session the audio callback touches
pub(crate) struct RenderSlot {
    pub(crate) source: SourceId,
    pub(crate) session: Uuid,
    pub(crate) stream: Box<dyn CapturedStream>,
    /// Cleared once the end of the stream has been reported
    pub(crate) stream_active: bool,
    pub(crate) graph: AudioGraph,
    pub(crate) input: AudioBuffer,
    /// Mixed into the destination
    pub(crate) connected: bool,
}

impl RenderSlot {
    pub(crate) fn new(
        source: SourceId,
        session: Uuid,
        stream: Box<dyn CapturedStream>,
        graph: AudioGraph,
    ) -> Self {
        let input = AudioBuffer::with_channels(
            stream.channel_count().max(1),
            graph.block_size(),
            graph.sample_rate(),
        );
        Self {
            source,
            session,
            stream,
            stream_active: true,
            graph,
            input,
            connected: true,
        }
    }
}

pub(crate) type SharedSlot = Arc<Mutex<RenderSlot>>;

/// Control-to-audio requests
pub(crate) enum RenderCommand {
    Install { session: Uuid, slot: SharedSlot },
    Remove { session: Uuid },
}

/// Control-side ends of the renderer's rings
pub(crate) struct RenderLink {
    pub(crate) commands: rtrb::Producer<RenderCommand>,
    pub(crate) retired: rtrb::Consumer<SharedSlot>,
}

impl RenderLink {
    /// Free slots the renderer has let go of; returns how many
    pub(crate) fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while self.retired.pop().is_ok() {
            count += 1;
        }
        count
    }
}

/// Create a connected control link and renderer
pub(crate) fn render_pair(ended: Sender<EndedNotice>) -> (RenderLink, SessionRenderer) {
    let (command_tx, command_rx) = rtrb::RingBuffer::new(RENDER_QUEUE_CAPACITY);
    let (retired_tx, retired_rx) = rtrb::RingBuffer::new(RENDER_QUEUE_CAPACITY);

    let link = RenderLink {
        commands: command_tx,
        retired: retired_rx,
    };
    let renderer = SessionRenderer {
        commands: command_rx,
        retired: retired_tx,
        ended,
        slots: Vec::with_capacity(SLOT_CAPACITY),
        skipped_blocks: 0,
    };
    (link, renderer)
}

// ============================================================================
// Renderer
// ============================================================================

/// Renders every session into the destination, once per render quantum
///
/// Move it to the audio callback. It never blocks and, below
/// 32 concurrent sessions, never allocates.
pub struct SessionRenderer {
    commands: rtrb::Consumer<RenderCommand>,
    retired: rtrb::Producer<SharedSlot>,
    ended: Sender<EndedNotice>,
    slots: Vec<(Uuid, SharedSlot)>,
    skipped_blocks: u64,
}

impl SessionRenderer {
    /// Sessions currently rendered
    pub fn session_count(&self) -> usize {
        self.slots.len()
    }

    /// Session blocks skipped because the control side held the slot
    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks
    }

    /// Render one block of every session into `output`
    ///
    /// `output` is cleared first and must hold one block of the configured
    /// size.
    pub fn process_block(&mut self, output: &mut AudioBuffer) {
        self.apply_commands();
        output.fill_silence();

        for (_, shared) in &self.slots {
            let Some(mut guard) = shared.try_lock() else {
                self.skipped_blocks += 1;
                continue;
            };
            let slot = &mut *guard;

            if !slot.stream.read(&mut slot.input) && slot.stream_active {
                slot.stream_active = false;
                let _ = self.ended.try_send(EndedNotice {
                    source: slot.source,
                    session: slot.session,
                });
            }
            let rendered = slot.graph.render(&slot.input);
            if slot.connected {
                output.mix_from(rendered);
            }
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                RenderCommand::Install { session, slot } => self.slots.push((session, slot)),
                RenderCommand::Remove { session } => {
                    if let Some(index) = self.slots.iter().position(|(id, _)| *id == session) {
                        let (_, slot) = self.slots.remove(index);
                        // Dropped here only if the control side stopped collecting
                        let _ = self.retired.push(slot);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRenderer")
            .field("sessions", &self.slots.len())
            .field("skipped_blocks", &self.skipped_blocks)
            .finish()
    }
}
