//! Capture Session Manager
//!
//! Owns every capture session and is the only place sessions are created,
//! reconfigured or torn down. It runs in the control context; its audio
//! counterpart is the [`SessionRenderer`] returned alongside it by
//! [`CaptureSessionManager::new`].
//!
//! ## Contexts
//!
//! - Control context: `capture`, `release`, `apply_config`, the reverse
//!   surface and `poll`. All graph mutation happens here, under the lock of
//!   the session's render slot.
//! - Audio context: [`SessionRenderer::process_block`], once per render
//!   quantum. It never allocates or blocks.
//!
//! Sessions reach the renderer through a wait-free command ring.
//! Stream-ended notices and reverse events travel back through a bounded
//! channel and the reverse rings, drained by `poll`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control::{CaptureStatus, ControlRequest, ControlResponse, ReverseMessage};
use super::playback::{MediaAction, NullPlaybackController, PlaybackController};
use super::renderer::{
    render_pair, RenderCommand, RenderLink, RenderSlot, SessionRenderer, SharedSlot,
};
use super::stream::{
    CapturedStream, EndedNotice, EndedObserver, RejectingSupplier, StreamSupplier,
};
use super::{MediaKey, SourceId, StreamToken};
use crate::config::{CaptureConfig, EngineSettings};
use crate::dsp::{AccuratePitchLoader, AccuratePitchProvider, ChainContext};
use crate::engine::{reverse_pair, ReverseControl, ReverseEvent, ReverseState};
use crate::error::{Result, TabFxError};
use crate::graph::{AudioGraph, EdgeDelta, EdgeSet, EffectGraphBuilder, GraphDescription, NodeId};

/// Stream-ended notices held until the next `poll`
const ENDED_QUEUE_CAPACITY: usize = 64;

// ============================================================================
// Session State
// ============================================================================

/// Reverse sub-session supervised by the manager
struct ReverseSession {
    node: NodeId,
    control: ReverseControl,
    port: Sender<ReverseMessage>,
    /// Media paused on begin, resumed when playback starts
    paused: Vec<MediaKey>,
    playing_sent: bool,
    released_sent: bool,
}

struct CaptureSession {
    id: Uuid,
    /// Stream and graph, shared with the renderer
    slot: SharedSlot,
    builder: EffectGraphBuilder,
    config: CaptureConfig,
    /// Edges from the builder output to the graph sink
    sink_edges: EdgeSet,
    reverse: Option<ReverseSession>,
}

/// What a call to [`CaptureSessionManager::poll`] handled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Sessions released because their stream ended
    pub released: Vec<SourceId>,
    /// Messages forwarded to reverse control ports
    pub forwarded: usize,
    /// Reverse sub-sessions torn down after finishing
    pub reverse_finished: Vec<SourceId>,
}

impl PollSummary {
    pub fn is_idle(&self) -> bool {
        self.released.is_empty() && self.forwarded == 0 && self.reverse_finished.is_empty()
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Per-source capture sessions and the shared destination
pub struct CaptureSessionManager {
    settings: EngineSettings,
    ctx: ChainContext,
    supplier: Box<dyn StreamSupplier>,
    playback: Box<dyn PlaybackController>,
    sessions: BTreeMap<SourceId, CaptureSession>,
    /// Configs pushed before capture; latest wins
    pending: HashMap<SourceId, CaptureConfig>,
    /// Sessions mixed into the destination
    destination: BTreeSet<SourceId>,
    subscribers: Vec<Sender<CaptureStatus>>,
    render: RenderLink,
    ended_tx: Sender<EndedNotice>,
    ended_rx: Receiver<EndedNotice>,
    /// Ports opened by `REVERSE_BEGIN` requests
    reverse_ports: HashMap<SourceId, Receiver<ReverseMessage>>,
}

impl CaptureSessionManager {
    /// Create a manager with no stream supplier, no page access and no
    /// accurate pitch module, together with the renderer for the audio
    /// callback
    pub fn new(settings: EngineSettings) -> (Self, SessionRenderer) {
        let ctx = ChainContext::new(&settings, AccuratePitchProvider::unavailable());
        let (ended_tx, ended_rx) = crossbeam_channel::bounded(ENDED_QUEUE_CAPACITY);
        let (render, renderer) = render_pair(ended_tx.clone());
        let manager = Self {
            settings,
            ctx,
            supplier: Box::new(RejectingSupplier),
            playback: Box::new(NullPlaybackController),
            sessions: BTreeMap::new(),
            pending: HashMap::new(),
            destination: BTreeSet::new(),
            subscribers: Vec::new(),
            render,
            ended_tx,
            ended_rx,
            reverse_ports: HashMap::new(),
        };
        (manager, renderer)
    }

    /// Supplier used by token-based `CAPTURE` requests
    pub fn with_supplier(mut self, supplier: impl StreamSupplier + 'static) -> Self {
        self.supplier = Box::new(supplier);
        self
    }

    pub fn with_playback(mut self, playback: impl PlaybackController + 'static) -> Self {
        self.playback = Box::new(playback);
        self
    }

    pub fn with_accurate_loader(mut self, loader: Arc<dyn AccuratePitchLoader>) -> Self {
        self.ctx = ChainContext::new(&self.settings, AccuratePitchProvider::new(loader));
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resources shared by every session's chains
    pub fn context(&self) -> &ChainContext {
        &self.ctx
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn is_capturing(&self, source: SourceId) -> bool {
        self.sessions.contains_key(&source)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_id(&self, source: SourceId) -> Option<Uuid> {
        self.sessions.get(&source).map(|s| s.id)
    }

    /// True if the session's output reaches the destination
    pub fn is_connected(&self, source: SourceId) -> bool {
        self.destination.contains(&source)
    }

    pub fn connected_count(&self) -> usize {
        self.destination.len()
    }

    /// The session's graph
    ///
    /// The guard holds the session's render slot: the session sits out any
    /// block rendered while it is alive.
    pub fn graph(&self, source: SourceId) -> Option<MappedMutexGuard<'_, AudioGraph>> {
        self.sessions
            .get(&source)
            .map(|s| MutexGuard::map(s.slot.lock(), |slot| &mut slot.graph))
    }

    pub fn builder(&self, source: SourceId) -> Option<&EffectGraphBuilder> {
        self.sessions.get(&source).map(|s| &s.builder)
    }

    pub fn config(&self, source: SourceId) -> Option<&CaptureConfig> {
        self.sessions.get(&source).map(|s| &s.config)
    }

    pub fn pending_config(&self, source: SourceId) -> Option<&CaptureConfig> {
        self.pending.get(&source)
    }

    pub fn describe(&self, source: SourceId) -> Option<GraphDescription> {
        self.graph(source).map(|graph| graph.describe())
    }

    /// State of the source's reverse sub-session, if one exists
    pub fn reverse_state(&self, source: SourceId) -> Option<ReverseState> {
        self.sessions
            .get(&source)
            .and_then(|s| s.reverse.as_ref())
            .map(|r| r.control.state())
    }

    /// Control port opened by a `REVERSE_BEGIN` request, while its
    /// sub-session lasts
    pub fn reverse_port(&self, source: SourceId) -> Option<Receiver<ReverseMessage>> {
        self.reverse_ports.get(&source).cloned()
    }

    /// Receive a [`CaptureStatus`] for every start and stop
    pub fn subscribe(&mut self) -> Receiver<CaptureStatus> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    // ------------------------------------------------------------------------
    // Capture Lifecycle
    // ------------------------------------------------------------------------

    /// Start capturing `source` with a stream from `supply`
    ///
    /// Succeeds without calling `supply` if the source is already captured.
    pub fn capture<F>(&mut self, source: SourceId, supply: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn CapturedStream>>,
    {
        if self.sessions.contains_key(&source) {
            debug!(source = %source, "Already capturing");
            return Ok(());
        }
        self.check_render_room(source)?;
        let stream = supply().inspect_err(|e| {
            warn!(source = %source, error = %e, "Stream acquisition failed");
        })?;
        self.install(source, stream);
        Ok(())
    }

    /// Start capturing `source` through the installed supplier
    pub fn capture_with_token(&mut self, source: SourceId, token: &StreamToken) -> Result<()> {
        if self.sessions.contains_key(&source) {
            debug!(source = %source, "Already capturing");
            return Ok(());
        }
        self.check_render_room(source)?;
        let stream = self.supplier.acquire(source, token).inspect_err(|e| {
            warn!(source = %source, error = %e, "Stream acquisition failed");
        })?;
        self.install(source, stream);
        Ok(())
    }

    /// Refuse a capture the renderer cannot be told about
    fn check_render_room(&self, source: SourceId) -> Result<()> {
        if self.render.commands.is_full() {
            warn!(source = %source, "Renderer has not drained its commands");
            return Err(TabFxError::RenderQueueFull { source_id: source });
        }
        Ok(())
    }

    fn install(&mut self, source: SourceId, mut stream: Box<dyn CapturedStream>) {
        let id = Uuid::new_v4();
        stream.observe_end(EndedObserver::new(source, id, self.ended_tx.clone()));
        let channels = stream.channel_count().max(1);

        let mut graph =
            AudioGraph::new(self.settings.sample_rate, self.settings.block_size, channels);
        let mut builder = EffectGraphBuilder::new(&mut graph);
        let config = self.pending.remove(&source).unwrap_or_default();
        builder.update_topology(&mut graph, &config, &self.ctx);
        let mut sink_edges = EdgeSet::new();
        route_to_sink(&mut graph, builder.output(), None, &mut sink_edges);

        let slot = Arc::new(Mutex::new(RenderSlot::new(source, id, stream, graph)));
        let command = RenderCommand::Install {
            session: id,
            slot: Arc::clone(&slot),
        };
        if self.render.commands.push(command).is_err() {
            warn!(source = %source, session = %id, "Renderer command queue full");
        }

        info!(source = %source, session = %id, channels, "Capture started");
        self.sessions.insert(
            source,
            CaptureSession {
                id,
                slot,
                builder,
                config,
                sink_edges,
                reverse: None,
            },
        );
        self.destination.insert(source);
        self.broadcast(source, true);
    }

    /// Stop capturing `source`
    ///
    /// Ends any reverse sub-session, disconnects the graph and stops the
    /// stream. The session is silent at the destination as soon as this
    /// returns. Returns false if there was nothing to release.
    pub fn release(&mut self, source: SourceId) -> bool {
        let Some(mut session) = self.sessions.remove(&source) else {
            return false;
        };
        if session.reverse.is_some() {
            teardown_reverse(source, &mut session, self.playback.as_mut());
        }
        self.destination.remove(&source);
        self.reverse_ports.remove(&source);

        let detached = {
            let mut slot = session.slot.lock();
            slot.connected = false;
            slot.stream_active = false;
            let detached = session.builder.detach(&mut slot.graph);
            slot.graph
                .sync_edges(&mut session.sink_edges, EdgeSet::new());
            slot.stream.stop();
            detached
        };
        let command = RenderCommand::Remove {
            session: session.id,
        };
        if self.render.commands.push(command).is_err() {
            warn!(source = %source, session = %session.id, "Renderer command queue full");
        }

        info!(
            source = %source,
            session = %session.id,
            edges = detached.removed,
            "Capture released"
        );
        self.broadcast(source, false);
        true
    }

    /// Release every session; returns how many there were
    pub fn release_all(&mut self) -> usize {
        let sources: Vec<SourceId> = self.sessions.keys().copied().collect();
        sources
            .into_iter()
            .filter(|&source| self.release(source))
            .count()
    }

    fn broadcast(&mut self, source: SourceId, active: bool) {
        let status = CaptureStatus::now(source, active);
        self.subscribers
            .retain(|subscriber| subscriber.send(status.clone()).is_ok());
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Apply effect parameters to `source`
    ///
    /// Without a session the config is kept until capture starts and `None`
    /// is returned. Invalid configs are logged and ignored.
    pub fn apply_config(&mut self, source: SourceId, config: CaptureConfig) -> Option<EdgeDelta> {
        if let Err(e) = config.validate() {
            warn!(source = %source, error = %e, "Ignoring invalid config");
            return None;
        }

        let Some(session) = self.sessions.get_mut(&source) else {
            debug!(source = %source, "Queued config until capture starts");
            self.pending.insert(source, config);
            return None;
        };

        let delta = {
            let mut slot = session.slot.lock();
            session
                .builder
                .update_topology(&mut slot.graph, &config, &self.ctx)
        };
        session.config = config;
        Some(delta)
    }

    // ------------------------------------------------------------------------
    // Reverse Surface
    // ------------------------------------------------------------------------

    /// Insert a reverse stage between the session's output and the sink
    ///
    /// Other media playing on the source, except `origin`, is paused until
    /// the reversed clip starts. Messages for the requester go to `port`.
    pub fn begin_reverse(
        &mut self,
        source: SourceId,
        port: Sender<ReverseMessage>,
        origin: Option<MediaKey>,
    ) -> Result<()> {
        self.service_reverse(source);

        let session = self
            .sessions
            .get_mut(&source)
            .ok_or(TabFxError::SessionNotFound { source_id: source })?;
        if session.reverse.is_some() {
            return Err(TabFxError::ReverseActive { source_id: source });
        }

        let paused: Vec<MediaKey> = self
            .playback
            .playing_media(source)
            .into_iter()
            .filter(|media| Some(media) != origin.as_ref())
            .collect();
        for media in &paused {
            self.playback.send(source, media, MediaAction::Pause);
        }

        let output = session.builder.output();
        let mut slot = session.slot.lock();
        let channels = slot.graph.output_channels(output, 0).unwrap_or(1);
        let (node, control) =
            reverse_pair(channels, &self.settings.reverse, slot.graph.sample_rate());
        let node = slot.graph.add_node(node);
        route_to_sink(&mut slot.graph, output, Some(node), &mut session.sink_edges);
        drop(slot);

        info!(source = %source, channels, paused = paused.len(), "Reverse started");
        session.reverse = Some(ReverseSession {
            node,
            control,
            port,
            paused,
            playing_sent: false,
            released_sent: false,
        });
        Ok(())
    }

    /// Start reverse playback now instead of waiting for silence
    pub fn notify_play_requested(&mut self, source: SourceId) -> Result<()> {
        let reverse = self
            .sessions
            .get_mut(&source)
            .and_then(|s| s.reverse.as_mut())
            .ok_or(TabFxError::ReverseInactive { source_id: source })?;
        if !reverse.control.request_play() {
            warn!(source = %source, "Reverse command queue full");
        }
        Ok(())
    }

    /// Stop the reverse sub-session and reconnect the main path
    pub fn end_reverse(&mut self, source: SourceId) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&source)
            .ok_or(TabFxError::SessionNotFound { source_id: source })?;
        if session.reverse.is_none() {
            return Err(TabFxError::ReverseInactive { source_id: source });
        }
        teardown_reverse(source, session, self.playback.as_mut());
        self.reverse_ports.remove(&source);
        Ok(())
    }

    /// Forward pending reverse events; tear the sub-session down once it
    /// has released. Returns the number of messages forwarded and whether
    /// it was torn down.
    fn service_reverse(&mut self, source: SourceId) -> (usize, bool) {
        let Some(session) = self.sessions.get_mut(&source) else {
            return (0, false);
        };
        let Some(reverse) = session.reverse.as_mut() else {
            return (0, false);
        };

        let forwarded = forward_events(source, reverse, self.playback.as_mut());
        if reverse.released_sent {
            teardown_reverse(source, session, self.playback.as_mut());
            self.reverse_ports.remove(&source);
            return (forwarded, true);
        }
        (forwarded, false)
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Control-context tick
    ///
    /// Releases sessions whose stream ended, services reverse sessions and
    /// frees slots the renderer has dropped. A notice from a session that
    /// has since been released is ignored, even if the source was captured
    /// again.
    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();
        self.render.collect_retired();

        let notices: Vec<EndedNotice> = self.ended_rx.try_iter().collect();
        for notice in notices {
            if self.session_id(notice.source) != Some(notice.session) {
                debug!(
                    source = %notice.source,
                    session = %notice.session,
                    "Ignoring end of a released session"
                );
                continue;
            }
            if self.release(notice.source) {
                info!(source = %notice.source, "Stream ended");
                summary.released.push(notice.source);
            }
        }

        let reversing: Vec<SourceId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.reverse.is_some())
            .map(|(&source, _)| source)
            .collect();
        for source in reversing {
            let (forwarded, finished) = self.service_reverse(source);
            summary.forwarded += forwarded;
            if finished {
                summary.reverse_finished.push(source);
            }
        }

        summary
    }

    // ------------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------------

    /// Handle one control-plane request
    pub fn handle(&mut self, request: ControlRequest) -> ControlResponse {
        debug!(?request, "Control request");
        match request {
            ControlRequest::Capture {
                source_id,
                stream_token: Some(token),
            } => match self.capture_with_token(source_id, &token) {
                Ok(()) => ControlResponse::Capture { active: true },
                Err(e) => e.into(),
            },
            ControlRequest::Capture {
                source_id,
                stream_token: None,
            } => {
                self.release(source_id);
                ControlResponse::Capture { active: false }
            }
            ControlRequest::PushConfig { source_id, config } => {
                self.apply_config(source_id, config);
                ControlResponse::Ok
            }
            ControlRequest::SuperDisable => {
                let released = self.release_all();
                info!(released, "Released every session");
                ControlResponse::Ok
            }
            ControlRequest::ReverseBegin { source_id, origin } => {
                let (tx, rx) = crossbeam_channel::unbounded();
                let result = self.begin_reverse(source_id, tx, origin);
                if result.is_ok() {
                    self.reverse_ports.insert(source_id, rx);
                }
                result.into()
            }
            ControlRequest::ReversePlay { source_id } => {
                self.notify_play_requested(source_id).into()
            }
            ControlRequest::ReverseEnd { source_id } => self.end_reverse(source_id).into(),
        }
    }
}

impl std::fmt::Debug for CaptureSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSessionManager")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .field("destination", &self.destination)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Connect the builder output to the sink, through the reverse stage if one
/// is installed
fn route_to_sink(
    graph: &mut AudioGraph,
    output: NodeId,
    reverse: Option<NodeId>,
    sink_edges: &mut EdgeSet,
) {
    let sink = graph.sink();
    let mut desired = EdgeSet::new();
    match reverse {
        Some(node) => desired.chain(&[output, node, sink]),
        None => desired.link(output, sink),
    };
    graph.sync_edges(sink_edges, desired);
}

/// Relay engine events to the port, each kind at most once
fn forward_events(
    source: SourceId,
    reverse: &mut ReverseSession,
    playback: &mut dyn PlaybackController,
) -> usize {
    let mut forwarded = 0;
    while let Some(event) = reverse.control.pop_event() {
        match event {
            ReverseEvent::Playing { frames } if !reverse.playing_sent => {
                reverse.playing_sent = true;
                let _ = reverse.port.send(ReverseMessage::Playing);
                forwarded += 1;
                debug!(source = %source, frames, "Reverse playing");
                resume_paused(source, reverse, playback);
            }
            ReverseEvent::Released if !reverse.released_sent => {
                reverse.released_sent = true;
                let _ = reverse.port.send(ReverseMessage::Released);
                forwarded += 1;
            }
            _ => {}
        }
    }
    forwarded
}

fn resume_paused(
    source: SourceId,
    reverse: &mut ReverseSession,
    playback: &mut dyn PlaybackController,
) {
    for media in reverse.paused.drain(..) {
        playback.send(source, &media, MediaAction::Resume);
    }
}

/// Release the engine, notify the requester once and sever the stage
fn teardown_reverse(
    source: SourceId,
    session: &mut CaptureSession,
    playback: &mut dyn PlaybackController,
) {
    let Some(mut reverse) = session.reverse.take() else {
        return;
    };

    reverse.control.release();
    forward_events(source, &mut reverse, playback);
    if !reverse.released_sent {
        reverse.released_sent = true;
        let _ = reverse.port.send(ReverseMessage::Released);
    }
    resume_paused(source, &mut reverse, playback);

    let output = session.builder.output();
    let mut slot = session.slot.lock();
    slot.graph.remove_node(reverse.node);
    route_to_sink(&mut slot.graph, output, None, &mut session.sink_edges);
    info!(source = %source, "Reverse ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectConfig;
    use crate::engine::AudioBuffer;
    use crate::graph::{Edge, NodeKind};
    use crate::session::renderer::RENDER_QUEUE_CAPACITY;
    use crate::session::ToneStream;
    use pretty_assertions::assert_eq;

    const SOURCE: SourceId = SourceId(1);

    fn settings() -> EngineSettings {
        EngineSettings {
            block_size: 64,
            ..Default::default()
        }
    }

    fn tone() -> Result<Box<dyn CapturedStream>> {
        Ok(Box::new(ToneStream::new(2, 48000, 440.0, 0.5)))
    }

    fn manager() -> (CaptureSessionManager, SessionRenderer) {
        let (mut manager, renderer) = CaptureSessionManager::new(settings());
        manager.capture(SOURCE, tone).unwrap();
        (manager, renderer)
    }

    #[test]
    fn test_capture_wires_destination() {
        let (manager, _renderer) = manager();
        assert!(manager.is_capturing(SOURCE));
        assert!(manager.is_connected(SOURCE));

        let graph = manager.graph(SOURCE).unwrap();
        let output = manager.builder(SOURCE).unwrap().output();
        assert!(graph.edges().contains(&Edge::new(output, graph.sink())));
    }

    #[test]
    fn test_capture_is_idempotent() {
        let (mut manager, _renderer) = manager();
        let id = manager.session_id(SOURCE);
        manager
            .capture(SOURCE, || panic!("supplier must not be called"))
            .unwrap();
        assert_eq!(manager.session_id(SOURCE), id);
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_failed_acquisition_creates_no_session() {
        let (mut manager, _renderer) = CaptureSessionManager::new(settings());
        let result = manager.capture(SOURCE, || {
            Err(TabFxError::StreamAcquisition {
                source_id: SOURCE,
                reason: "denied".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(!manager.is_capturing(SOURCE));
    }

    #[test]
    fn test_pending_config_applied_on_capture() {
        let (mut manager, _renderer) = CaptureSessionManager::new(settings());
        let first = CaptureConfig {
            pan: Some(0.2),
            ..Default::default()
        };
        let latest = CaptureConfig {
            mono_output: true,
            ..Default::default()
        };
        assert!(manager.apply_config(SOURCE, first).is_none());
        assert!(manager.apply_config(SOURCE, latest.clone()).is_none());
        assert_eq!(manager.pending_config(SOURCE), Some(&latest));

        manager.capture(SOURCE, tone).unwrap();
        assert_eq!(manager.config(SOURCE), Some(&latest));
        assert!(manager.pending_config(SOURCE).is_none());
    }

    #[test]
    fn test_invalid_config_ignored() {
        let (mut manager, _renderer) = manager();
        let config = CaptureConfig {
            pan: Some(4.0),
            ..Default::default()
        };
        assert!(manager.apply_config(SOURCE, config).is_none());
        assert_eq!(manager.config(SOURCE), Some(&CaptureConfig::default()));
    }

    #[test]
    fn test_release_detaches_everything() {
        let (mut manager, _renderer) = manager();
        let status = manager.subscribe();
        assert!(manager.release(SOURCE));
        assert!(!manager.release(SOURCE));

        assert!(!manager.is_connected(SOURCE));
        assert_eq!(manager.session_count(), 0);
        let events: Vec<_> = status.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(!events[0].active);
    }

    #[test]
    fn test_renderer_mixes_connected_sessions() {
        let (mut manager, mut renderer) = manager();
        let mut output = AudioBuffer::with_channels(2, 64, 48000);
        renderer.process_block(&mut output);
        renderer.process_block(&mut output);
        assert_eq!(renderer.session_count(), 1);
        assert!(output.peak() > 0.1);

        manager.release(SOURCE);
        renderer.process_block(&mut output);
        assert!(output.is_silent(1e-9));
        assert_eq!(renderer.session_count(), 0);
        manager.poll();
    }

    #[test]
    fn test_renderer_runs_on_another_thread() {
        let (mut manager, mut renderer) = manager();
        let audio = std::thread::spawn(move || {
            let mut output = AudioBuffer::with_channels(2, 64, 48000);
            let mut audible = 0;
            for _ in 0..200 {
                renderer.process_block(&mut output);
                if output.peak() > 0.1 {
                    audible += 1;
                }
            }
            audible
        });

        for i in 0..20 {
            let config = CaptureConfig {
                pan: Some(if i % 2 == 0 { 0.5 } else { -0.5 }),
                ..Default::default()
            };
            manager.apply_config(SOURCE, config);
            manager.poll();
        }

        assert!(audio.join().unwrap() > 0);
        assert!(manager.is_capturing(SOURCE));
    }

    #[test]
    fn test_stream_end_releases_on_poll() {
        let (mut manager, mut renderer) = CaptureSessionManager::new(settings());
        manager
            .capture(SOURCE, || {
                Ok(Box::new(ToneStream::new(1, 48000, 440.0, 0.5).ending_after(64)))
            })
            .unwrap();

        let mut output = AudioBuffer::with_channels(2, 64, 48000);
        renderer.process_block(&mut output);
        renderer.process_block(&mut output);

        let summary = manager.poll();
        assert_eq!(summary.released, vec![SOURCE]);
        assert!(!manager.is_capturing(SOURCE));
        assert!(manager.poll().is_idle());
    }

    #[test]
    fn test_stale_end_notice_ignored_after_recapture() {
        let (mut manager, mut renderer) = CaptureSessionManager::new(settings());
        manager
            .capture(SOURCE, || {
                Ok(Box::new(ToneStream::new(1, 48000, 440.0, 0.5).ending_after(64)))
            })
            .unwrap();

        let mut output = AudioBuffer::with_channels(2, 64, 48000);
        renderer.process_block(&mut output);
        renderer.process_block(&mut output);

        // The first session's end is still queued when the source comes back
        assert!(manager.release(SOURCE));
        manager.capture(SOURCE, tone).unwrap();
        let session = manager.session_id(SOURCE);

        let summary = manager.poll();
        assert!(summary.released.is_empty());
        assert!(manager.is_capturing(SOURCE));
        assert_eq!(manager.session_id(SOURCE), session);

        renderer.process_block(&mut output);
        assert_eq!(renderer.session_count(), 1);
        assert!(output.peak() > 0.1);
    }

    #[test]
    fn test_reverse_stage_inserted_and_removed() {
        let (mut manager, _renderer) = manager();
        let (tx, rx) = crossbeam_channel::unbounded();
        manager.begin_reverse(SOURCE, tx.clone(), None).unwrap();
        assert!(matches!(
            manager.begin_reverse(SOURCE, tx, None),
            Err(TabFxError::ReverseActive { .. })
        ));

        assert_eq!(
            manager.graph(SOURCE).unwrap().count_live(NodeKind::Reverse),
            1
        );
        assert_eq!(manager.reverse_state(SOURCE), Some(ReverseState::Pre));

        manager.end_reverse(SOURCE).unwrap();
        let graph = manager.graph(SOURCE).unwrap();
        assert_eq!(graph.count_live(NodeKind::Reverse), 0);
        let output = manager.builder(SOURCE).unwrap().output();
        assert!(graph.edges().contains(&Edge::new(output, graph.sink())));
        drop(graph);

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![ReverseMessage::Released]);
        assert!(matches!(
            manager.end_reverse(SOURCE),
            Err(TabFxError::ReverseInactive { .. })
        ));
    }

    #[test]
    fn test_reverse_port_closed_with_sub_session() {
        let (mut manager, mut renderer) = manager();
        let begin = ControlRequest::ReverseBegin {
            source_id: SOURCE,
            origin: None,
        };

        // Ended by request
        assert!(manager.handle(begin.clone()).is_ok());
        let port = manager.reverse_port(SOURCE).unwrap();
        assert!(manager
            .handle(ControlRequest::ReverseEnd { source_id: SOURCE })
            .is_ok());
        assert!(manager.reverse_port(SOURCE).is_none());
        assert_eq!(port.try_iter().collect::<Vec<_>>(), vec![ReverseMessage::Released]);

        // Finished on its own
        assert!(manager.handle(begin).is_ok());
        let port = manager.reverse_port(SOURCE).unwrap();
        manager.notify_play_requested(SOURCE).unwrap();
        let mut output = AudioBuffer::with_channels(2, 64, 48000);
        renderer.process_block(&mut output);

        let summary = manager.poll();
        assert_eq!(summary.reverse_finished, vec![SOURCE]);
        assert!(manager.reverse_port(SOURCE).is_none());
        assert_eq!(
            port.try_iter().collect::<Vec<_>>(),
            vec![ReverseMessage::Playing, ReverseMessage::Released]
        );
    }

    #[test]
    fn test_split_config_through_manager() {
        let (mut manager, _renderer) = manager();
        let config = CaptureConfig {
            secondary: Some(EffectConfig::default()),
            pan: Some(0.5),
            ..Default::default()
        };
        let delta = manager.apply_config(SOURCE, config.clone()).unwrap();
        assert!(!delta.is_empty());
        let again = manager.apply_config(SOURCE, config).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_handle_capture_and_stop() {
        let (manager, _renderer) = CaptureSessionManager::new(settings());
        let mut manager = manager.with_supplier(crate::session::ToneSupplier {
            channels: 2,
            sample_rate: 48000,
            frequency: 440.0,
            amplitude: 0.5,
        });
        let status = manager.subscribe();

        let started = manager.handle(ControlRequest::Capture {
            source_id: SOURCE,
            stream_token: Some(StreamToken::new("grant")),
        });
        assert_eq!(started, ControlResponse::Capture { active: true });
        assert!(manager.is_connected(SOURCE));

        let stopped = manager.handle(ControlRequest::Capture {
            source_id: SOURCE,
            stream_token: None,
        });
        assert_eq!(stopped, ControlResponse::Capture { active: false });

        let active: Vec<bool> = status.try_iter().map(|s| s.active).collect();
        assert_eq!(active, vec![true, false]);
    }

    #[test]
    fn test_super_disable_releases_all() {
        let (mut manager, _renderer) = manager();
        manager.capture(SourceId(2), tone).unwrap();
        assert_eq!(manager.handle(ControlRequest::SuperDisable), ControlResponse::Ok);
        assert_eq!(manager.session_count(), 0);
        assert_eq!(manager.connected_count(), 0);
    }

    #[test]
    fn test_handle_capture_requires_supplier() {
        let (mut manager, _renderer) = CaptureSessionManager::new(settings());
        let response = manager.handle(ControlRequest::Capture {
            source_id: SOURCE,
            stream_token: Some(StreamToken::new("grant")),
        });
        assert!(!response.is_ok());
        assert!(!manager.is_capturing(SOURCE));
    }

    #[test]
    fn test_capture_refused_while_renderer_stalled() {
        let (mut manager, _renderer) = CaptureSessionManager::new(settings());
        // Every capture and release queues one command
        for _ in 0..RENDER_QUEUE_CAPACITY / 2 {
            manager.capture(SOURCE, tone).unwrap();
            assert!(manager.release(SOURCE));
        }
        let err = manager.capture(SOURCE, tone).unwrap_err();
        assert_eq!(err.error_code(), "RENDER_QUEUE_FULL");
        assert!(!manager.is_capturing(SOURCE));
    }
}
