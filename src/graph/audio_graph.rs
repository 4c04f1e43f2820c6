//! Node arena, render plan and block renderer

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::edges::{Edge, EdgeDelta, EdgeSet};
use super::node::{AudioNode, ChannelMode, NodeId, NodeKind, PassThrough};
use crate::engine::AudioBuffer;
use crate::error::{Result, TabFxError};

// ============================================================================
// Node Slot
// ============================================================================

/// One arena entry: the node plus everything the render plan needs for it
struct NodeSlot {
    node: Box<dyn AudioNode>,
    modes: Vec<ChannelMode>,
    /// Per input port, the `(node, output)` pairs mixed into it
    sources: Vec<Vec<(NodeId, usize)>>,
    inputs: Vec<AudioBuffer>,
    outputs: Vec<AudioBuffer>,
    live: bool,
}

impl NodeSlot {
    fn new(node: Box<dyn AudioNode>, sample_rate: u32, block_size: usize) -> Self {
        let num_inputs = node.num_inputs();
        let num_outputs = node.num_outputs();
        Self {
            modes: (0..num_inputs).map(|i| node.input_mode(i)).collect(),
            sources: vec![Vec::new(); num_inputs],
            inputs: vec![AudioBuffer::with_channels(1, block_size, sample_rate); num_inputs],
            outputs: vec![AudioBuffer::with_channels(1, block_size, sample_rate); num_outputs],
            live: false,
            node,
        }
    }
}

// ============================================================================
// Description
// ============================================================================

/// Serializable snapshot of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescription {
    pub id: NodeId,
    pub kind: NodeKind,
    pub live: bool,
    /// Channel count of each output port, as resolved by the last compile
    pub channels: Vec<usize>,
}

/// Serializable snapshot of a whole graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDescription {
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<Edge>,
    /// Render order of the live nodes
    pub order: Vec<NodeId>,
}

// ============================================================================
// Audio Graph
// ============================================================================

/// Directed signal-processing graph for one capture session
///
/// Mutation (adding nodes, changing edges, switching channel modes) happens in
/// the control context and marks the graph dirty; [`commit`](Self::commit)
/// then compiles a render plan. [`render`](Self::render) only walks that plan,
/// so it never allocates.
pub struct AudioGraph {
    sample_rate: u32,
    block_size: usize,
    slots: Vec<Option<NodeSlot>>,
    edges: EdgeSet,
    source: NodeId,
    sink: NodeId,
    order: Vec<NodeId>,
    silence: AudioBuffer,
    dirty: bool,
}

impl AudioGraph {
    /// Create a graph with its source and sink boundary nodes
    pub fn new(sample_rate: u32, block_size: usize, source_channels: usize) -> Self {
        let mut graph = Self {
            sample_rate,
            block_size,
            slots: Vec::new(),
            edges: EdgeSet::new(),
            source: NodeId(0),
            sink: NodeId(0),
            order: Vec::new(),
            silence: AudioBuffer::with_channels(1, block_size, sample_rate),
            dirty: true,
        };
        graph.source = graph.add_node(PassThrough::source(source_channels));
        graph.sink = graph.add_node(PassThrough::new(NodeKind::Sink));
        graph.compile();
        graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Entry node fed with captured audio
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Exit node read by the destination
    pub fn sink(&self) -> NodeId {
        self.sink
    }

    /// Insert a node into the arena. It stays unconnected until an edge names it.
    pub fn add_node<N: AudioNode + 'static>(&mut self, node: N) -> NodeId {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn AudioNode>) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        debug!(node = %id, kind = %node.kind(), "Adding graph node");
        self.slots
            .push(Some(NodeSlot::new(node, self.sample_rate, self.block_size)));
        id
    }

    /// Estrange and drop a node. The source and sink cannot be removed.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Box<dyn AudioNode>> {
        if id == self.source || id == self.sink {
            return None;
        }
        let slot = self.slots.get_mut(id.index())?.take()?;
        let removed = self.edges.estrange(id);
        debug!(node = %id, kind = %slot.node.kind(), edges = removed, "Removed graph node");
        self.dirty = true;
        Some(slot.node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.slot(id).map(|slot| slot.node.kind())
    }

    /// Typed access to a node
    pub fn node<T: 'static>(&self, id: NodeId) -> Option<&T> {
        self.slot(id)?.node.as_any().downcast_ref::<T>()
    }

    /// Typed mutable access to a node
    pub fn node_mut<T: 'static>(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())?
            .as_mut()?
            .node
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Number of nodes in the arena, live or not
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Override how an input port resolves its channel count
    pub fn set_input_mode(&mut self, id: NodeId, input: usize, mode: ChannelMode) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| TabFxError::invalid("node", id, "a node in this graph"))?;
        let current = slot
            .modes
            .get_mut(input)
            .ok_or_else(|| TabFxError::invalid("input", input, "an existing input port"))?;
        if *current != mode {
            *current = mode;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn input_mode(&self, id: NodeId, input: usize) -> Option<ChannelMode> {
        self.slot(id)?.modes.get(input).copied()
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    pub fn edges(&self) -> &EdgeSet {
        &self.edges
    }

    /// Add an edge, returning false if it already existed
    pub fn connect(&mut self, edge: Edge) -> Result<bool> {
        let from = self
            .slot(edge.from)
            .ok_or_else(|| TabFxError::invalid("from", edge.from, "a node in this graph"))?;
        if edge.output >= from.outputs.len() {
            return Err(TabFxError::invalid("output", edge.output, "an existing output port"));
        }
        let to = self
            .slot(edge.to)
            .ok_or_else(|| TabFxError::invalid("to", edge.to, "a node in this graph"))?;
        if edge.input >= to.inputs.len() {
            return Err(TabFxError::invalid("input", edge.input, "an existing input port"));
        }

        let added = self.edges.insert(edge);
        self.dirty |= added;
        Ok(added)
    }

    /// Remove an edge, returning false if it was not present
    pub fn disconnect(&mut self, edge: &Edge) -> bool {
        let removed = self.edges.remove(edge);
        self.dirty |= removed;
        removed
    }

    /// Remove every edge touching `id`
    pub fn estrange(&mut self, id: NodeId) -> usize {
        let removed = self.edges.estrange(id);
        self.dirty |= removed > 0;
        removed
    }

    /// Move the edges owned by one caller from `current` to `desired`
    ///
    /// Only the difference is applied: edges in both sets are left alone, so
    /// nodes on unchanged paths keep running without a gap. `current` is
    /// replaced by `desired` and the plan is recompiled if anything changed.
    pub fn sync_edges(&mut self, current: &mut EdgeSet, desired: EdgeSet) -> EdgeDelta {
        let (to_remove, to_add) = current.diff(&desired);
        let mut delta = EdgeDelta::default();

        for edge in &to_remove {
            if self.disconnect(edge) {
                delta.removed += 1;
            }
        }
        for edge in to_add {
            match self.connect(edge) {
                Ok(true) => delta.added += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, ?edge, "Skipping invalid edge"),
            }
        }

        *current = desired;
        if !delta.is_empty() {
            debug!(added = delta.added, removed = delta.removed, "Synced graph edges");
        }
        self.commit();
        delta
    }

    // ------------------------------------------------------------------------
    // Render Plan
    // ------------------------------------------------------------------------

    /// True if a mutation has not been compiled yet
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recompile the render plan if anything changed since the last compile
    pub fn commit(&mut self) {
        if self.dirty {
            self.compile();
        }
    }

    fn compile(&mut self) {
        // Ancestors of the sink are the only nodes worth rendering
        let mut live = BTreeSet::new();
        let mut stack = vec![self.sink];
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            stack.extend(
                self.edges
                    .incoming(id)
                    .map(|e| e.from)
                    .filter(|from| self.contains(*from)),
            );
        }

        let mut indegree: BTreeMap<NodeId, usize> = live.iter().map(|&id| (id, 0)).collect();
        for edge in self
            .edges
            .iter()
            .filter(|e| live.contains(&e.from) && live.contains(&e.to))
        {
            *indegree.entry(edge.to).or_default() += 1;
        }

        let mut ready: BTreeSet<NodeId> = indegree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(live.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for edge in self.edges.outgoing(id) {
                if let Some(degree) = indegree.get_mut(&edge.to) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(edge.to);
                    }
                }
            }
        }
        if order.len() < live.len() {
            warn!(
                skipped = live.len() - order.len(),
                "Graph contains a cycle; nodes on it are not rendered"
            );
        }

        for slot in self.slots.iter_mut().flatten() {
            slot.live = false;
            slot.sources.iter_mut().for_each(Vec::clear);
        }

        for &id in &order {
            let Some(mut slot) = self.slots[id.index()].take() else {
                continue;
            };

            let mut input_channels = Vec::with_capacity(slot.inputs.len());
            for (port, mode) in slot.modes.iter().enumerate() {
                let sources: Vec<(NodeId, usize)> = self
                    .edges
                    .incoming(id)
                    .filter(|e| e.input == port)
                    .map(|e| (e.from, e.output))
                    .collect();
                let channels = match *mode {
                    ChannelMode::Explicit(n) => n.max(1),
                    ChannelMode::Max => sources
                        .iter()
                        .filter_map(|&(from, output)| self.output_channels(from, output))
                        .max()
                        .unwrap_or(1),
                };
                input_channels.push(channels);
                slot.sources[port] = sources;
            }

            slot.node
                .prepare(self.sample_rate, self.block_size, &input_channels);
            for (buffer, &channels) in slot.inputs.iter_mut().zip(&input_channels) {
                buffer.resize(channels, self.block_size);
            }
            for (output, buffer) in slot.outputs.iter_mut().enumerate() {
                let channels = slot.node.output_channels(&input_channels, output).max(1);
                buffer.resize(channels, self.block_size);
            }
            slot.live = true;

            self.slots[id.index()] = Some(slot);
        }

        debug!(live = order.len(), edges = self.edges.len(), "Compiled render plan");
        self.order = order;
        self.dirty = false;
    }

    /// Channel count of a node's output as of the last compile
    pub fn output_channels(&self, id: NodeId, output: usize) -> Option<usize> {
        self.slot(id)?.outputs.get(output).map(AudioBuffer::channels)
    }

    /// Render order of the nodes that reach the sink
    pub fn live_nodes(&self) -> &[NodeId] {
        &self.order
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.slot(id).map_or(false, |slot| slot.live)
    }

    /// Number of live nodes of the given kind
    pub fn count_live(&self, kind: NodeKind) -> usize {
        self.order
            .iter()
            .filter(|&&id| self.kind(id) == Some(kind))
            .count()
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Run one block through the graph and return what reached the sink
    ///
    /// Uses the last committed plan. Does not allocate.
    pub fn render(&mut self, input: &AudioBuffer) -> &AudioBuffer {
        for position in 0..self.order.len() {
            let id = self.order[position];
            let Some(mut slot) = self.slots[id.index()].take() else {
                continue;
            };

            if id == self.source {
                if let Some(output) = slot.outputs.first_mut() {
                    output.copy_from(input);
                }
            } else {
                for (buffer, sources) in slot.inputs.iter_mut().zip(&slot.sources) {
                    buffer.fill_silence();
                    for &(from, output) in sources {
                        if let Some(Some(source)) = self.slots.get(from.index()) {
                            if let Some(rendered) = source.outputs.get(output) {
                                buffer.mix_from(rendered);
                            }
                        }
                    }
                }
                slot.node.process(&slot.inputs, &mut slot.outputs);
            }

            self.slots[id.index()] = Some(slot);
        }

        match self.slot(self.sink).and_then(|slot| slot.outputs.first()) {
            Some(output) => output,
            None => &self.silence,
        }
    }

    /// Clear the state of every node
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.node.reset();
        }
    }

    /// Snapshot for logging and the CLI
    pub fn describe(&self) -> GraphDescription {
        let nodes = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref().map(|slot| NodeDescription {
                    id: NodeId(index as u32),
                    kind: slot.node.kind(),
                    live: slot.live,
                    channels: slot.outputs.iter().map(AudioBuffer::channels).collect(),
                })
            })
            .collect();

        GraphDescription {
            nodes,
            edges: self.edges.iter().copied().collect(),
            order: self.order.clone(),
        }
    }

    fn slot(&self, id: NodeId) -> Option<&NodeSlot> {
        self.slots.get(id.index())?.as_ref()
    }
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraph")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("nodes", &self.node_count())
            .field("edges", &self.edges.len())
            .field("live", &self.order.len())
            .finish()
    }
}
