//! Effect graph builder
//!
//! Turns a [`CaptureConfig`] into the edges of a session graph: either one
//! effect chain, or a stereo split into two chains merged back together,
//! optionally followed by a panner and a mono downmix.

use tracing::debug;

use super::{AudioGraph, ChannelMode, EdgeDelta, EdgeSet, NodeId, NodeKind, PassThrough};
use crate::config::{CaptureConfig, EffectConfig};
use crate::dsp::{ChainContext, ChannelMerger, ChannelSplitter, EffectChain, StereoPanner};

/// Dual-target router owning every node between the graph source and its
/// own output boundary
#[derive(Debug)]
pub struct EffectGraphBuilder {
    output: NodeId,
    splitter: NodeId,
    merger: NodeId,
    panner: NodeId,
    primary: EffectChain,
    secondary: Option<EffectChain>,
    /// Edges currently installed by this builder
    edges: EdgeSet,
}

impl EffectGraphBuilder {
    /// Create the builder's fixed nodes in `graph`. Nothing is connected yet.
    pub fn new(graph: &mut AudioGraph) -> Self {
        Self {
            output: graph.add_node(PassThrough::new(NodeKind::GraphOutput)),
            splitter: graph.add_node(ChannelSplitter),
            merger: graph.add_node(ChannelMerger),
            panner: graph.add_node(StereoPanner::default()),
            primary: EffectChain::new(graph),
            secondary: None,
            edges: EdgeSet::new(),
        }
    }

    /// Boundary the processed signal leaves through
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn primary(&self) -> &EffectChain {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&EffectChain> {
        self.secondary.as_ref()
    }

    pub fn splitter(&self) -> NodeId {
        self.splitter
    }

    pub fn merger(&self) -> NodeId {
        self.merger
    }

    pub fn panner(&self) -> NodeId {
        self.panner
    }

    /// Edges installed by the last update
    pub fn edges(&self) -> &EdgeSet {
        &self.edges
    }

    /// Re-synthesize the topology for `config`
    ///
    /// Only edges that differ from the installed ones are touched, so an
    /// identical config yields an empty delta.
    pub fn update_topology(
        &mut self,
        graph: &mut AudioGraph,
        config: &CaptureConfig,
        ctx: &ChainContext,
    ) -> EdgeDelta {
        let desired = self.synthesize(graph, config, ctx);
        let mode = if config.is_mono() {
            ChannelMode::Explicit(1)
        } else {
            ChannelMode::Max
        };
        if let Err(e) = graph.set_input_mode(self.output, 0, mode) {
            debug!(error = %e, "Output boundary missing");
        }

        let delta = graph.sync_edges(&mut self.edges, desired);
        debug!(
            split = config.is_split(),
            pan = ?config.active_pan(),
            mono = config.is_mono(),
            added = delta.added,
            removed = delta.removed,
            "Updated topology"
        );
        delta
    }

    /// Disconnect everything this builder installed
    pub fn detach(&mut self, graph: &mut AudioGraph) -> EdgeDelta {
        graph.sync_edges(&mut self.edges, EdgeSet::new())
    }

    fn synthesize(
        &mut self,
        graph: &mut AudioGraph,
        config: &CaptureConfig,
        ctx: &ChainContext,
    ) -> EdgeSet {
        let mut edges = EdgeSet::new();
        let source = graph.source();

        let mut tail = match config.secondary.as_ref().filter(|_| config.enabled) {
            Some(secondary_config) => {
                let secondary = self
                    .secondary
                    .get_or_insert_with(|| EffectChain::new(graph));
                edges.extend(&secondary.apply(graph, secondary_config, ctx));
                edges.extend(&self.primary.apply(graph, &config.primary, ctx));

                edges
                    .link(source, self.splitter)
                    .link_ports(self.splitter, 0, self.primary.input(), 0)
                    .link_ports(self.splitter, 1, secondary.input(), 0)
                    .link_ports(self.primary.output(), 0, self.merger, 0)
                    .link_ports(secondary.output(), 0, self.merger, 1);
                self.merger
            }
            None => {
                let primary_config = if config.enabled {
                    config.primary.clone()
                } else {
                    EffectConfig {
                        enabled: false,
                        ..config.primary.clone()
                    }
                };
                edges.extend(&self.primary.apply(graph, &primary_config, ctx));
                edges.link(source, self.primary.input());
                self.primary.output()
            }
        };

        if let Some(pan) = config.active_pan() {
            if let Some(panner) = graph.node_mut::<StereoPanner>(self.panner) {
                panner.set_pan(pan);
            }
            edges.link(tail, self.panner);
            tail = self.panner;
        }

        edges.link(tail, self.output);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Edge;
    use pretty_assertions::assert_eq;

    fn setup() -> (AudioGraph, EffectGraphBuilder, ChainContext) {
        let mut graph = AudioGraph::new(48000, 128, 2);
        let builder = EffectGraphBuilder::new(&mut graph);
        let output = builder.output();
        let sink = graph.sink();
        graph.connect(Edge::new(output, sink)).unwrap();
        (graph, builder, ChainContext::default())
    }

    #[test]
    fn test_single_path() {
        let (mut graph, mut builder, ctx) = setup();
        builder.update_topology(&mut graph, &CaptureConfig::default(), &ctx);

        assert!(builder
            .edges()
            .contains(&Edge::new(graph.source(), builder.primary().input())));
        assert!(builder
            .edges()
            .contains(&Edge::new(builder.primary().output(), builder.output())));
        assert!(builder.secondary().is_none());
        assert!(!graph.is_live(builder.splitter()));
        assert_eq!(graph.output_channels(builder.output(), 0), Some(2));
    }

    #[test]
    fn test_split_with_pan() {
        let (mut graph, mut builder, ctx) = setup();
        let config = CaptureConfig {
            secondary: Some(EffectConfig::default()),
            pan: Some(0.5),
            ..Default::default()
        };
        builder.update_topology(&mut graph, &config, &ctx);

        let secondary = builder.secondary().unwrap();
        let edges = builder.edges();
        assert!(edges.contains(&Edge::new(graph.source(), builder.splitter())));
        assert!(edges.contains(&Edge::ports(builder.splitter(), 1, secondary.input(), 0)));
        assert!(edges.contains(&Edge::ports(secondary.output(), 0, builder.merger(), 1)));
        assert!(edges.contains(&Edge::new(builder.merger(), builder.panner())));
        assert!(edges.contains(&Edge::new(builder.panner(), builder.output())));
        assert_eq!(graph.count_live(NodeKind::ChainInput), 2);
        assert_eq!(graph.node::<StereoPanner>(builder.panner()).unwrap().pan(), 0.5);
    }

    #[test]
    fn test_mono_output_constrains_channels() {
        let (mut graph, mut builder, ctx) = setup();
        let config = CaptureConfig {
            mono_output: true,
            ..Default::default()
        };
        builder.update_topology(&mut graph, &config, &ctx);
        assert_eq!(graph.output_channels(builder.output(), 0), Some(1));

        builder.update_topology(&mut graph, &CaptureConfig::default(), &ctx);
        assert_eq!(graph.output_channels(builder.output(), 0), Some(2));
    }

    #[test]
    fn test_identical_config_yields_empty_delta() {
        let (mut graph, mut builder, ctx) = setup();
        let config = CaptureConfig {
            secondary: Some(EffectConfig {
                delay_seconds: 0.2,
                ..Default::default()
            }),
            pan: Some(-0.3),
            ..Default::default()
        };
        let first = builder.update_topology(&mut graph, &config, &ctx);
        assert!(!first.is_empty());
        let second = builder.update_topology(&mut graph, &config, &ctx);
        assert_eq!(second, EdgeDelta::default());
    }

    #[test]
    fn test_switching_back_removes_split() {
        let (mut graph, mut builder, ctx) = setup();
        let split = CaptureConfig {
            secondary: Some(EffectConfig::default()),
            ..Default::default()
        };
        builder.update_topology(&mut graph, &split, &ctx);
        let nodes = graph.node_count();

        builder.update_topology(&mut graph, &CaptureConfig::default(), &ctx);
        assert!(!graph.is_live(builder.merger()));
        assert_eq!(graph.count_live(NodeKind::ChainInput), 1);

        builder.update_topology(&mut graph, &split, &ctx);
        assert_eq!(graph.node_count(), nodes);
    }

    #[test]
    fn test_disabled_config_ignores_secondary_and_pan() {
        let (mut graph, mut builder, ctx) = setup();
        let config = CaptureConfig {
            enabled: false,
            secondary: Some(EffectConfig::default()),
            pan: Some(1.0),
            mono_output: true,
            ..Default::default()
        };
        builder.update_topology(&mut graph, &config, &ctx);
        assert!(builder.secondary().is_none());
        assert!(!graph.is_live(builder.panner()));
        assert_eq!(graph.output_channels(builder.output(), 0), Some(2));
    }

    #[test]
    fn test_detach_removes_builder_edges() {
        let (mut graph, mut builder, ctx) = setup();
        builder.update_topology(&mut graph, &CaptureConfig::default(), &ctx);
        builder.detach(&mut graph);
        assert!(builder.edges().is_empty());
        assert_eq!(graph.edges().len(), 1);
    }
}
