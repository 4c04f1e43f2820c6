//! Effect Chain management
//!
//! One signal path between two fixed boundary nodes. Stages are processed in
//! a fixed order:
//! 1. Pitch (fast or accurate, never both)
//! 2. Equalizer bands
//! 3. Compressor
//! 4. Delay (wet only, or wet plus a dry tap)
//! 5. Output gain
//!
//! A stage node is created the first time a config needs it and kept in the
//! graph afterwards; [`EffectChain::apply`] only decides which of them are
//! linked.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::accurate::{record_failure, AccuratePitchNode, AccuratePitchProvider};
use super::compressor::CompressorNode;
use super::delay::DelayNode;
use super::eq::FilterBankPool;
use super::gain::GainNode;
use super::pitch::{PitchShifter, PitchTableCache};
use crate::config::{EffectConfig, EngineSettings, PitchAlgorithm};
use crate::graph::{AudioGraph, EdgeSet, NodeId, NodeKind, PassThrough};

/// Shared resources every chain draws on
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub pitch_tables: PitchTableCache,
    pub accurate: AccuratePitchProvider,
    pub max_delay_seconds: f32,
    /// Failures after which a chain stops using the accurate unit
    pub accurate_failure_limit: u32,
}

impl ChainContext {
    pub fn new(settings: &EngineSettings, accurate: AccuratePitchProvider) -> Self {
        Self {
            pitch_tables: PitchTableCache::new(),
            accurate,
            max_delay_seconds: settings.max_delay_seconds,
            accurate_failure_limit: settings.accurate_failure_limit,
        }
    }
}

impl Default for ChainContext {
    fn default() -> Self {
        Self::new(&EngineSettings::default(), AccuratePitchProvider::unavailable())
    }
}

/// Single-target effect unit
#[derive(Debug)]
pub struct EffectChain {
    input: NodeId,
    output: NodeId,
    gain: NodeId,
    pitch: Option<NodeId>,
    accurate: Option<NodeId>,
    filters: FilterBankPool,
    compressor: Option<NodeId>,
    delay: Option<NodeId>,
    /// Acquisition and processing failures of the accurate unit
    accurate_failures: Arc<AtomicU32>,
}

impl EffectChain {
    /// Create the chain's boundaries and output gain inside `graph`
    pub fn new(graph: &mut AudioGraph) -> Self {
        Self {
            input: graph.add_node(PassThrough::new(NodeKind::ChainInput)),
            output: graph.add_node(PassThrough::new(NodeKind::ChainOutput)),
            gain: graph.add_node(GainNode::default()),
            pitch: None,
            accurate: None,
            filters: FilterBankPool::new(),
            compressor: None,
            delay: None,
            accurate_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Entry boundary
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// Exit boundary
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn gain(&self) -> NodeId {
        self.gain
    }

    pub fn filters(&self) -> &FilterBankPool {
        &self.filters
    }

    /// Failures counted against the accurate unit so far
    pub fn accurate_failures(&self) -> u32 {
        self.accurate_failures.load(Ordering::Relaxed)
    }

    /// True once the accurate unit is disabled for this chain
    pub fn is_accurate_disabled(&self, ctx: &ChainContext) -> bool {
        self.accurate_failures() >= ctx.accurate_failure_limit
    }

    /// Configure the stages for `config` and return the edges of the path
    ///
    /// Never fails: a pitch unit that cannot be acquired is left out.
    pub fn apply(
        &mut self,
        graph: &mut AudioGraph,
        config: &EffectConfig,
        ctx: &ChainContext,
    ) -> EdgeSet {
        let mut path = vec![self.input];

        if config.enabled {
            if let Some(stage) = self.configure_pitch(graph, config, ctx) {
                path.push(stage);
            }
            path.extend(self.filters.configure(graph, &config.equalizer));
            if config.compressor.enabled {
                path.push(self.configure_compressor(graph, config));
            }
        }

        let mut edges = EdgeSet::new();
        edges.chain(&path);
        let tail = path.last().copied().unwrap_or(self.input);

        if config.enabled && config.delay_seconds > 0.0 {
            let delay = self.configure_delay(graph, config, ctx);
            edges.link(tail, delay).link(delay, self.gain);
            if config.delay_merge {
                edges.link(tail, self.gain);
            }
        } else {
            edges.link(tail, self.gain);
        }
        edges.link(self.gain, self.output);

        if let Some(gain) = graph.node_mut::<GainNode>(self.gain) {
            gain.set_gain(config.output_gain());
        }

        debug!(
            stages = path.len() - 1,
            edges = edges.len(),
            "Configured effect chain"
        );
        edges
    }

    fn configure_pitch(
        &mut self,
        graph: &mut AudioGraph,
        config: &EffectConfig,
        ctx: &ChainContext,
    ) -> Option<NodeId> {
        let semitone = config.active_semitone()?;

        match config.pitch_algorithm {
            PitchAlgorithm::Fast => {
                let id = match self.pitch {
                    Some(id) => {
                        if let Some(shifter) = graph.node_mut::<PitchShifter>(id) {
                            shifter.set_semitone(semitone);
                        }
                        id
                    }
                    None => {
                        let id = graph.add_node(PitchShifter::new(ctx.pitch_tables.clone(), semitone));
                        self.pitch = Some(id);
                        id
                    }
                };
                Some(id)
            }
            PitchAlgorithm::Accurate => {
                if self.is_accurate_disabled(ctx) {
                    debug!(failures = self.accurate_failures(), "Accurate pitch disabled");
                    return None;
                }
                if let Some(id) = self.accurate {
                    if let Some(node) = graph.node_mut::<AccuratePitchNode>(id) {
                        node.set_semitone(semitone);
                    }
                    return Some(id);
                }
                match ctx.accurate.acquire(graph.sample_rate()) {
                    Ok(unit) => {
                        let node = AccuratePitchNode::new(
                            unit,
                            semitone,
                            Arc::clone(&self.accurate_failures),
                            ctx.accurate_failure_limit,
                        );
                        let id = graph.add_node(node);
                        self.accurate = Some(id);
                        Some(id)
                    }
                    Err(e) => {
                        record_failure(&self.accurate_failures, &e);
                        None
                    }
                }
            }
        }
    }

    fn configure_compressor(&mut self, graph: &mut AudioGraph, config: &EffectConfig) -> NodeId {
        match self.compressor {
            Some(id) => {
                if let Some(compressor) = graph.node_mut::<CompressorNode>(id) {
                    compressor.set_params(&config.compressor);
                }
                id
            }
            None => {
                let id = graph.add_node(CompressorNode::new(&config.compressor));
                self.compressor = Some(id);
                id
            }
        }
    }

    fn configure_delay(
        &mut self,
        graph: &mut AudioGraph,
        config: &EffectConfig,
        ctx: &ChainContext,
    ) -> NodeId {
        match self.delay {
            Some(id) => {
                if let Some(delay) = graph.node_mut::<DelayNode>(id) {
                    delay.set_delay_seconds(config.delay_seconds);
                }
                id
            }
            None => {
                let id = graph.add_node(DelayNode::new(config.delay_seconds, ctx.max_delay_seconds));
                self.delay = Some(id);
                id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EqualizerConfig;
    use crate::graph::Edge;

    fn setup() -> (AudioGraph, EffectChain, ChainContext) {
        let mut graph = AudioGraph::new(48000, 128, 2);
        let chain = EffectChain::new(&mut graph);
        (graph, chain, ChainContext::default())
    }

    #[test]
    fn test_default_config_is_pass_through() {
        let (mut graph, mut chain, ctx) = setup();
        let edges = chain.apply(&mut graph, &EffectConfig::default(), &ctx);
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&Edge::new(chain.input(), chain.gain())));
        assert!(edges.contains(&Edge::new(chain.gain(), chain.output())));
        assert!(graph.node::<GainNode>(chain.gain()).unwrap().is_unity());
    }

    #[test]
    fn test_stage_order() {
        let (mut graph, mut chain, ctx) = setup();
        let mut equalizer = EqualizerConfig {
            enabled: true,
            ..Default::default()
        };
        equalizer.band_values[0] = 2.0;
        let config = EffectConfig {
            pitch_semitone: Some(4.0),
            equalizer,
            delay_seconds: 0.2,
            ..Default::default()
        };
        let mut compressed = config.clone();
        compressed.compressor.enabled = true;

        let edges = chain.apply(&mut graph, &compressed, &ctx);
        let pitch = chain.pitch.unwrap();
        let band = chain.filters().stage(0).unwrap();
        let compressor = chain.compressor.unwrap();
        let delay = chain.delay.unwrap();

        assert!(edges.contains(&Edge::new(chain.input(), pitch)));
        assert!(edges.contains(&Edge::new(pitch, band)));
        assert!(edges.contains(&Edge::new(band, compressor)));
        assert!(edges.contains(&Edge::new(compressor, delay)));
        assert!(edges.contains(&Edge::new(delay, chain.gain())));
        assert!(!edges.contains(&Edge::new(compressor, chain.gain())));

        let edges = chain.apply(&mut graph, &config, &ctx);
        assert!(edges.contains(&Edge::new(band, delay)));
        assert!(!edges.connects(band, compressor));
    }

    #[test]
    fn test_delay_merge_adds_dry_tap() {
        let (mut graph, mut chain, ctx) = setup();
        let config = EffectConfig {
            delay_seconds: 0.5,
            delay_merge: true,
            ..Default::default()
        };
        let edges = chain.apply(&mut graph, &config, &ctx);
        let delay = chain.delay.unwrap();
        assert!(edges.contains(&Edge::new(chain.input(), delay)));
        assert!(edges.contains(&Edge::new(chain.input(), chain.gain())));
    }

    #[test]
    fn test_stages_are_reused() {
        let (mut graph, mut chain, ctx) = setup();
        let mut config = EffectConfig {
            pitch_semitone: Some(2.0),
            delay_seconds: 0.1,
            ..Default::default()
        };
        chain.apply(&mut graph, &config, &ctx);
        let nodes = graph.node_count();

        config.pitch_semitone = Some(-5.0);
        config.delay_seconds = 0.3;
        chain.apply(&mut graph, &config, &ctx);
        assert_eq!(graph.node_count(), nodes);

        let shifter = graph.node::<PitchShifter>(chain.pitch.unwrap()).unwrap();
        assert_eq!(shifter.semitone(), -5.0);
        let delay = graph.node::<DelayNode>(chain.delay.unwrap()).unwrap();
        assert_eq!(delay.delay_seconds(), 0.3);
    }

    #[test]
    fn test_volume_is_squared() {
        let (mut graph, mut chain, ctx) = setup();
        let config = EffectConfig {
            volume: 0.5,
            ..Default::default()
        };
        chain.apply(&mut graph, &config, &ctx);
        assert_eq!(graph.node::<GainNode>(chain.gain()).unwrap().gain(), 0.25);
    }

    #[test]
    fn test_disabled_chain_bypasses_stages() {
        let (mut graph, mut chain, ctx) = setup();
        let config = EffectConfig {
            enabled: false,
            pitch_semitone: Some(3.0),
            delay_seconds: 1.0,
            volume: 0.2,
            ..Default::default()
        };
        let edges = chain.apply(&mut graph, &config, &ctx);
        assert_eq!(edges.len(), 2);
        assert!(graph.node::<GainNode>(chain.gain()).unwrap().is_unity());
    }

    #[test]
    fn test_unavailable_accurate_unit_is_skipped() {
        let (mut graph, mut chain, ctx) = setup();
        let config = EffectConfig {
            pitch_semitone: Some(3.0),
            pitch_algorithm: PitchAlgorithm::Accurate,
            ..Default::default()
        };
        let edges = chain.apply(&mut graph, &config, &ctx);
        assert_eq!(edges.len(), 2);
        assert_eq!(chain.accurate_failures(), 1);
        assert!(chain.pitch.is_none());
    }
}
