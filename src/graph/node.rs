//! Audio node trait definition
//!
//! Base trait for everything that can sit in an [`AudioGraph`](super::AudioGraph).

use std::any::Any;
use std::fmt;

use serde::Serialize;

use crate::engine::AudioBuffer;

/// Stable handle to a node inside one graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node does, used for inspection and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Captured stream entry point
    Source,
    /// Graph exit, feeds the shared destination
    Sink,
    /// Boundary of an effect chain (entry)
    ChainInput,
    /// Boundary of an effect chain (exit)
    ChainOutput,
    /// Boundary where the builder's topology ends
    GraphOutput,
    Gain,
    Filter,
    Delay,
    Compressor,
    PitchShifter,
    AccuratePitch,
    Splitter,
    Merger,
    Panner,
    Reverse,
}

impl NodeKind {
    /// True for stages inserted by configuration (not boundaries or routing)
    pub fn is_stage(&self) -> bool {
        matches!(
            self,
            NodeKind::Filter
                | NodeKind::Delay
                | NodeKind::Compressor
                | NodeKind::PitchShifter
                | NodeKind::AccuratePitch
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Source => "source",
            NodeKind::Sink => "sink",
            NodeKind::ChainInput => "chain-input",
            NodeKind::ChainOutput => "chain-output",
            NodeKind::GraphOutput => "graph-output",
            NodeKind::Gain => "gain",
            NodeKind::Filter => "filter",
            NodeKind::Delay => "delay",
            NodeKind::Compressor => "compressor",
            NodeKind::PitchShifter => "pitch-shifter",
            NodeKind::AccuratePitch => "accurate-pitch",
            NodeKind::Splitter => "splitter",
            NodeKind::Merger => "merger",
            NodeKind::Panner => "panner",
            NodeKind::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// How an input port decides its channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ChannelMode {
    /// Widest of the connected sources
    #[default]
    Max,
    /// Always this many channels; sources are up/down-mixed to fit
    Explicit(usize),
}

/// Base trait for all graph nodes
///
/// `prepare` runs in the control context whenever the render plan is
/// recompiled; `process` runs once per block in the audio context and must
/// not allocate, lock or block.
pub trait AudioNode: Send {
    /// Get the node kind
    fn kind(&self) -> NodeKind;

    /// Number of input ports
    fn num_inputs(&self) -> usize {
        1
    }

    /// Number of output ports
    fn num_outputs(&self) -> usize {
        1
    }

    /// Channel mode an input port starts with
    fn input_mode(&self, _input: usize) -> ChannelMode {
        ChannelMode::Max
    }

    /// Channel count of an output given the resolved input channel counts
    fn output_channels(&self, input_channels: &[usize], _output: usize) -> usize {
        input_channels.first().copied().unwrap_or(1)
    }

    /// Size internal state for the resolved channel layout
    ///
    /// Called on every plan compile; implementations keep existing state
    /// when the layout is unchanged.
    fn prepare(&mut self, _sample_rate: u32, _max_block_size: usize, _input_channels: &[usize]) {}

    /// Process one block
    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]);

    /// Clear internal state (delay lines, filter history)
    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Helper macro to implement common AudioNode trait methods
#[macro_export]
macro_rules! impl_node_common {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
    ($kind:expr) => {
        fn kind(&self) -> $crate::graph::NodeKind {
            $kind
        }

        $crate::impl_node_common!();
    };
}

/// Node that forwards its input untouched
///
/// Used for every boundary in the graph: the source, the sink, chain
/// entry/exit points and the builder's output. Boundaries are never
/// destroyed, so the nodes wired to them keep their identity across
/// rebuilds.
#[derive(Debug, Clone)]
pub struct PassThrough {
    kind: NodeKind,
    /// Source nodes have no input; their channel count is fixed here
    source_channels: Option<usize>,
}

impl PassThrough {
    /// A boundary node of the given kind
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            source_channels: None,
        }
    }

    /// The graph entry point, producing `channels` channels
    pub fn source(channels: usize) -> Self {
        Self {
            kind: NodeKind::Source,
            source_channels: Some(channels.max(1)),
        }
    }
}

impl AudioNode for PassThrough {
    impl_node_common!();

    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn num_inputs(&self) -> usize {
        if self.source_channels.is_some() {
            0
        } else {
            1
        }
    }

    fn output_channels(&self, input_channels: &[usize], _output: usize) -> usize {
        match self.source_channels {
            Some(channels) => channels,
            None => input_channels.first().copied().unwrap_or(1),
        }
    }

    fn process(&mut self, inputs: &[AudioBuffer], outputs: &mut [AudioBuffer]) {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            output.copy_from(input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChannelLayout;

    #[test]
    fn test_stage_kinds() {
        assert!(NodeKind::Filter.is_stage());
        assert!(NodeKind::PitchShifter.is_stage());
        assert!(!NodeKind::Gain.is_stage());
        assert!(!NodeKind::Sink.is_stage());
    }

    #[test]
    fn test_source_has_no_inputs() {
        let source = PassThrough::source(2);
        assert_eq!(source.num_inputs(), 0);
        assert_eq!(source.output_channels(&[], 0), 2);
        assert_eq!(source.kind(), NodeKind::Source);
    }

    #[test]
    fn test_pass_through_copies() {
        let mut node = PassThrough::new(NodeKind::ChainInput);
        let mut input = AudioBuffer::new(4, ChannelLayout::Mono);
        input.channel_mut(0).fill(0.25);
        let mut outputs = vec![AudioBuffer::new(4, ChannelLayout::Stereo)];
        node.process(&[input], &mut outputs);
        assert_eq!(outputs[0].channel(1), &[0.25; 4]);
    }
}
