//! Signal-processing graph
//!
//! - [`AudioGraph`]: node arena, render plan and block renderer
//! - [`EdgeSet`]: ordered edges with diffing
//! - [`EffectGraphBuilder`]: synthesizes the topology for a capture config

pub mod audio_graph;
pub mod builder;
pub mod edges;
pub mod node;

pub use audio_graph::{AudioGraph, GraphDescription, NodeDescription};
pub use builder::EffectGraphBuilder;
pub use edges::{Edge, EdgeDelta, EdgeSet};
pub use node::{AudioNode, ChannelMode, NodeId, NodeKind, PassThrough};
