//! Associative knowledge graph.
//!
//! Nodes are remembered facts with embeddings; edges carry symmetric
//! similarity weights that are reinforced when nodes activate together.
//! Retrieval is spreading activation: seed nodes by semantic/lexical overlap
//! with the query, then walk the strongest edges until an activation budget
//! is spent.

pub mod activation;
pub mod index;

pub use activation::ActivationSet;
pub use index::{GraphConfig, GraphSnapshot, KnowledgeGraph, KnowledgeNode, NodeId};
