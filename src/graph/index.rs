//! In-memory knowledge graph with similarity-deduplicated nodes.
//!
//! Uses `petgraph` for the node arena and the symmetric weighted adjacency
//! structure. All mutation happens behind one mutex so scan-and-append
//! (dedup check + edge creation) is atomic; an insert either completes fully
//! or leaves the graph untouched.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::embed::{cosine_similarity, EmbeddingProvider};
use crate::error::GraphError;

use super::activation::{self, ActivationSet};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Identifier of a node: its position in the arena. Nodes are never deleted,
/// so ids are stable for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl NodeId {
    fn index(self) -> NodeIndex {
        NodeIndex::new(self.0 as usize)
    }
}

/// A remembered fact. Immutable once created — new related facts become new
/// nodes, never in-place edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Arena position.
    pub id: NodeId,
    /// The remembered sentence.
    pub text: String,
    /// Embedding of `text`, produced by the injected provider.
    pub embedding: Vec<f32>,
    /// When the fact was first stored.
    pub created_at: DateTime<Utc>,
}

/// Tuning knobs for dedup and retrieval.
///
/// Node identity is a content-similarity class: two texts are the same node
/// iff their cosine similarity reaches `identity_threshold` (closed interval).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Similarity at or above which two texts are the same node.
    pub identity_threshold: f32,
    /// Lower edge of the "related but distinct" band. Nodes in
    /// `[candidate_threshold, identity_threshold)` seed the current pass's
    /// activation set on insert but never merge identity.
    pub candidate_threshold: f32,
    /// Similarity strictly above which a node seeds retrieval.
    pub seed_threshold: f32,
    /// Activation given to lexical (token-overlap) seeds.
    pub token_seed_activation: f32,
    /// Running activation total at which retrieval stops expanding.
    pub activation_budget: f32,
    /// Learning rate for co-activation reinforcement.
    pub learning_rate: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            identity_threshold: 0.6,
            candidate_threshold: 0.35,
            seed_threshold: 0.25,
            token_seed_activation: 0.25,
            activation_budget: 2.0,
            learning_rate: 0.25,
        }
    }
}

/// Durable record of a graph: node list plus weighted edge list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<KnowledgeNode>,
    /// `(a, b, weight)` with `a < b`; weights are symmetric.
    pub edges: Vec<(u32, u32, f32)>,
}

struct GraphInner {
    graph: UnGraph<KnowledgeNode, f32>,
    /// Nodes active in the current processing pass, strongest first.
    /// Replaced by `retrieve`, extended by `insert`, consumed by
    /// co-activation reinforcement and the empty-seed fallback.
    activations: Vec<(NodeId, f32)>,
}

impl GraphInner {
    fn activate_pass(&mut self, id: NodeId, level: f32) {
        match self.activations.iter_mut().find(|(n, _)| *n == id) {
            Some((_, existing)) => {
                if level > *existing {
                    *existing = level;
                }
            }
            None => self.activations.push((id, level)),
        }
        self.activations
            .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// Associative memory graph: dedup insert, co-activation reinforcement,
/// spreading-activation retrieval.
pub struct KnowledgeGraph {
    config: GraphConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    inner: Mutex<GraphInner>,
}

impl KnowledgeGraph {
    /// Create an empty graph.
    pub fn new(config: GraphConfig, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            embedder,
            inner: Mutex::new(GraphInner {
                graph: UnGraph::new_undirected(),
                activations: Vec::new(),
            }),
        }
    }

    /// Insert a fact, deduplicating by content similarity.
    ///
    /// Returns the existing node's id when the text matches literally or its
    /// embedding reaches the identity threshold. Otherwise appends a new node
    /// and one similarity-weighted edge per existing node (non-positive
    /// similarities leave no edge, which is weight zero).
    ///
    /// All-or-nothing: embedding happens before the lock is taken, and every
    /// similarity is computed before the first mutation, so a failure partway
    /// never leaves a node without its edges.
    pub fn insert(&self, text: &str) -> GraphResult<NodeId> {
        let embedding = self.embedder.embed(text)?;
        let mut inner = self.inner.lock().expect("graph lock poisoned");

        let mut similarities = Vec::with_capacity(inner.graph.node_count());
        let mut candidates = Vec::new();
        for idx in inner.graph.node_indices() {
            let node = &inner.graph[idx];
            if node.text == text {
                return Ok(node.id);
            }
            let sim = cosine_similarity(&embedding, &node.embedding)?;
            if sim >= self.config.identity_threshold {
                tracing::debug!(node = %node.id, similarity = sim, "insert deduplicated to existing node");
                return Ok(node.id);
            }
            if sim >= self.config.candidate_threshold {
                candidates.push((node.id, sim));
            }
            similarities.push(sim);
        }

        let id = NodeId(inner.graph.node_count() as u32);
        let idx = inner.graph.add_node(KnowledgeNode {
            id,
            text: text.to_string(),
            embedding,
            created_at: Utc::now(),
        });
        for (i, sim) in similarities.into_iter().enumerate() {
            if sim > 0.0 {
                inner.graph.add_edge(NodeIndex::new(i), idx, sim);
            }
        }

        // Related-but-distinct nodes join the pass activation set so the next
        // reinforcement links them to what is being learned now.
        for (candidate, sim) in candidates {
            inner.activate_pass(candidate, sim);
        }
        inner.activate_pass(id, 1.0);

        tracing::info!(node = %id, text_len = text.len(), "stored new knowledge node");
        Ok(id)
    }

    /// Spreading-activation retrieval with the configured budget.
    pub fn retrieve(&self, query: &str) -> GraphResult<ActivationSet> {
        self.retrieve_with_budget(query, self.config.activation_budget)
    }

    /// Spreading-activation retrieval with an explicit activation budget.
    ///
    /// Seeds by semantic similarity, token overlap, and literal equality;
    /// falls back to the strongest node of the previous pass when no seed
    /// matches, so a query with zero overlap still surfaces recent context.
    /// The result becomes the new pass activation set.
    pub fn retrieve_with_budget(&self, query: &str, budget: f32) -> GraphResult<ActivationSet> {
        let embedding = self.embedder.embed(query)?;
        let mut inner = self.inner.lock().expect("graph lock poisoned");

        if inner.graph.node_count() == 0 {
            inner.activations.clear();
            return Ok(ActivationSet::new());
        }

        let mut similarities = Vec::with_capacity(inner.graph.node_count());
        for node in inner.graph.node_weights() {
            similarities.push(cosine_similarity(&embedding, &node.embedding)?);
        }

        let mut seeds = activation::seed(
            &inner.graph,
            query,
            &similarities,
            self.config.seed_threshold,
            self.config.token_seed_activation,
        );

        if seeds.is_empty() {
            match inner.activations.first().copied() {
                Some((last, level)) => {
                    tracing::debug!(node = %last, "no seeds — falling back to last activated node");
                    seeds.activate(last, level);
                }
                None => {
                    inner.activations.clear();
                    return Ok(ActivationSet::new());
                }
            }
        }

        let result = activation::spread(&inner.graph, seeds, budget);
        inner.activations = result.ranked();
        tracing::debug!(
            activated = result.len(),
            total = result.total(),
            "retrieval pass finished"
        );
        Ok(result)
    }

    /// Strengthen the edge between two nodes from their co-activation product.
    ///
    /// `w == 0 → product·rate`; otherwise `w += product·rate·w`. Weights
    /// saturate at 1.0. The self-edge is undefined and ignored.
    pub fn reinforce(&self, a: NodeId, b: NodeId, product: f32) -> GraphResult<()> {
        if a == b {
            return Ok(());
        }
        let mut inner = self.inner.lock().expect("graph lock poisoned");
        let count = inner.graph.node_count() as u32;
        for id in [a, b] {
            if id.0 >= count {
                return Err(GraphError::NodeNotFound { id: id.0 });
            }
        }
        reinforce_edge(&mut inner.graph, a, b, product, self.config.learning_rate);
        Ok(())
    }

    /// Apply co-activation reinforcement once per unordered pair of nodes in
    /// the current pass activation set.
    pub fn reinforce_coactivation(&self) {
        let mut inner = self.inner.lock().expect("graph lock poisoned");
        let active = inner.activations.clone();
        for (i, &(node_a, level_a)) in active.iter().enumerate() {
            for &(node_b, level_b) in &active[i + 1..] {
                reinforce_edge(
                    &mut inner.graph,
                    node_a,
                    node_b,
                    level_a * level_b,
                    self.config.learning_rate,
                );
            }
        }
        if !active.is_empty() {
            tracing::debug!(active = active.len(), "co-activation reinforcement applied");
        }
    }

    /// Insert a batch of extracted memories, then reinforce everything that
    /// activated during the pass (the new nodes, their candidacy-band
    /// neighbors, and whatever the last retrieval surfaced).
    pub fn consolidate(&self, memories: &[String]) -> GraphResult<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(memories.len());
        for memory in memories {
            ids.push(self.insert(memory)?);
        }
        self.reinforce_coactivation();
        Ok(ids)
    }

    /// Nodes active in the current pass (strongest first).
    pub fn current_activations(&self) -> Vec<(NodeId, f32)> {
        self.inner.lock().expect("graph lock poisoned").activations.clone()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("graph lock poisoned").graph.node_count()
    }

    /// Whether the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of positive-weight edges.
    pub fn edge_count(&self) -> usize {
        self.inner.lock().expect("graph lock poisoned").graph.edge_count()
    }

    /// Weight between two nodes, if an edge exists.
    pub fn edge_weight(&self, a: NodeId, b: NodeId) -> Option<f32> {
        let inner = self.inner.lock().expect("graph lock poisoned");
        inner
            .graph
            .find_edge(a.index(), b.index())
            .and_then(|e| inner.graph.edge_weight(e).copied())
    }

    /// Clone of a node, if it exists.
    pub fn node(&self, id: NodeId) -> Option<KnowledgeNode> {
        let inner = self.inner.lock().expect("graph lock poisoned");
        inner.graph.node_weight(id.index()).cloned()
    }

    /// Render an activation set as recall text for the working-memory
    /// context, strongest first: sentence, importance (0–100), creation date.
    pub fn render_recall(&self, activations: &ActivationSet) -> String {
        let inner = self.inner.lock().expect("graph lock poisoned");
        let mut out = String::from(
            "Relevant pieces of memory, with importance (0-100) and the time they were created:",
        );
        let mut any = false;
        for (id, level) in activations.ranked() {
            let Some(node) = inner.graph.node_weight(id.index()) else {
                continue;
            };
            let day = node.created_at.day();
            out.push_str(&format!(
                "\n{} - {:.2} - {}{} {}",
                node.text,
                level * 50.0,
                day,
                ordinal_suffix(day),
                node.created_at.format("%b %Y"),
            ));
            any = true;
        }
        if !any {
            out.push_str("\nNo activated pieces of memory yet");
        }
        out
    }

    // -- persistence --------------------------------------------------------

    /// Durable record: every node plus the weighted edge list.
    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.lock().expect("graph lock poisoned");
        let nodes = inner.graph.node_weights().cloned().collect();
        let mut edges: Vec<(u32, u32, f32)> = inner
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = inner.graph.edge_endpoints(e)?;
                let w = *inner.graph.edge_weight(e)?;
                let (a, b) = (a.index() as u32, b.index() as u32);
                Some(if a < b { (a, b, w) } else { (b, a, w) })
            })
            .collect();
        edges.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        GraphSnapshot { nodes, edges }
    }

    /// Rebuild a graph from a snapshot. The pass activation set starts empty.
    pub fn restore(
        config: GraphConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        snapshot: GraphSnapshot,
    ) -> GraphResult<Self> {
        let mut graph = UnGraph::new_undirected();
        for (position, node) in snapshot.nodes.into_iter().enumerate() {
            if node.id.0 as usize != position {
                return Err(GraphError::SnapshotCorrupt {
                    message: format!("node id {} at position {position}", node.id),
                });
            }
            graph.add_node(node);
        }
        let count = graph.node_count() as u32;
        for (a, b, w) in snapshot.edges {
            if a >= count || b >= count {
                return Err(GraphError::SnapshotCorrupt {
                    message: format!("edge ({a}, {b}) references a missing node"),
                });
            }
            graph.add_edge(NodeIndex::new(a as usize), NodeIndex::new(b as usize), w);
        }
        tracing::info!(nodes = count, "knowledge graph restored from snapshot");
        Ok(Self {
            config,
            embedder,
            inner: Mutex::new(GraphInner {
                graph,
                activations: Vec::new(),
            }),
        })
    }

    /// Write the snapshot as JSON.
    pub fn save(&self, path: &Path) -> GraphResult<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string(&snapshot).map_err(|e| GraphError::SnapshotCorrupt {
            message: format!("encode failed: {e}"),
        })?;
        std::fs::write(path, json).map_err(|source| GraphError::SnapshotIo {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read a snapshot written by [`KnowledgeGraph::save`].
    pub fn load(
        config: GraphConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        path: &Path,
    ) -> GraphResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| GraphError::SnapshotIo {
            path: path.display().to_string(),
            source,
        })?;
        let snapshot: GraphSnapshot =
            serde_json::from_str(&json).map_err(|e| GraphError::SnapshotCorrupt {
                message: format!("decode failed: {e}"),
            })?;
        Self::restore(config, embedder, snapshot)
    }
}

fn reinforce_edge(
    graph: &mut UnGraph<KnowledgeNode, f32>,
    a: NodeId,
    b: NodeId,
    product: f32,
    rate: f32,
) {
    if a == b {
        return;
    }
    match graph.find_edge(a.index(), b.index()) {
        Some(e) => {
            if let Some(w) = graph.edge_weight_mut(e) {
                *w = (*w + product * rate * *w).min(1.0);
            }
        }
        None => {
            graph.add_edge(a.index(), b.index(), (product * rate).min(1.0));
        }
    }
}

fn ordinal_suffix(day: u32) -> &'static str {
    match day {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

impl std::fmt::Debug for KnowledgeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeGraph")
            .field("config", &self.config)
            .field("nodes", &self.len())
            .field("edges", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbedError;
    use std::collections::HashMap;

    /// Deterministic embedder double: fixed vectors per known text, error on
    /// anything else.
    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    impl StubEmbedder {
        fn new(entries: &[(&str, &[f32])]) -> Self {
            Self {
                vectors: entries
                    .iter()
                    .map(|(t, v)| (t.to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    impl EmbeddingProvider for StubEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.trim().is_empty() {
                return Err(EmbedError::EmptyText);
            }
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| EmbedError::Provider {
                    message: format!("no stub vector for \"{text}\""),
                })
        }
    }

    fn graph_with(entries: &[(&str, &[f32])]) -> KnowledgeGraph {
        KnowledgeGraph::new(GraphConfig::default(), Arc::new(StubEmbedder::new(entries)))
    }

    #[test]
    fn insert_then_reinsert_is_idempotent() {
        let g = graph_with(&[("the sky is blue", &[1.0, 0.0])]);
        let a = g.insert("the sky is blue").unwrap();
        let edges_before = g.edge_count();
        let b = g.insert("the sky is blue").unwrap();
        assert_eq!(a, b);
        assert_eq!(g.len(), 1);
        assert_eq!(g.edge_count(), edges_before);
    }

    #[test]
    fn identity_threshold_is_closed() {
        // cos(first, exactly-at) = 0.6, cos(first, just-below) < 0.6.
        let g = graph_with(&[
            ("first", &[1.0, 0.0]),
            ("exactly at", &[0.6, 0.8]),
            ("just below", &[0.59, 0.80738]),
        ]);
        let first = g.insert("first").unwrap();
        let same = g.insert("exactly at").unwrap();
        assert_eq!(first, same);
        let different = g.insert("just below").unwrap();
        assert_ne!(first, different);
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn new_node_gets_similarity_weighted_edges() {
        let g = graph_with(&[("a", &[1.0, 0.0]), ("b", &[0.5, 0.8660254])]);
        let a = g.insert("a").unwrap();
        let b = g.insert("b").unwrap();
        let w = g.edge_weight(a, b).unwrap();
        assert!((w - 0.5).abs() < 1e-5);
    }

    #[test]
    fn candidacy_band_seeds_pass_activation() {
        // cos(a, c) = 0.4: related but distinct.
        let g = graph_with(&[("a", &[1.0, 0.0]), ("c", &[0.4, 0.9165151])]);
        let a = g.insert("a").unwrap();
        let c = g.insert("c").unwrap();
        let active = g.current_activations();
        assert_eq!(active[0], (c, 1.0));
        assert!(active.iter().any(|&(id, level)| id == a && (level - 0.4).abs() < 1e-5));
    }

    #[test]
    fn failed_embed_mutates_nothing() {
        let g = graph_with(&[("known", &[1.0, 0.0])]);
        g.insert("known").unwrap();
        assert!(g.insert("unknown text").is_err());
        assert_eq!(g.len(), 1);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn reinforce_creates_then_compounds() {
        let g = graph_with(&[("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])]);
        let a = g.insert("a").unwrap();
        let b = g.insert("b").unwrap();
        // Orthogonal: no initial edge.
        assert_eq!(g.edge_weight(a, b), None);

        g.reinforce(a, b, 1.0).unwrap();
        let w1 = g.edge_weight(a, b).unwrap();
        assert!((w1 - 0.25).abs() < 1e-6);

        g.reinforce(a, b, 1.0).unwrap();
        let w2 = g.edge_weight(a, b).unwrap();
        assert!((w2 - (0.25 + 0.25 * 0.25)).abs() < 1e-6);
    }

    #[test]
    fn reinforce_unknown_node_is_an_error() {
        let g = graph_with(&[("a", &[1.0, 0.0])]);
        let a = g.insert("a").unwrap();
        assert!(matches!(
            g.reinforce(a, NodeId(7), 1.0),
            Err(GraphError::NodeNotFound { id: 7 })
        ));
    }

    #[test]
    fn retrieve_on_empty_graph_is_empty() {
        let g = graph_with(&[("anything", &[1.0, 0.0])]);
        assert!(g.retrieve("anything").unwrap().is_empty());
    }

    #[test]
    fn retrieve_falls_back_to_last_activated() {
        let g = graph_with(&[
            ("paris is in france", &[1.0, 0.0]),
            ("zzz", &[0.0, -1.0]),
        ]);
        g.insert("paris is in france").unwrap();
        // No semantic, lexical, or literal overlap — but the insert pass left
        // the node activated, so the fallback surfaces it.
        let result = g.retrieve("zzz").unwrap();
        assert_eq!(result.get(NodeId(0)), Some(1.0));
    }

    #[test]
    fn snapshot_roundtrip_preserves_structure() {
        let entries: &[(&str, &[f32])] = &[("a", &[1.0, 0.0]), ("b", &[0.5, 0.8660254])];
        let g = graph_with(entries);
        let a = g.insert("a").unwrap();
        let b = g.insert("b").unwrap();
        g.reinforce(a, b, 1.0).unwrap();
        let expected = g.edge_weight(a, b).unwrap();

        let restored = KnowledgeGraph::restore(
            GraphConfig::default(),
            Arc::new(StubEmbedder::new(entries)),
            g.snapshot(),
        )
        .unwrap();
        assert_eq!(restored.len(), 2);
        assert!((restored.edge_weight(a, b).unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn corrupt_snapshot_rejected() {
        let snapshot = GraphSnapshot {
            nodes: vec![],
            edges: vec![(0, 1, 0.5)],
        };
        let result = KnowledgeGraph::restore(
            GraphConfig::default(),
            Arc::new(StubEmbedder::new(&[])),
            snapshot,
        );
        assert!(matches!(result, Err(GraphError::SnapshotCorrupt { .. })));
    }

    #[test]
    fn render_recall_lists_strongest_first() {
        let g = graph_with(&[("a fact", &[1.0, 0.0]), ("b fact", &[0.5, 0.8660254])]);
        g.insert("a fact").unwrap();
        g.insert("b fact").unwrap();
        let recall = g.retrieve("a fact").unwrap();
        let text = g.render_recall(&recall);
        assert!(text.contains("a fact"));
        let a_pos = text.find("a fact").unwrap();
        let b_pos = text.find("b fact").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn ordinal_suffixes() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
        assert_eq!(ordinal_suffix(24), "th");
    }
}
