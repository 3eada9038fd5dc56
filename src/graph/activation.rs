//! Spreading-activation retrieval.
//!
//! Seeding and expansion are pure functions over the petgraph structure;
//! [`super::index::KnowledgeGraph`] calls them while holding its lock so a
//! retrieval sees a consistent graph.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::index::{KnowledgeNode, NodeId};

/// Transient per-query activation levels, `node -> (0, 1]`.
///
/// Scoped to a single retrieval pass; never persisted.
#[derive(Debug, Clone, Default)]
pub struct ActivationSet {
    entries: HashMap<NodeId, f32>,
}

impl ActivationSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Activation level for a node, if it activated this pass.
    pub fn get(&self, id: NodeId) -> Option<f32> {
        self.entries.get(&id).copied()
    }

    /// Whether the node activated this pass.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Raise a node's activation, keeping the maximum of old and new.
    /// Returns true if the stored value changed.
    pub fn activate(&mut self, id: NodeId, level: f32) -> bool {
        let entry = self.entries.entry(id).or_insert(0.0);
        if level > *entry {
            *entry = level;
            true
        } else {
            false
        }
    }

    /// Sum of all activations.
    pub fn total(&self) -> f32 {
        self.entries.values().sum()
    }

    /// Number of activated nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing activated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by descending activation (ties broken by node id for
    /// deterministic output).
    pub fn ranked(&self) -> Vec<(NodeId, f32)> {
        let mut ranked: Vec<(NodeId, f32)> = self.entries.iter().map(|(&n, &a)| (n, a)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        ranked
    }

    /// Iterate over `(node, activation)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f32)> + '_ {
        self.entries.iter().map(|(&n, &a)| (n, a))
    }
}

impl FromIterator<(NodeId, f32)> for ActivationSet {
    fn from_iter<T: IntoIterator<Item = (NodeId, f32)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (id, level) in iter {
            set.activate(id, level);
        }
        set
    }
}

/// Seed the activation set for a query.
///
/// Three seed sources, strongest wins per node:
/// 1. semantic: cosine similarity strictly above `seed_threshold`, seeded at
///    the similarity itself;
/// 2. lexical: at least one shared lowercase token, seeded at
///    `token_seed_activation` unless already higher;
/// 3. literal: exact text match, seeded at 1.0.
pub(crate) fn seed(
    graph: &UnGraph<KnowledgeNode, f32>,
    query: &str,
    similarities: &[f32],
    seed_threshold: f32,
    token_seed_activation: f32,
) -> ActivationSet {
    let mut seeds = ActivationSet::new();

    for (i, &sim) in similarities.iter().enumerate() {
        if sim > seed_threshold {
            seeds.activate(NodeId(i as u32), sim);
        }
    }

    let query_tokens: HashSet<String> = tokens(query);
    if !query_tokens.is_empty() {
        for idx in graph.node_indices() {
            let node = &graph[idx];
            if tokens(&node.text).intersection(&query_tokens).next().is_some() {
                seeds.activate(NodeId(idx.index() as u32), token_seed_activation);
            }
        }
    }

    for idx in graph.node_indices() {
        if graph[idx].text == query {
            seeds.activate(NodeId(idx.index() as u32), 1.0);
        }
    }

    seeds
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Expand seed activations along positive-weight edges.
///
/// Best-first: repeatedly pop the highest-activation unvisited node, walk its
/// positive edges in descending weight order, and activate unseen neighbors at
/// `parent_activation * edge_weight`. Stops when the running activation total
/// reaches `budget` or the frontier is exhausted. Each node is expanded at
/// most once, so the walk always terminates.
pub(crate) fn spread(
    graph: &UnGraph<KnowledgeNode, f32>,
    seeds: ActivationSet,
    budget: f32,
) -> ActivationSet {
    let mut activations = seeds;
    let mut total = activations.total();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut frontier: Vec<(NodeId, f32)> = activations.ranked();

    while total < budget {
        let Some((current, level)) = frontier.first().copied() else {
            break;
        };
        frontier.remove(0);
        if !visited.insert(current) {
            continue;
        }

        let idx = NodeIndex::new(current.0 as usize);
        let mut edges: Vec<(NodeId, f32)> = graph
            .edges(idx)
            .filter(|e| *e.weight() > 0.0)
            .map(|e| {
                let other = if e.source() == idx { e.target() } else { e.source() };
                (NodeId(other.index() as u32), *e.weight())
            })
            .collect();
        edges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (neighbor, weight) in edges {
            if visited.contains(&neighbor) || activations.contains(neighbor) {
                continue;
            }
            let level = level * weight;
            activations.activate(neighbor, level);
            frontier.push((neighbor, level));
            total += level;
        }

        frontier.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }

    activations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(text: &str) -> KnowledgeNode {
        KnowledgeNode {
            id: NodeId(0),
            text: text.into(),
            embedding: vec![],
            created_at: Utc::now(),
        }
    }

    fn chain_graph() -> UnGraph<KnowledgeNode, f32> {
        // a — b — c with strong edges, d isolated.
        let mut g = UnGraph::new_undirected();
        let a = g.add_node(node("alpha fact"));
        let b = g.add_node(node("beta fact"));
        let c = g.add_node(node("gamma fact"));
        let _d = g.add_node(node("delta fact"));
        g.add_edge(a, b, 0.9);
        g.add_edge(b, c, 0.8);
        g
    }

    #[test]
    fn activate_keeps_maximum() {
        let mut set = ActivationSet::new();
        assert!(set.activate(NodeId(1), 0.5));
        assert!(!set.activate(NodeId(1), 0.3));
        assert_eq!(set.get(NodeId(1)), Some(0.5));
    }

    #[test]
    fn token_overlap_seeds_at_fixed_level() {
        let g = chain_graph();
        let seeds = seed(&g, "tell me a beta thing", &[0.0, 0.0, 0.0, 0.0], 0.25, 0.25);
        assert_eq!(seeds.get(NodeId(1)), Some(0.25));
        assert!(!seeds.contains(NodeId(3)));
    }

    #[test]
    fn literal_match_seeds_at_one() {
        let g = chain_graph();
        let seeds = seed(&g, "gamma fact", &[0.0, 0.0, 0.3, 0.0], 0.25, 0.25);
        assert_eq!(seeds.get(NodeId(2)), Some(1.0));
    }

    #[test]
    fn semantic_seed_uses_strict_threshold() {
        let g = chain_graph();
        // 0.25 exactly is NOT a seed; 0.26 is.
        let seeds = seed(&g, "unrelated", &[0.25, 0.26, 0.0, 0.0], 0.25, 0.25);
        assert!(!seeds.contains(NodeId(0)));
        assert_eq!(seeds.get(NodeId(1)), Some(0.26));
    }

    #[test]
    fn spread_propagates_along_strong_edges() {
        let g = chain_graph();
        let seeds: ActivationSet = [(NodeId(0), 0.5)].into_iter().collect();
        let result = spread(&g, seeds, 10.0);
        // a=0.5, b=0.45, c=0.36; d unreachable.
        assert_eq!(result.get(NodeId(0)), Some(0.5));
        assert!((result.get(NodeId(1)).unwrap() - 0.45).abs() < 1e-6);
        assert!((result.get(NodeId(2)).unwrap() - 0.36).abs() < 1e-4);
        assert!(!result.contains(NodeId(3)));
    }

    #[test]
    fn spread_stops_at_budget() {
        let g = chain_graph();
        let seeds: ActivationSet = [(NodeId(0), 0.5)].into_iter().collect();
        // Budget 0.9: a (0.5) + b (0.45) crosses it before c is reached.
        let result = spread(&g, seeds, 0.9);
        assert!(result.contains(NodeId(1)));
        assert!(!result.contains(NodeId(2)));
    }

    #[test]
    fn spread_total_never_below_seed_contribution() {
        let g = chain_graph();
        let seeds: ActivationSet = [(NodeId(3), 0.7)].into_iter().collect();
        let result = spread(&g, seeds, 2.0);
        assert!(result.total() >= 0.7);
    }
}
