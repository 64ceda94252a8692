use crate::config::GraphWalkConfig;
use crate::models::{NodeId, RelationType};
use crate::traits::ChunkStore;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Bounded best-path walk over the site graph.
///
/// A node reached from a seed scores the product of `edge.weight *
/// relation_weight` along the path times `decay^hops`. When several paths
/// (or several seeds) reach the same node the highest score is kept. Seeds
/// themselves score `1.0`.
#[derive(Debug, Clone, Default)]
pub struct GraphWalkScorer {
    config: GraphWalkConfig,
}

impl GraphWalkScorer {
    pub fn new(config: GraphWalkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphWalkConfig {
        &self.config
    }

    pub fn score(&self, store: &dyn ChunkStore, seeds: &[NodeId]) -> HashMap<NodeId, f64> {
        let mut best: HashMap<NodeId, f64> = HashMap::new();
        let mut frontier: BTreeMap<NodeId, f64> = BTreeMap::new();
        for seed in seeds {
            best.insert(seed.clone(), 1.0);
            frontier.insert(seed.clone(), 1.0);
        }

        for _ in 0..self.config.max_depth {
            if frontier.is_empty() {
                break;
            }

            // Only nodes whose best score improved in the previous layer are
            // expanded again, so a cycle can never be walked twice.
            let mut next: BTreeMap<NodeId, f64> = BTreeMap::new();
            for (node, score) in &frontier {
                for edge in store.edges_from(node) {
                    let step = edge.weight * self.config.relation_weights.weight(edge.relation);
                    if step <= 0.0 {
                        continue;
                    }

                    let candidate = score * step * self.config.decay;
                    let known = best.get(&edge.target).copied();
                    if known.is_some_and(|current| candidate <= current) {
                        continue;
                    }
                    if known.is_none() && best.len() >= self.config.max_visited {
                        continue;
                    }

                    best.insert(edge.target.clone(), candidate);
                    let slot = next.entry(edge.target.clone()).or_insert(candidate);
                    if candidate > *slot {
                        *slot = candidate;
                    }
                }
            }
            frontier = next;
        }

        best
    }
}

/// Fewest-hop path from `from` to `to` following only `LINKS_TO` edges.
/// Ties resolve to the lexicographically smallest neighbour first.
pub fn shortest_path(
    store: &dyn ChunkStore,
    from: &str,
    to: &str,
    max_depth: usize,
) -> Option<Vec<NodeId>> {
    if from == to {
        return Some(vec![from.to_string()]);
    }

    let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
    let mut seen: HashSet<NodeId> = HashSet::from([from.to_string()]);
    let mut queue: VecDeque<(NodeId, usize)> = VecDeque::from([(from.to_string(), 0)]);

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for edge in store.edges_from(&node) {
            if edge.relation != RelationType::LinksTo || !seen.insert(edge.target.clone()) {
                continue;
            }
            parents.insert(edge.target.clone(), node.clone());
            if edge.target == to {
                let mut path = vec![edge.target.clone()];
                let mut cursor = &edge.target;
                while let Some(parent) = parents.get(cursor) {
                    path.push(parent.clone());
                    cursor = parent;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back((edge.target.clone(), depth + 1));
        }
    }
    None
}
