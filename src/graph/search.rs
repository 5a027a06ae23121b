//! Graph traversal: bounded best-first layer search and top-K lookup.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::store::NodeId;

use super::{GraphError, ProximityGraph, QueryDistance};

/// A scored node during traversal.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    /// Distance to the query.
    pub distance: f32,
    /// The scored node.
    pub node: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.node == other.node
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties resolve by ascending id so result order is deterministic.
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node.cmp(&other.node))
    }
}

/// Reusable allocation set for search operations.
#[derive(Default)]
pub struct SearchContext {
    /// Nodes already scored.
    visited: HashSet<NodeId>,
    /// Expansion frontier, nearest first.
    candidates: BinaryHeap<Reverse<Candidate>>,
    /// Best `ef` seen so far, farthest on top.
    results: BinaryHeap<Candidate>,
    /// Layer-search output, ascending by distance.
    pub(crate) scratch: Vec<Candidate>,
    /// Neighbor-selection output.
    pub(crate) selected: Vec<NodeId>,
}

impl SearchContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.visited.clear();
        self.candidates.clear();
        self.results.clear();
        self.scratch.clear();
    }
}

impl ProximityGraph {
    /// Bounded best-first search of one layer.
    ///
    /// Seeds the frontier with `entries`, expands the nearest frontier node
    /// until its distance exceeds the worst of the best `ef` found, and
    /// leaves the results in `ctx.scratch`, ascending by distance. Tombstoned
    /// nodes are skipped entirely: never scored, never expanded.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NotResident`] if a neighbor list references an
    /// id with no graph node.
    pub(crate) fn search_layer<V: QueryDistance>(
        &self,
        view: &V,
        entries: impl IntoIterator<Item = NodeId>,
        ef: usize,
        layer: u8,
        ctx: &mut SearchContext,
    ) -> Result<(), GraphError> {
        ctx.reset();

        for ep in entries {
            let node = self.node(ep).ok_or(GraphError::NotResident(ep.0))?;
            if node.top_layer() < layer || self.is_deleted(ep) {
                continue;
            }
            let candidate = Candidate {
                distance: view.to_query(ep),
                node: ep,
            };
            ctx.candidates.push(Reverse(candidate));
            ctx.results.push(candidate);
            ctx.visited.insert(ep);
        }

        while ctx.results.len() > ef {
            ctx.results.pop();
        }

        while let Some(Reverse(current)) = ctx.candidates.pop() {
            if let Some(farthest) = ctx.results.peek() {
                if ctx.results.len() >= ef && current.distance > farthest.distance {
                    break;
                }
            }

            let node = self
                .node(current.node)
                .ok_or(GraphError::NotResident(current.node.0))?;

            for &neighbor in node.neighbors(layer) {
                if !ctx.visited.insert(neighbor) {
                    continue;
                }
                if self.node(neighbor).is_none() {
                    return Err(GraphError::NotResident(neighbor.0));
                }
                if self.is_deleted(neighbor) {
                    continue;
                }

                let distance = view.to_query(neighbor);
                let admit = ctx.results.len() < ef
                    || ctx
                        .results
                        .peek()
                        .is_some_and(|farthest| distance < farthest.distance);
                if admit {
                    let candidate = Candidate {
                        distance,
                        node: neighbor,
                    };
                    ctx.candidates.push(Reverse(candidate));
                    ctx.results.push(candidate);
                    if ctx.results.len() > ef {
                        ctx.results.pop();
                    }
                }
            }
        }

        while let Some(c) = ctx.results.pop() {
            ctx.scratch.push(c);
        }
        ctx.scratch.reverse();
        Ok(())
    }

    /// Top-K search over the whole graph.
    ///
    /// Greedy-descends from the entry point through the upper layers, then
    /// runs a layer-0 search with width `max(k, ef)`. Returns at most `k`
    /// live candidates, ascending by distance (ties by ascending id).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] on internal corruption.
    pub fn search<V: QueryDistance>(
        &self,
        view: &V,
        k: usize,
        ef: usize,
        ctx: &mut SearchContext,
    ) -> Result<Vec<Candidate>, GraphError> {
        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };

        let mut ep = entry_point;
        for layer in (1..=self.top_layer).rev() {
            self.search_layer(view, [ep], 1, layer, ctx)?;
            if let Some(best) = ctx.scratch.first() {
                ep = best.node;
            }
        }

        self.search_layer(view, [ep], k.max(ef), 0, ctx)?;

        let mut out = std::mem::take(&mut ctx.scratch);
        out.truncate(k);
        Ok(out)
    }
}
