//! Graph insertion and neighbor selection.

use crate::store::NodeId;

use super::{Candidate, DistanceView, GraphError, GraphNode, ProximityGraph, SearchContext};

impl ProximityGraph {
    /// Inserts a node whose vector is already stored.
    ///
    /// Draws the node's top layer, greedy-descends from the entry point to
    /// the insertion layer, then connects the node layer by layer with the
    /// diversity heuristic, trimming reverse edges that overflow their
    /// bound. Promotes the node to entry point when it tops the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] on internal corruption.
    pub fn insert<V: DistanceView>(&mut self, id: NodeId, view: &V) -> Result<(), GraphError> {
        let level = self.random_level();
        self.ensure_slot(id);

        let Some(entry_point) = self.entry_point else {
            self.nodes[id.index()] = Some(GraphNode::with_top_layer(level));
            self.entry_point = Some(id);
            self.top_layer = level;
            self.live_count += 1;
            return Ok(());
        };

        self.nodes[id.index()] = Some(GraphNode::with_top_layer(level));

        let mut ctx = SearchContext::new();
        let top = self.top_layer;
        let mut ep = entry_point;

        // Greedy descent through layers above the insertion band.
        for layer in (level + 1..=top).rev() {
            self.search_layer(view, [ep], 1, layer, &mut ctx)?;
            if let Some(best) = ctx.scratch.first() {
                ep = best.node;
            }
        }

        // Connect from min(top, level) down to 0.
        for layer in (0..=level.min(top)).rev() {
            self.search_layer(view, [ep], self.params.ef_construction, layer, &mut ctx)?;
            let next_ep = ctx.scratch.first().map(|c| c.node);

            let bound = self.layer_bound(layer);
            Self::select_neighbors(&ctx.scratch, bound, view, &mut ctx.selected);

            let chosen = ctx.selected.clone();
            self.node_mut(id)?.layer_mut(layer).clone_from(&chosen);

            for &neighbor in &chosen {
                self.link_back(neighbor, id, layer, view, &mut ctx)?;
            }

            if let Some(best) = next_ep {
                ep = best;
            }
        }

        if level > self.top_layer {
            self.top_layer = level;
            self.entry_point = Some(id);
        }
        self.live_count += 1;
        Ok(())
    }

    fn layer_bound(&self, layer: u8) -> usize {
        if layer == 0 {
            self.params.m_max0
        } else {
            self.params.m
        }
    }

    /// Adds the reverse edge `from -> to`, re-selecting `from`'s neighbor
    /// list when it overflows the layer bound. Tombstoned entries drop out
    /// during re-selection, which refills depleted lists naturally.
    fn link_back<V: DistanceView>(
        &mut self,
        from: NodeId,
        to: NodeId,
        layer: u8,
        view: &V,
        ctx: &mut SearchContext,
    ) -> Result<(), GraphError> {
        let bound = self.layer_bound(layer);

        {
            let list = self.node_mut(from)?.layer_mut(layer);
            if list.contains(&to) {
                return Ok(());
            }
            list.push(to);
            if list.len() <= bound {
                return Ok(());
            }
        }

        // Overflow: score every live neighbor against `from` and re-select.
        ctx.scratch.clear();
        let current = self
            .node(from)
            .ok_or(GraphError::NotResident(from.0))?
            .neighbors(layer)
            .to_vec();
        for neighbor in current {
            if self.is_deleted(neighbor) {
                continue;
            }
            ctx.scratch.push(Candidate {
                distance: view.between(from, neighbor),
                node: neighbor,
            });
        }
        ctx.scratch.sort_unstable();

        Self::select_neighbors(&ctx.scratch, bound, view, &mut ctx.selected);
        let trimmed = ctx.selected.clone();
        self.node_mut(from)?.layer_mut(layer).clone_from(&trimmed);
        Ok(())
    }

    /// Robust pruning.
    ///
    /// Walks `candidates` (ascending by distance to the pivot) and keeps a
    /// candidate only if it is closer to the pivot than to any already-kept
    /// neighbor, which spreads the selection across directions. A second
    /// pass fills any remaining capacity with the closest rejects.
    ///
    /// `candidates` carry their distance to the pivot; `view.between` scores
    /// candidate pairs.
    pub(crate) fn select_neighbors<V: DistanceView>(
        candidates: &[Candidate],
        bound: usize,
        view: &V,
        out: &mut Vec<NodeId>,
    ) {
        out.clear();
        if candidates.is_empty() || bound == 0 {
            return;
        }

        for c in candidates {
            if out.len() == bound {
                return;
            }
            let diverse = out
                .iter()
                .all(|&kept| c.distance < view.between(c.node, kept));
            if diverse {
                out.push(c.node);
            }
        }

        // Fill pass: closest rejects, in order.
        for c in candidates {
            if out.len() == bound {
                return;
            }
            if !out.contains(&c.node) {
                out.push(c.node);
            }
        }
    }
}
