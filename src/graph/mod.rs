//! Layered proximity graph (HNSW-style).
//!
//! Nodes own their per-layer neighbor lists and address each other purely by
//! [`NodeId`]; there are no pointers between nodes, so mutation invalidates
//! nothing beyond the touched node and serialization is a plain traversal.
//!
//! Layer 0 contains every graph-resident node; layer `l` the subset whose
//! stochastically drawn top layer is at least `l`. A single entry point sits
//! on the current top layer. Deletion tombstones a node in place: its slot
//! and inbound neighbor references survive, and every walk skips it.

use bitvec::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::store::NodeId;

mod insert;
mod search;

pub use search::{Candidate, SearchContext};

/// Hard cap on the drawn top layer. Keeps a pathological draw from
/// allocating an absurd layer stack.
pub(crate) const LAYER_CAP: u8 = 16;

/// Errors from graph operations.
///
/// These indicate internal corruption (a neighbor list referencing a slot
/// that was never flushed); they are not reachable through the public API
/// when the coordinator's invariants hold.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A neighbor list referenced an id with no graph node.
    #[error("node {0} is not resident in the graph")]
    NotResident(u32),
}

/// Construction parameters for the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphParams {
    /// Max neighbors per node at layers > 0.
    pub m: usize,
    /// Max neighbors per node at layer 0.
    pub m_max0: usize,
    /// Candidate-pool width during insertion.
    pub ef_construction: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 200,
        }
    }
}

/// Distance oracle for search: scores stored nodes against the query.
///
/// The query is whatever the operation is centered on — the caller's vector
/// during lookup, the new node's vector during insertion.
pub trait QueryDistance {
    /// Distance from the query to the stored node `id`.
    fn to_query(&self, id: NodeId) -> f32;
}

/// Distance oracle for construction: additionally scores node pairs, which
/// the neighbor-selection heuristic needs.
pub trait DistanceView: QueryDistance {
    /// Distance between two stored nodes.
    fn between(&self, a: NodeId, b: NodeId) -> f32;
}

/// A graph node: one bounded neighbor list per layer up to its top layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// `layers[l]` holds the neighbors at layer `l`; `layers.len() - 1` is
    /// the node's top layer.
    layers: Vec<Vec<NodeId>>,
}

impl GraphNode {
    fn with_top_layer(top: u8) -> Self {
        Self {
            layers: vec![Vec::new(); usize::from(top) + 1],
        }
    }

    /// Rebuilds a node from persisted neighbor lists.
    #[must_use]
    pub(crate) fn from_layers(layers: Vec<Vec<NodeId>>) -> Self {
        debug_assert!(!layers.is_empty());
        Self { layers }
    }

    /// The highest layer this node appears on.
    #[must_use]
    pub fn top_layer(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (self.layers.len() - 1) as u8
        }
    }

    /// Neighbor list at `layer`. Empty for layers above the top layer.
    #[must_use]
    pub fn neighbors(&self, layer: u8) -> &[NodeId] {
        self.layers
            .get(usize::from(layer))
            .map_or(&[], Vec::as_slice)
    }

    fn layer_mut(&mut self, layer: u8) -> &mut Vec<NodeId> {
        &mut self.layers[usize::from(layer)]
    }

    fn memory_usage(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.capacity() * std::mem::size_of::<NodeId>())
            .sum::<usize>()
            + self.layers.capacity() * std::mem::size_of::<Vec<NodeId>>()
    }
}

/// The layered proximity graph.
#[derive(Debug, Clone)]
pub struct ProximityGraph {
    params: GraphParams,
    /// Slot per assigned `NodeId`; `None` while the id is still buffered.
    nodes: Vec<Option<GraphNode>>,
    /// Tombstones for graph-resident nodes.
    deleted: BitVec,
    entry_point: Option<NodeId>,
    top_layer: u8,
    /// Level probability multiplier, `1 / ln(M)`.
    level_mult: f32,
    /// Seeded generator; the only source of randomness in the engine.
    rng: ChaCha8Rng,
    /// Graph-resident, non-tombstoned node count.
    live_count: usize,
}

impl ProximityGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(params: GraphParams, seed: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let m = params.m as f32;
        let level_mult = if m > 1.0 { 1.0 / m.ln() } else { 0.0 };
        Self {
            params,
            nodes: Vec::new(),
            deleted: BitVec::new(),
            entry_point: None,
            top_layer: 0,
            level_mult,
            rng: ChaCha8Rng::seed_from_u64(seed),
            live_count: 0,
        }
    }

    /// Draws a top layer from the geometric distribution
    /// `floor(-ln(U) * 1/ln(M))`, capped at [`LAYER_CAP`].
    pub(crate) fn random_level(&mut self) -> u8 {
        let u: f32 = self.rng.gen_range(f32::EPSILON..=1.0);
        let level = (-u.ln() * self.level_mult).floor();
        if level >= f32::from(LAYER_CAP) {
            LAYER_CAP
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                level as u8
            }
        }
    }

    /// Construction parameters.
    #[must_use]
    pub fn params(&self) -> &GraphParams {
        &self.params
    }

    /// Graph-resident, non-tombstoned node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.live_count
    }

    /// The designated entry point, if the graph has any live node.
    #[must_use]
    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    /// The graph's running top layer.
    #[must_use]
    pub fn top_layer(&self) -> u8 {
        self.top_layer
    }

    /// Whether `id` has a graph node (tombstoned or not).
    #[must_use]
    pub fn is_resident(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(std::option::Option::is_some)
    }

    /// Whether `id` is a tombstoned graph node.
    #[must_use]
    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.is_resident(id) && self.deleted[id.index()]
    }

    /// The node for `id`, tombstoned or not.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode, GraphError> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::NotResident(id.0))
    }

    fn ensure_slot(&mut self, id: NodeId) {
        if id.index() >= self.nodes.len() {
            self.nodes.resize(id.index() + 1, None);
            self.deleted.resize(id.index() + 1, false);
        }
    }

    /// Tombstones a graph-resident node.
    ///
    /// The node's slot and inbound references stay in place; traversal skips
    /// it from now on. If the entry point dies, the live node with the
    /// greatest top layer (ties broken by lower id) is promoted.
    ///
    /// Returns `false` if `id` is not a live graph node.
    pub fn tombstone(&mut self, id: NodeId) -> bool {
        if !self.is_resident(id) || self.deleted[id.index()] {
            return false;
        }
        self.deleted.set(id.index(), true);
        self.live_count -= 1;
        if self.entry_point == Some(id) {
            self.elect_entry_point();
        }
        true
    }

    /// Rescans for the live node with the greatest top layer.
    fn elect_entry_point(&mut self) {
        let mut best: Option<(u8, NodeId)> = None;
        for (slot, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if self.deleted[slot] {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(slot as u32);
            let top = node.top_layer();
            let better = match best {
                None => true,
                // Strict comparison keeps the lowest id among ties.
                Some((best_top, _)) => top > best_top,
            };
            if better {
                best = Some((top, id));
            }
        }
        match best {
            Some((top, id)) => {
                self.entry_point = Some(id);
                self.top_layer = top;
            }
            None => {
                self.entry_point = None;
                self.top_layer = 0;
            }
        }
    }

    /// Drops every node and resets the entry point. The generator keeps its
    /// current state; reproducible rebuilds construct a fresh graph instead.
    pub fn clear(&mut self) {
        self.nodes = Vec::new();
        self.deleted = BitVec::new();
        self.entry_point = None;
        self.top_layer = 0;
        self.live_count = 0;
    }

    /// Iterates every resident node (tombstoned included) in id order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes.iter().enumerate().filter_map(|(slot, node)| {
            #[allow(clippy::cast_possible_truncation)]
            let id = NodeId(slot as u32);
            node.as_ref().map(move |n| (id, n))
        })
    }

    /// Number of resident nodes, tombstoned included. Persistence writes one
    /// record per resident.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Rebuilds a graph from persisted parts.
    ///
    /// `records` holds one entry per resident node; `deleted_ids` the subset
    /// that was tombstoned at checkpoint time.
    pub(crate) fn from_parts(
        params: GraphParams,
        seed: u64,
        slot_count: usize,
        records: Vec<(NodeId, GraphNode)>,
        deleted_ids: &[NodeId],
        entry_point: Option<NodeId>,
        top_layer: u8,
    ) -> Self {
        let mut graph = Self::new(params, seed);
        graph.nodes.resize(slot_count, None);
        graph.deleted.resize(slot_count, false);
        for (id, node) in records {
            graph.ensure_slot(id);
            graph.nodes[id.index()] = Some(node);
            graph.live_count += 1;
        }
        for &id in deleted_ids {
            if graph.is_resident(id) && !graph.deleted[id.index()] {
                graph.deleted.set(id.index(), true);
                graph.live_count -= 1;
            }
        }
        graph.entry_point = entry_point;
        graph.top_layer = top_layer;
        graph
    }

    /// Approximate heap bytes held by neighbor lists and node slots.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let node_bytes: usize = self
            .nodes
            .iter()
            .flatten()
            .map(GraphNode::memory_usage)
            .sum();
        node_bytes
            + self.nodes.capacity() * std::mem::size_of::<Option<GraphNode>>()
            + self.deleted.capacity() / 8
    }
}
