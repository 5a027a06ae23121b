//! Index statistics and memory accounting.
//!
//! Approximate byte counts per sub-store, assembled on demand for
//! observability. Nothing here sits on a latency-sensitive path.

use serde::{Deserialize, Serialize};

/// Approximate heap bytes held by each sub-store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    /// Raw f32 vector storage.
    pub vectors: usize,
    /// Scalar-8 codes and parameters, when enabled.
    pub scalar8: usize,
    /// Packed sign bits and norms, when enabled.
    pub binary: usize,
    /// Graph neighbor lists and node slots.
    pub graph: usize,
    /// External-internal id mapping.
    pub id_map: usize,
    /// Metadata entries.
    pub metadata: usize,
    /// Staged write-buffer entries.
    pub buffer: usize,
}

impl MemoryBreakdown {
    /// Sum over every component.
    #[must_use]
    pub fn total(&self) -> usize {
        self.vectors
            + self.scalar8
            + self.binary
            + self.graph
            + self.id_map
            + self.metadata
            + self.buffer
    }
}

/// A snapshot of index state for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Live (non-tombstoned) entry count.
    pub count: usize,
    /// The inferred dimension; `None` before the first insert.
    pub dimension: Option<usize>,
    /// Entries currently staged in the write buffer.
    pub buffer_len: usize,
    /// Configured buffer capacity.
    pub buffer_capacity: usize,
    /// Live nodes resident in the graph.
    pub graph_nodes: usize,
    /// The graph's running top layer.
    pub graph_top_layer: u8,
    /// Per-component byte usage.
    pub memory: MemoryBreakdown,
}
