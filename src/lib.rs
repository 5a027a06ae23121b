//! # OmVec
//!
//! Embedded vector similarity search engine: an in-process library that
//! indexes fixed-dimension f32 vectors under opaque string ids and answers
//! top-K nearest-neighbor queries through a layered proximity graph.
//!
//! ## Architecture
//!
//! - **Write buffer**: inserts land in a capped buffer served by brute
//!   force; a full buffer flushes into the graph in bulk, amortizing the
//!   per-insert graph cost.
//! - **Proximity graph**: HNSW-style layered topology with bounded degree,
//!   robust-pruning neighbor selection and a seeded, deterministic layer
//!   draw.
//! - **Quantization**: optional scalar-8 (byte per dimension, per-vector
//!   scale and offset) or binary (sign bit per dimension, stored norm)
//!   representations produced at flush time and used for query-time
//!   distance.
//! - **Persistence**: an optional checkpoint of three little-endian files
//!   plus a write-ahead log, with crash-safe atomic replacement.
//!
//! ## Example
//!
//! ```rust
//! use omvec::{IndexOptions, VectorIndex};
//!
//! let mut index = VectorIndex::new();
//! index.add("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap();
//! index.add("b", &[0.0, 1.0, 0.0, 0.0], None).unwrap();
//!
//! let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 2, None).unwrap();
//! assert_eq!(hits[0].id, "a");
//! ```
//!
//! ## Concurrency
//!
//! One writer XOR many readers, serialized at the coordinator and enforced
//! by the borrow checker: mutating operations take `&mut self`, queries
//! `&self`. Wrap the index in `std::sync::RwLock` for shared use.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

/// Write buffer staging recent inserts.
pub mod buffer;

/// Unified error handling.
pub mod error;

/// Layered proximity graph.
pub mod graph;

/// Index coordinator, the public façade.
pub mod index;

/// Metadata storage and search filters.
pub mod metadata;

/// Distance kernels.
pub mod metric;

/// Checkpoint files and write-ahead log.
pub mod persistence;

/// Vector storage, raw and quantized.
pub mod store;

pub use error::IndexError;
pub use index::{
    IndexOptions, IndexStats, MemoryBreakdown, QuantizationMode, SearchMatch, VectorIndex,
};
pub use metadata::{Filter, Metadata};
pub use metric::DistanceKind;
pub use store::NodeId;

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_not_empty() {
        assert!(!version().is_empty());
    }
}
