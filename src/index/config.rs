//! Index configuration.
//!
//! Every option has a default and a safe range; out-of-range values are
//! clamped at construction rather than rejected. After the first insert
//! only `ef_search` stays mutable; everything else is frozen.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::graph::GraphParams;
use crate::metric::DistanceKind;

/// Quantized representation maintained alongside the raw vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuantizationMode {
    /// Raw f32 only.
    #[default]
    None,
    /// 8-bit scalar quantization with per-vector scale and offset.
    Scalar8,
    /// 1-bit sign quantization with stored norms.
    Binary,
}

/// Configuration for an index instance.
///
/// The vector dimension is not an option: it is inferred from the first
/// successful insert and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Distance function. Default L2.
    pub distance: DistanceKind,

    /// Max neighbors per graph node at layers > 0. Default 16, range 4..=64.
    pub m: usize,

    /// Max neighbors at layer 0. Default `2 * m`, range `m..=4 * m`.
    pub m_max0: Option<usize>,

    /// Construction-time candidate pool width. Default 200, range 16..=1000.
    pub ef_construction: usize,

    /// Query-time candidate pool width. Default 50, range 1..=1000; the
    /// effective width of a search is `max(k, ef_search)`. Mutable at any
    /// time through `set_ef_search`.
    pub ef_search: usize,

    /// Write-buffer capacity. Default 10 000, range 1..=1 000 000.
    pub buffer_capacity: usize,

    /// Quantization mode. Default none; immutable after first insert.
    pub quantization: QuantizationMode,

    /// Seed for the layer-sampling generator. Identical seed and insertion
    /// order reproduce the graph exactly.
    pub seed: u64,

    /// Base path for the checkpoint files; persistence stays off without it.
    pub persistence_path: Option<PathBuf>,

    /// Whether to append every write to `<base>.wal` before acknowledging.
    pub use_wal: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            distance: DistanceKind::L2,
            m: 16,
            m_max0: None,
            ef_construction: 200,
            ef_search: 50,
            buffer_capacity: 10_000,
            quantization: QuantizationMode::None,
            seed: 42,
            persistence_path: None,
            use_wal: false,
        }
    }
}

impl IndexOptions {
    /// Clamps every numeric option into its safe range and resolves
    /// `m_max0`.
    #[must_use]
    pub(crate) fn clamped(mut self) -> Self {
        self.m = self.m.clamp(4, 64);
        self.m_max0 = Some(
            self.m_max0
                .unwrap_or(2 * self.m)
                .clamp(self.m, 4 * self.m),
        );
        self.ef_construction = self.ef_construction.clamp(16, 1000);
        self.ef_search = clamp_ef_search(self.ef_search);
        self.buffer_capacity = self.buffer_capacity.clamp(1, 1_000_000);
        self
    }

    /// The resolved layer-0 neighbor bound.
    #[must_use]
    pub fn resolved_m_max0(&self) -> usize {
        self.m_max0.unwrap_or(2 * self.m)
    }

    /// Graph construction parameters derived from these options.
    #[must_use]
    pub(crate) fn graph_params(&self) -> GraphParams {
        GraphParams {
            m: self.m,
            m_max0: self.resolved_m_max0(),
            ef_construction: self.ef_construction,
        }
    }
}

/// Range clamp for `ef_search`, shared with the runtime setter.
#[must_use]
pub(crate) fn clamp_ef_search(ef: usize) -> usize {
    ef.clamp(1, 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let opts = IndexOptions::default();
        assert_eq!(opts.distance, DistanceKind::L2);
        assert_eq!(opts.m, 16);
        assert_eq!(opts.ef_construction, 200);
        assert_eq!(opts.ef_search, 50);
        assert_eq!(opts.buffer_capacity, 10_000);
        assert_eq!(opts.quantization, QuantizationMode::None);
        assert!(!opts.use_wal);
    }

    #[test]
    fn test_clamping_pulls_into_range() {
        let opts = IndexOptions {
            m: 1000,
            ef_construction: 1,
            ef_search: 50_000,
            buffer_capacity: 0,
            ..IndexOptions::default()
        }
        .clamped();

        assert_eq!(opts.m, 64);
        assert_eq!(opts.ef_construction, 16);
        assert_eq!(opts.ef_search, 1000);
        assert_eq!(opts.buffer_capacity, 1);
    }

    #[test]
    fn test_m_max0_defaults_to_twice_m() {
        let opts = IndexOptions {
            m: 12,
            ..IndexOptions::default()
        }
        .clamped();
        assert_eq!(opts.resolved_m_max0(), 24);
    }

    #[test]
    fn test_m_max0_clamped_to_m_range() {
        let opts = IndexOptions {
            m: 8,
            m_max0: Some(2),
            ..IndexOptions::default()
        }
        .clamped();
        assert_eq!(opts.resolved_m_max0(), 8);

        let opts = IndexOptions {
            m: 8,
            m_max0: Some(500),
            ..IndexOptions::default()
        }
        .clamped();
        assert_eq!(opts.resolved_m_max0(), 32);
    }
}
