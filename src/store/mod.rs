//! Vector storage.
//!
//! Dense row-major storage of raw f32 vectors, indexed by [`NodeId`]. The
//! store owns id assignment: ids are handed out densely in insertion order
//! and never recycled; deletion tombstones the slot in place.
//!
//! Dimension validation lives in the coordinator, not here.

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod binary;
pub mod scalar8;

pub use binary::BinaryQuantStore;
pub use scalar8::{ScalarQuantStore, Sq8Params};

/// Internal node identifier, densely assigned in insertion order.
///
/// Ids are never reused; a tombstoned id keeps its slot forever.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The slot index backing this id.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Errors from the storage layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The allocator refused to grow the named component.
    #[error("allocation failed in {0}")]
    AllocationFailed(&'static str),
}

/// Contiguous row-major storage of raw f32 vectors.
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    /// Flat vector data (layout: `[v0_d0, .., v0_dN, v1_d0, ..]`).
    data: Vec<f32>,
    /// Components per vector.
    dims: usize,
    /// One bit per slot; set means deleted.
    tombstones: BitVec,
}

impl VectorStore {
    /// Creates an empty store for vectors of `dims` components.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self {
            data: Vec::new(),
            dims,
            tombstones: BitVec::new(),
        }
    }

    /// Rebuilds a store from recovered parts.
    ///
    /// `data.len()` must be a multiple of `dims`, and `tombstones` must have
    /// one bit per row; callers validate before constructing.
    #[must_use]
    pub(crate) fn from_parts(dims: usize, data: Vec<f32>, tombstones: BitVec) -> Self {
        debug_assert!(dims > 0);
        debug_assert_eq!(data.len() % dims, 0);
        debug_assert_eq!(tombstones.len(), data.len() / dims);
        Self {
            data,
            dims,
            tombstones,
        }
    }

    /// Components per vector.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Appends a vector and returns its newly assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AllocationFailed` if the backing buffer cannot
    /// grow.
    pub fn push(&mut self, vector: &[f32]) -> Result<NodeId, StoreError> {
        debug_assert_eq!(vector.len(), self.dims);

        self.data
            .try_reserve(vector.len())
            .map_err(|_| StoreError::AllocationFailed("vector_store"))?;

        let id = NodeId(u32::try_from(self.tombstones.len()).expect("slot count fits in u32"));
        self.data.extend_from_slice(vector);
        self.tombstones.push(false);
        Ok(id)
    }

    /// Returns the vector stored at `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of bounds or tombstoned. Callers check
    /// [`Self::is_tombstoned`] first.
    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId) -> &[f32] {
        assert!(
            !self.tombstones[id.index()],
            "access to tombstoned slot {}",
            id.0
        );
        let start = id.index() * self.dims;
        &self.data[start..start + self.dims]
    }

    /// Overwrites the vector at `id` in place. Used by upsert.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of bounds or tombstoned.
    pub fn overwrite(&mut self, id: NodeId, vector: &[f32]) {
        debug_assert_eq!(vector.len(), self.dims);
        assert!(
            !self.tombstones[id.index()],
            "overwrite of tombstoned slot {}",
            id.0
        );
        let start = id.index() * self.dims;
        self.data[start..start + self.dims].copy_from_slice(vector);
    }

    /// Marks the slot dead. Returns `false` if it already was.
    pub fn tombstone(&mut self, id: NodeId) -> bool {
        if self.tombstones[id.index()] {
            return false;
        }
        self.tombstones.set(id.index(), true);
        true
    }

    /// Whether the slot is tombstoned.
    #[inline]
    #[must_use]
    pub fn is_tombstoned(&self, id: NodeId) -> bool {
        self.tombstones[id.index()]
    }

    /// Total slots, tombstoned included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    /// Whether the store holds no slots at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tombstones.is_empty()
    }

    /// Number of live (non-tombstoned) slots.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.tombstones.len() - self.tombstones.count_ones()
    }

    /// Frees storage and resets length to zero.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.tombstones = BitVec::new();
    }

    /// Flat view of every slot's data, tombstoned rows included.
    ///
    /// Persistence writes slots densely so ids stay stable across a
    /// round-trip.
    #[must_use]
    pub(crate) fn raw_rows(&self) -> &[f32] {
        &self.data
    }

    /// Approximate heap bytes held by this store.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<f32>() + self.tombstones.capacity() / 8
    }
}
