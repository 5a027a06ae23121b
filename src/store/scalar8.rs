//! Scalar 8-bit quantized store.
//!
//! One byte per dimension plus a per-vector affine pair `(scale, offset)`
//! mapping `[min, max]` of the source vector onto `[0, 255]`:
//! `raw[i] ~= code[i] * scale + offset` with per-component error bounded by
//! `scale / 2`.
//!
//! Entries are produced at graph-flush time, never on the read path. The
//! store is slot-parallel with the raw [`super::VectorStore`]: slots for
//! buffered or tombstoned ids hold zeroed codes.

use serde::{Deserialize, Serialize};

use super::{NodeId, StoreError};

/// Per-vector affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sq8Params {
    /// `(max - min) / 255` of the source vector.
    pub scale: f32,
    /// `min` of the source vector.
    pub offset: f32,
}

/// Slot-parallel storage of scalar-8 codes.
#[derive(Debug, Clone, Default)]
pub struct ScalarQuantStore {
    dims: usize,
    codes: Vec<u8>,
    params: Vec<Sq8Params>,
}

impl ScalarQuantStore {
    /// Creates an empty store for vectors of `dims` components.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            codes: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the store has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Grows the store with zeroed slots up to `slots`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AllocationFailed` if the backing buffers cannot
    /// grow.
    pub fn ensure_slots(&mut self, slots: usize) -> Result<(), StoreError> {
        if slots <= self.params.len() {
            return Ok(());
        }
        let grow = slots - self.params.len();
        self.codes
            .try_reserve(grow * self.dims)
            .map_err(|_| StoreError::AllocationFailed("scalar8_store"))?;
        self.params
            .try_reserve(grow)
            .map_err(|_| StoreError::AllocationFailed("scalar8_store"))?;
        self.codes.resize(slots * self.dims, 0);
        self.params.resize(slots, Sq8Params::default());
        Ok(())
    }

    /// Quantizes `vector` into the slot for `id`, growing as needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AllocationFailed` if the backing buffers cannot
    /// grow.
    pub fn set(&mut self, id: NodeId, vector: &[f32]) -> Result<(), StoreError> {
        debug_assert_eq!(vector.len(), self.dims);
        self.ensure_slots(id.index() + 1)?;

        let (params, code_buf) = (quantize_params(vector), self.slot_mut(id));
        encode_into(vector, params, code_buf);
        self.params[id.index()] = params;
        Ok(())
    }

    /// Returns the code bytes and affine parameters for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not exist.
    #[inline]
    #[must_use]
    pub fn get(&self, id: NodeId) -> (&[u8], Sq8Params) {
        let start = id.index() * self.dims;
        (&self.codes[start..start + self.dims], self.params[id.index()])
    }

    /// Zeroes the slot for a tombstoned id. No-op for unknown slots.
    pub fn remove(&mut self, id: NodeId) {
        if id.index() >= self.params.len() {
            return;
        }
        self.slot_mut(id).fill(0);
        self.params[id.index()] = Sq8Params::default();
    }

    /// Drops every slot.
    pub fn clear(&mut self) {
        self.codes = Vec::new();
        self.params = Vec::new();
    }

    /// Approximate heap bytes held by this store.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.codes.capacity() + self.params.capacity() * std::mem::size_of::<Sq8Params>()
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut [u8] {
        let start = id.index() * self.dims;
        &mut self.codes[start..start + self.dims]
    }
}

/// Computes the per-vector affine parameters.
#[must_use]
pub fn quantize_params(vector: &[f32]) -> Sq8Params {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &x in vector {
        min = min.min(x);
        max = max.max(x);
    }
    if min > max {
        // Empty input; callers never pass one, but keep the params sane.
        return Sq8Params::default();
    }
    Sq8Params {
        scale: (max - min) / 255.0,
        offset: min,
    }
}

/// Encodes `vector` with `params` into `out`.
///
/// A degenerate range (`scale == 0`) encodes every component as 0; the
/// offset alone reconstructs the constant vector.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode_into(vector: &[f32], params: Sq8Params, out: &mut [u8]) {
    debug_assert_eq!(vector.len(), out.len());
    if params.scale <= f32::EPSILON {
        out.fill(0);
        return;
    }
    for (slot, &x) in out.iter_mut().zip(vector.iter()) {
        *slot = ((x - params.offset) / params.scale).round().clamp(0.0, 255.0) as u8;
    }
}

/// Reconstructs an f32 vector from a code. Test and inspection helper.
#[must_use]
pub fn decode(code: &[u8], params: Sq8Params) -> Vec<f32> {
    code.iter()
        .map(|&c| f32::from(c) * params.scale + params.offset)
        .collect()
}
