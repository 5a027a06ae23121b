//! Distance kernels over quantized representations.
//!
//! Scalar-8 kernels dequantize on the fly per dimension using the stored
//! per-vector `(scale, offset)` pair. Binary kernels rank by a
//! Hamming-weight approximation of the dot product, rescored with the
//! stored L2 norms; they are cheap first-pass estimates, not exact
//! distances.

use super::fold_lanes;

// =============================================================================
// Scalar-8 (one byte per dimension, per-vector affine parameters)
// =============================================================================

/// Squared L2 distance between an f32 query and a scalar-8 code.
///
/// # Panics
///
/// Panics if `query` and `code` have different lengths.
#[inline]
#[must_use]
pub fn l2_squared_sq8(query: &[f32], code: &[u8], scale: f32, offset: f32) -> f32 {
    assert_eq!(query.len(), code.len());

    let mut acc = [0.0f32; 4];
    let chunks = query.len() / 4 * 4;

    for i in (0..chunks).step_by(4) {
        for lane in 0..4 {
            let x = f32::from(code[i + lane]) * scale + offset;
            let diff = query[i + lane] - x;
            acc[lane] += diff * diff;
        }
    }
    let mut sum = fold_lanes(acc);
    for i in chunks..query.len() {
        let x = f32::from(code[i]) * scale + offset;
        let diff = query[i] - x;
        sum += diff * diff;
    }
    sum
}

/// Cosine distance between an f32 query and a scalar-8 code.
///
/// # Panics
///
/// Panics if `query` and `code` have different lengths.
#[inline]
#[must_use]
pub fn cosine_sq8(query: &[f32], code: &[u8], scale: f32, offset: f32) -> f32 {
    assert_eq!(query.len(), code.len());

    let mut dot = 0.0f32;
    let mut norm_q = 0.0f32;
    let mut norm_x = 0.0f32;
    for (q, &c) in query.iter().zip(code.iter()) {
        let x = f32::from(c) * scale + offset;
        dot += q * x;
        norm_q += q * q;
        norm_x += x * x;
    }

    let denom = (norm_q * norm_x).sqrt();
    if denom <= f32::EPSILON {
        return 1.0;
    }
    1.0 - dot / denom
}

/// Negated inner product between an f32 query and a scalar-8 code.
///
/// # Panics
///
/// Panics if `query` and `code` have different lengths.
#[inline]
#[must_use]
pub fn inner_product_sq8(query: &[f32], code: &[u8], scale: f32, offset: f32) -> f32 {
    assert_eq!(query.len(), code.len());

    let mut acc = [0.0f32; 4];
    let chunks = query.len() / 4 * 4;

    for i in (0..chunks).step_by(4) {
        for lane in 0..4 {
            acc[lane] += query[i + lane] * (f32::from(code[i + lane]) * scale + offset);
        }
    }
    let mut dot = fold_lanes(acc);
    for i in chunks..query.len() {
        dot += query[i] * (f32::from(code[i]) * scale + offset);
    }
    -dot
}

// =============================================================================
// Binary (one sign bit per dimension, stored L2 norm)
// =============================================================================

/// Dot-product estimate from a Hamming distance over sign bits.
///
/// Matching signs push the estimate toward `+|q||x|`, fully opposed signs
/// toward `-|q||x|`: `dot ~= |q| * |x| * (1 - 2h/D)`.
#[inline]
#[must_use]
pub fn dot_estimate_binary(query_norm: f32, stored_norm: f32, hamming: u32, dims: usize) -> f32 {
    if dims == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let agreement = 1.0 - 2.0 * (hamming as f32) / (dims as f32);
    query_norm * stored_norm * agreement
}

/// Squared-L2 pseudo-distance from sign bits and stored norms.
///
/// Expands `|q - x|^2 = |q|^2 + |x|^2 - 2 * dot(q, x)` around the binary
/// dot estimate, clamped at zero.
#[inline]
#[must_use]
pub fn l2_squared_binary(query_norm: f32, stored_norm: f32, hamming: u32, dims: usize) -> f32 {
    let dot = dot_estimate_binary(query_norm, stored_norm, hamming, dims);
    (query_norm * query_norm + stored_norm * stored_norm - 2.0 * dot).max(0.0)
}

/// Cosine pseudo-distance from sign bits: `2h/D`.
#[inline]
#[must_use]
pub fn cosine_binary(hamming: u32, dims: usize) -> f32 {
    if dims == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    {
        2.0 * (hamming as f32) / (dims as f32)
    }
}

/// Negated inner-product pseudo-distance from sign bits and stored norms.
#[inline]
#[must_use]
pub fn inner_product_binary(query_norm: f32, stored_norm: f32, hamming: u32, dims: usize) -> f32 {
    -dot_estimate_binary(query_norm, stored_norm, hamming, dims)
}
