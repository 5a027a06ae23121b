//! Distance kernels.
//!
//! Three distance contracts (squared L2, cosine distance, negated inner
//! product) over three vector representations (raw f32, scalar-8 quantized,
//! binary quantized) — nine kernels total. Smaller is always closer.
//!
//! Dispatch happens once per operation via [`DistanceKind`]; the inner loops
//! are monomorphic free functions or `Metric` impls, never trait objects.
//!
//! # Numerical contract
//!
//! Results are deterministic for identical inputs but are accumulated
//! lane-wise (4 partial sums), so they need not match naive scalar
//! accumulation bit-for-bit.

use serde::{Deserialize, Serialize};

mod cosine;
mod dot;
mod hamming;
mod l2;
pub mod quantized;

pub use cosine::CosineDistance;
pub use dot::InnerProduct;
pub use hamming::{hamming, Hamming};
pub use l2::L2Squared;

/// A distance function over equal-length slices.
pub trait Metric<T> {
    /// Computes the distance between `a` and `b`.
    ///
    /// # Panics
    ///
    /// Panics if `a` and `b` have different lengths.
    fn distance(a: &[T], b: &[T]) -> f32;
}

/// The distance function selected for an index instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Cosine distance, `1 - dot(a, b) / (|a||b|)`.
    Cosine,
    /// Negated inner product, so that smaller means closer.
    InnerProduct,
}

impl DistanceKind {
    /// Computes the f32 x f32 variant of the selected distance.
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceKind::L2 => L2Squared::distance(a, b),
            DistanceKind::Cosine => CosineDistance::distance(a, b),
            DistanceKind::InnerProduct => InnerProduct::distance(a, b),
        }
    }
}

/// Sums four partial accumulators produced by the lane-wise kernels.
#[inline]
pub(crate) fn fold_lanes(acc: [f32; 4]) -> f32 {
    (acc[0] + acc[1]) + (acc[2] + acc[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_matches_direct_kernels() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [5.0, 4.0, 3.0, 2.0, 1.0];

        assert_eq!(
            DistanceKind::L2.distance(&a, &b),
            L2Squared::distance(&a, &b)
        );
        assert_eq!(
            DistanceKind::Cosine.distance(&a, &b),
            CosineDistance::distance(&a, &b)
        );
        assert_eq!(
            DistanceKind::InnerProduct.distance(&a, &b),
            InnerProduct::distance(&a, &b)
        );
    }

    #[test]
    fn test_default_is_l2() {
        assert_eq!(DistanceKind::default(), DistanceKind::L2);
    }
}
