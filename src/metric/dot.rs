//! Inner product distance metric.

use super::{fold_lanes, Metric};

/// Negated inner product.
///
/// Calculates `-sum(a_i * b_i)` so that a larger dot product (more similar)
/// yields a smaller distance, matching the ordering contract of the other
/// metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerProduct;

/// Plain dot product with lane-wise accumulation.
#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4 * 4;

    for i in (0..chunks).step_by(4) {
        for lane in 0..4 {
            acc[lane] += a[i + lane] * b[i + lane];
        }
    }
    let mut sum = fold_lanes(acc);
    for i in chunks..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

impl Metric<f32> for InnerProduct {
    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(
            a.len(),
            b.len(),
            "dimension mismatch: {} != {}",
            a.len(),
            b.len()
        );
        -dot(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_product_negated() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        // dot = 4 + 10 + 18 = 32
        assert!((InnerProduct::distance(&a, &b) + 32.0).abs() < 1e-6);
    }

    #[test]
    fn test_larger_dot_is_closer() {
        let q = [1.0, 0.0];
        let near = [2.0, 0.0];
        let far = [0.5, 0.0];
        assert!(InnerProduct::distance(&q, &near) < InnerProduct::distance(&q, &far));
    }
}
