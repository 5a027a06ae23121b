//! Squared L2 distance metric.

use super::{fold_lanes, Metric};

/// Squared Euclidean distance.
///
/// Calculates `sum((a_i - b_i)^2)`. The square root is never taken:
/// squared distances preserve ordering and are cheaper.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Squared;

impl Metric<f32> for L2Squared {
    #[inline]
    fn distance(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(
            a.len(),
            b.len(),
            "dimension mismatch: {} != {}",
            a.len(),
            b.len()
        );

        let mut acc = [0.0f32; 4];
        let chunks = a.len() / 4 * 4;

        for i in (0..chunks).step_by(4) {
            for lane in 0..4 {
                let diff = a[i + lane] - b[i + lane];
                acc[lane] += diff * diff;
            }
        }
        let mut sum = fold_lanes(acc);
        for i in chunks..a.len() {
            let diff = a[i] - b[i];
            sum += diff * diff;
        }
        sum
    }
}
