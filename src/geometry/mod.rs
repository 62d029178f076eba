mod bounding_box;

pub use bounding_box::BoundingBox;

/// Types that occupy a region described by a [`BoundingBox`]
pub trait Bounded {
    fn bounding_box(&self) -> &BoundingBox;
}

impl Bounded for BoundingBox {
    fn bounding_box(&self) -> &BoundingBox {
        self
    }
}

/// Euclidean distance between two points of equal dimension.
///
/// Summation order matches [`BoundingBox::min_distance`], so a point and
/// its degenerate box always report the exact same distance.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "Points must have equal dimensions");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_euclidean_distance() {
        assert_abs_diff_eq!(5.0, euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]));
        assert_abs_diff_eq!(0.0, euclidean_distance(&[1.5, -2.0], &[1.5, -2.0]));
    }

    #[test]
    #[should_panic]
    fn test_euclidean_distance_mismatch() {
        euclidean_distance(&[0.0, 0.0], &[0.0, 0.0, 0.0]);
    }
}
