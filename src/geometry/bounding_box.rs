use super::*;
use crate::{EmptyInputSnafu, PreconditionViolationSnafu, Result};
use approx::AbsDiffEq;
use get_size::GetSize;
use itertools::Itertools;
use snafu::prelude::*;
use std::fmt;

/// An axis-aligned box in `D` dimensions
///
/// Stored as its lower-left and upper-right corners, which always have the same length.
#[derive(Debug, Clone, PartialEq, GetSize)]
pub struct BoundingBox {
    lower_left: Vec<f64>,
    upper_right: Vec<f64>,
}

impl BoundingBox {
    pub fn new(lower_left: Vec<f64>, upper_right: Vec<f64>) -> Result<Self> {
        ensure!(
            lower_left.len() == upper_right.len(),
            PreconditionViolationSnafu {
                description: format!(
                    "Corners have different dimensions: {} vs {}",
                    lower_left.len(),
                    upper_right.len()
                ),
            }
        );
        ensure!(
            !lower_left.is_empty(),
            PreconditionViolationSnafu {
                description: "A bounding box needs at least one dimension".to_string(),
            }
        );
        let bb = BoundingBox {
            lower_left,
            upper_right,
        };
        if cfg!(test) {
            bb.assert_legal();
        }
        Ok(bb)
    }

    /// A degenerate box covering exactly `point`
    pub fn from_point(point: &[f64]) -> Self {
        assert!(!point.is_empty(), "A point needs at least one dimension");
        BoundingBox {
            lower_left: point.to_vec(),
            upper_right: point.to_vec(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.lower_left.len()
    }

    pub fn lower_left(&self) -> &[f64] {
        &self.lower_left
    }

    pub fn upper_right(&self) -> &[f64] {
        &self.upper_right
    }

    pub fn lower(&self, dimension: usize) -> f64 {
        self.lower_left[dimension]
    }

    pub fn upper(&self, dimension: usize) -> f64 {
        self.upper_right[dimension]
    }

    pub fn assert_legal(&self) {
        assert!(
            self.lower_left
                .iter()
                .zip(self.upper_right.iter())
                .all(|(l, u)| l <= u),
            "Bounding box {} is illegal!",
            self
        );
    }

    fn assert_same_dimensions(&self, other_dimensions: usize) {
        assert_eq!(
            self.dimensions(),
            other_dimensions,
            "Dimension mismatch between {} and a {}-dimensional operand",
            self,
            other_dimensions
        );
    }

    fn extents(&self) -> impl Iterator<Item = f64> + '_ {
        self.lower_left
            .iter()
            .zip(self.upper_right.iter())
            .map(|(l, u)| (u - l).abs())
    }

    /// Product of the extents along every dimension
    pub fn area(&self) -> f64 {
        self.extents().product()
    }

    /// Sum of the extents along every dimension
    pub fn margin(&self) -> f64 {
        self.extents().sum()
    }

    pub fn center(&self) -> Vec<f64> {
        self.lower_left
            .iter()
            .zip(self.upper_right.iter())
            .map(|(l, u)| l + (u - l) / 2.0)
            .collect()
    }

    /// Volume of the intersection of `self` and `other`, `0.0` if they are disjoint
    /// or only touch.
    pub fn overlap(&self, other: &BoundingBox) -> f64 {
        self.assert_same_dimensions(other.dimensions());
        let mut overlap = 1.0;
        for d in 0..self.dimensions() {
            let low = self.lower(d).max(other.lower(d));
            let high = self.upper(d).min(other.upper(d));
            let extent = high - low;
            if extent <= 0.0 {
                return 0.0;
            }
            overlap *= extent;
        }
        overlap
    }

    /// Returns true if `other` is completely contained within the confines of this box
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.assert_same_dimensions(other.dimensions());
        (0..self.dimensions())
            .all(|d| self.lower(d) <= other.lower(d) && other.upper(d) <= self.upper(d))
    }

    pub fn contains_point(&self, point: &[f64]) -> bool {
        self.assert_same_dimensions(point.len());
        point
            .iter()
            .enumerate()
            .all(|(d, p)| self.lower(d) <= *p && *p <= self.upper(d))
    }

    /// Smallest box containing both `self` and `other`
    pub fn extend(&self, other: &BoundingBox) -> BoundingBox {
        self.assert_same_dimensions(other.dimensions());
        let lower_left = self
            .lower_left
            .iter()
            .zip(other.lower_left.iter())
            .map(|(a, b)| a.min(*b))
            .collect();
        let upper_right = self
            .upper_right
            .iter()
            .zip(other.upper_right.iter())
            .map(|(a, b)| a.max(*b))
            .collect();
        BoundingBox {
            lower_left,
            upper_right,
        }
    }

    /// How much the area grows when `self` is extended to also cover `other`
    pub fn area_enlargement(&self, other: &BoundingBox) -> f64 {
        self.extend(other).area() - self.area()
    }

    /// Minimal Euclidean distance from `point` to any point of this box (MINDIST)
    pub fn min_distance(&self, point: &[f64]) -> f64 {
        self.assert_same_dimensions(point.len());
        point
            .iter()
            .enumerate()
            .map(|(d, p)| {
                let diff = if *p < self.lower(d) {
                    self.lower(d) - p
                } else if *p > self.upper(d) {
                    p - self.upper(d)
                } else {
                    0.0
                };
                diff * diff
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Upper bound on the distance from `point` to the closest object in this box (MINMAXDIST)
    ///
    /// Every face of a minimum bounding box touches at least one object, so for each
    /// dimension `k` the nearer face along `k` combined with the farther edges along every
    /// other dimension yields a point no object-free box could have. The minimum over
    /// all `k` is the bound.
    pub fn min_max_distance(&self, point: &[f64]) -> f64 {
        self.assert_same_dimensions(point.len());
        let dims = self.dimensions();
        let mut best = f64::INFINITY;
        for k in 0..dims {
            let sum: f64 = (0..dims)
                .map(|d| {
                    let diff = if d == k {
                        self.near_edge_distance(d, point[d])
                    } else {
                        self.far_edge_distance(d, point[d])
                    };
                    diff * diff
                })
                .sum();
            best = best.min(sum);
        }
        best.sqrt()
    }

    /// Distance along `d` to the box face closer to `p`
    fn near_edge_distance(&self, d: usize, p: f64) -> f64 {
        (p - self.lower(d)).abs().min((p - self.upper(d)).abs())
    }

    /// Distance along `d` to the box face farther from `p`
    fn far_edge_distance(&self, d: usize, p: f64) -> f64 {
        (p - self.lower(d)).abs().max((p - self.upper(d)).abs())
    }

    /// Minimum bounding rectangle of all `boxes`
    pub fn calculate_mbr<'a, B>(boxes: impl IntoIterator<Item = &'a B>) -> Result<BoundingBox>
    where
        B: Bounded + 'a,
    {
        let mut boxes = boxes.into_iter();
        let first = boxes.next().context(EmptyInputSnafu)?;
        let mut mbr = first.bounding_box().clone();
        for b in boxes {
            let other = b.bounding_box();
            mbr.assert_same_dimensions(other.dimensions());
            for d in 0..mbr.dimensions() {
                mbr.lower_left[d] = mbr.lower_left[d].min(other.lower(d));
                mbr.upper_right[d] = mbr.upper_right[d].max(other.upper(d));
            }
        }
        if cfg!(test) {
            mbr.assert_legal();
        }
        Ok(mbr)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[({})|({})]",
            self.lower_left.iter().join(","),
            self.upper_right.iter().join(",")
        )
    }
}

impl AbsDiffEq for BoundingBox {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .lower_left
                .iter()
                .zip(other.lower_left.iter())
                .chain(self.upper_right.iter().zip(other.upper_right.iter()))
                .all(|(a, b)| a.abs_diff_eq(b, epsilon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_abs_diff_ne};

    fn bb(lower: &[f64], upper: &[f64]) -> BoundingBox {
        BoundingBox::new(lower.to_vec(), upper.to_vec()).expect("valid box")
    }

    #[test]
    fn test_measures() {
        let b = bb(&[0.0, 0.0], &[2.0, 3.0]);
        assert_abs_diff_eq!(6.0, b.area());
        assert_abs_diff_eq!(5.0, b.margin());
        assert_eq!(vec![1.0, 1.5], b.center());

        let shifted = bb(&[-4.0, 2.0], &[-2.0, 6.0]);
        assert_eq!(vec![-3.0, 4.0], shifted.center());

        let point = BoundingBox::from_point(&[1.0, 1.0]);
        assert_abs_diff_eq!(0.0, point.area());
        assert_abs_diff_eq!(0.0, point.margin());
    }

    #[test]
    fn test_overlap() {
        let a = bb(&[0.0, 0.0], &[2.0, 2.0]);
        let b = bb(&[1.0, 1.0], &[3.0, 3.0]);
        assert_abs_diff_eq!(1.0, a.overlap(&b));
        assert_abs_diff_eq!(1.0, b.overlap(&a));

        // disjoint in one dimension only
        let c = bb(&[5.0, 0.0], &[6.0, 2.0]);
        assert_abs_diff_eq!(0.0, a.overlap(&c));

        // touching edges
        let d = bb(&[2.0, 0.0], &[4.0, 2.0]);
        assert_abs_diff_eq!(0.0, a.overlap(&d));

        assert_abs_diff_eq!(a.area(), a.overlap(&a));
    }

    #[test]
    fn test_contains_and_extend() {
        let a = bb(&[0.0, 0.0], &[2.0, 2.0]);
        let inner = bb(&[0.5, 0.5], &[1.0, 2.0]);
        let outer = bb(&[1.0, 1.0], &[3.0, 3.0]);
        assert!(a.contains(&inner));
        assert!(a.contains(&a));
        assert!(!a.contains(&outer));

        let extended = a.extend(&outer);
        assert_abs_diff_eq!(bb(&[0.0, 0.0], &[3.0, 3.0]), extended);
        assert!(extended.contains(&a));
        assert!(extended.contains(&outer));
        assert_abs_diff_eq!(5.0, a.area_enlargement(&outer));
        assert_abs_diff_eq!(0.0, a.area_enlargement(&inner));
    }

    #[test]
    fn test_min_distance() {
        let b = bb(&[0.0, 0.0], &[2.0, 2.0]);
        assert_abs_diff_eq!(0.0, b.min_distance(&[1.0, 1.0]));
        assert_abs_diff_eq!(0.0, b.min_distance(&[2.0, 0.0]));
        assert_abs_diff_eq!(1.0, b.min_distance(&[3.0, 1.0]));
        assert_abs_diff_eq!(5.0, b.min_distance(&[5.0, 6.0]));
        assert_abs_diff_eq!(5.0, b.min_distance(&[-3.0, -4.0]));
    }

    #[test]
    fn test_min_max_distance() {
        let b = bb(&[0.0, 0.0], &[2.0, 4.0]);
        // near edge on x (0) with far edge on y (4): 4, near edge on y (0) with far x (2): 2
        assert_abs_diff_eq!(2.0, b.min_max_distance(&[0.0, 0.0]));
        // from outside
        let p = [-1.0, 1.0];
        let expected = (1.0f64 + 9.0).sqrt().min((9.0f64 + 1.0).sqrt());
        assert_abs_diff_eq!(expected, b.min_max_distance(&p));

        // a point box has a single candidate object
        let point = BoundingBox::from_point(&[3.0, 4.0]);
        assert_abs_diff_eq!(5.0, point.min_max_distance(&[0.0, 0.0]));
        assert_eq!(
            point.min_distance(&[0.0, 0.0]),
            point.min_max_distance(&[0.0, 0.0])
        );
    }

    #[test]
    fn test_min_max_distance_bounds() {
        let boxes = [
            bb(&[0.0, 0.0], &[1.0, 1.0]),
            bb(&[-3.0, 2.0], &[5.0, 2.5]),
            bb(&[10.0, -10.0], &[11.0, 10.0]),
        ];
        let points = [[0.5, 0.5], [-7.0, 3.0], [100.0, 100.0], [10.5, 0.0]];
        for b in boxes.iter() {
            for p in points.iter() {
                assert!(b.min_distance(p) <= b.min_max_distance(p));
            }
        }
    }

    #[test]
    fn test_calculate_mbr() {
        let boxes = vec![
            bb(&[0.0, 0.0], &[1.0, 1.0]),
            bb(&[-1.0, 0.5], &[0.5, 3.0]),
            BoundingBox::from_point(&[4.0, -2.0]),
        ];
        let mbr = BoundingBox::calculate_mbr(&boxes).expect("non-empty");
        assert_abs_diff_eq!(bb(&[-1.0, -2.0], &[4.0, 3.0]), mbr);
        for b in boxes.iter() {
            assert!(mbr.contains(b));
        }

        let single = vec![bb(&[0.0, 1.0], &[2.0, 3.0])];
        assert_eq!(
            single[0],
            BoundingBox::calculate_mbr(&single).expect("non-empty")
        );

        let empty: Vec<BoundingBox> = Vec::new();
        let err = BoundingBox::calculate_mbr(&empty).expect_err("empty input");
        assert!(err.is_internal_consistency());
    }

    #[test]
    fn test_construction_preconditions() {
        let err = BoundingBox::new(vec![0.0, 0.0], vec![1.0]).expect_err("mismatch");
        assert!(err.is_precondition_violation());
        let err = BoundingBox::new(vec![], vec![]).expect_err("empty");
        assert!(err.is_precondition_violation());
        assert_abs_diff_ne!(bb(&[0.0], &[1.0]), bb(&[0.0], &[2.0]));
    }

    #[test]
    #[should_panic]
    fn test_dimension_mismatch_fails_fast() {
        let a = bb(&[0.0, 0.0], &[1.0, 1.0]);
        let b = bb(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]);
        a.overlap(&b);
    }

    #[test]
    fn test_display() {
        let b = bb(&[0.0, 1.5], &[2.0, 3.0]);
        assert_eq!("[(0,1.5)|(2,3)]", b.to_string());
    }
}
