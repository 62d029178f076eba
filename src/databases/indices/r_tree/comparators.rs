//! Orderings over entries used by node splitting, subtree selection,
//! reinsertion, and nearest neighbour search.

use super::entries::Entry;
use crate::{
    geometry::{euclidean_distance, Bounded, BoundingBox},
    InternalConsistencySnafu, Result,
};
use snafu::prelude::*;
use std::cmp::Ordering;

/// Orders by the lower edge along `dimension`, ties by the upper edge
pub fn lower_value(dimension: usize) -> impl Fn(&Entry, &Entry) -> Ordering {
    move |a, b| {
        let (a, b) = (a.bounding_box(), b.bounding_box());
        a.lower(dimension)
            .total_cmp(&b.lower(dimension))
            .then_with(|| a.upper(dimension).total_cmp(&b.upper(dimension)))
    }
}

/// Orders by the upper edge along `dimension`, ties by the lower edge
pub fn upper_value(dimension: usize) -> impl Fn(&Entry, &Entry) -> Ordering {
    move |a, b| {
        let (a, b) = (a.bounding_box(), b.bounding_box());
        a.upper(dimension)
            .total_cmp(&b.upper(dimension))
            .then_with(|| a.lower(dimension).total_cmp(&b.lower(dimension)))
    }
}

/// Orders by the distance between an entry's center and the center of `reference`
pub fn center_distance(reference: &BoundingBox) -> impl Fn(&Entry, &Entry) -> Ordering {
    let reference_center = reference.center();
    move |a, b| {
        let a_distance = euclidean_distance(&a.bounding_box().center(), &reference_center);
        let b_distance = euclidean_distance(&b.bounding_box().center(), &reference_center);
        a_distance.total_cmp(&b_distance)
    }
}

/// Orders by the minimal distance between an entry's box and `point`
pub fn min_distance_to_point(point: &[f64]) -> impl Fn(&Entry, &Entry) -> Ordering + '_ {
    move |a, b| {
        a.bounding_box()
            .min_distance(point)
            .total_cmp(&b.bounding_box().min_distance(point))
    }
}

fn check_non_negative(kind: &str, index: usize, value: f64) -> Result<()> {
    ensure!(
        value >= 0.0,
        InternalConsistencySnafu {
            description: format!("{kind} enlargement of entry {index} is negative: {value}"),
        }
    );
    Ok(())
}

/// Cost of extending each candidate entry to also cover a target box,
/// measured as growth in area. Ties go to the entry with the smaller area.
#[derive(Debug)]
pub struct AreaEnlargement {
    scores: Vec<(f64, f64)>,
}

impl AreaEnlargement {
    pub fn new(candidates: &[Entry], target: &BoundingBox) -> Result<Self> {
        let mut scores = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let bounding_box = candidate.bounding_box();
            let enlargement = bounding_box.area_enlargement(target);
            check_non_negative("Area", index, enlargement)?;
            scores.push((enlargement, bounding_box.area()));
        }
        Ok(AreaEnlargement { scores })
    }

    pub fn enlargement(&self, index: usize) -> f64 {
        self.scores[index].0
    }

    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        let (a_enlargement, a_area) = self.scores[a];
        let (b_enlargement, b_area) = self.scores[b];
        a_enlargement
            .total_cmp(&b_enlargement)
            .then_with(|| a_area.total_cmp(&b_area))
    }

    /// Index of the cheapest candidate, the first one on full ties
    pub fn best(&self) -> Option<usize> {
        (0..self.scores.len()).min_by(|a, b| self.compare(*a, *b))
    }
}

/// Cost of extending each candidate entry to also cover a target box,
/// measured as growth of its overlap with all sibling entries.
///
/// Ties are resolved by area enlargement, then by area.
#[derive(Debug)]
pub struct OverlapEnlargement {
    scores: Vec<(f64, f64, f64)>,
}

impl OverlapEnlargement {
    pub fn new(candidates: &[Entry], target: &BoundingBox) -> Result<Self> {
        let mut scores = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            let bounding_box = candidate.bounding_box();
            let enlarged = bounding_box.extend(target);
            let mut overlap_before = 0.0;
            let mut overlap_after = 0.0;
            for (other_index, other) in candidates.iter().enumerate() {
                if other_index == index {
                    continue;
                }
                overlap_before += bounding_box.overlap(other.bounding_box());
                overlap_after += enlarged.overlap(other.bounding_box());
            }
            let overlap_enlargement = overlap_after - overlap_before;
            check_non_negative("Overlap", index, overlap_enlargement)?;
            let area = bounding_box.area();
            let area_enlargement = enlarged.area() - area;
            check_non_negative("Area", index, area_enlargement)?;
            scores.push((overlap_enlargement, area_enlargement, area));
        }
        Ok(OverlapEnlargement { scores })
    }

    pub fn enlargement(&self, index: usize) -> f64 {
        self.scores[index].0
    }

    pub fn compare(&self, a: usize, b: usize) -> Ordering {
        let (a_overlap, a_enlargement, a_area) = self.scores[a];
        let (b_overlap, b_enlargement, b_area) = self.scores[b];
        a_overlap
            .total_cmp(&b_overlap)
            .then_with(|| a_enlargement.total_cmp(&b_enlargement))
            .then_with(|| a_area.total_cmp(&b_area))
    }

    /// Index of the cheapest candidate, the first one on full ties
    pub fn best(&self) -> Option<usize> {
        (0..self.scores.len()).min_by(|a, b| self.compare(*a, *b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn internal(lower: &[f64], upper: &[f64], child_id: u64) -> Entry {
        Entry::internal(
            BoundingBox::new(lower.to_vec(), upper.to_vec()).expect("valid box"),
            child_id,
        )
    }

    #[test]
    fn test_value_orderings() {
        let a = internal(&[0.0, 5.0], &[4.0, 6.0], 1);
        let b = internal(&[1.0, 0.0], &[2.0, 9.0], 2);
        let c = internal(&[0.0, 1.0], &[3.0, 2.0], 3);
        let mut entries = vec![a, b, c];

        entries.sort_by(lower_value(0));
        let ids: Vec<u64> = entries.iter().filter_map(Entry::child_id).collect();
        assert_eq!(vec![3, 1, 2], ids);

        entries.sort_by(upper_value(0));
        let ids: Vec<u64> = entries.iter().filter_map(Entry::child_id).collect();
        assert_eq!(vec![2, 3, 1], ids);

        entries.sort_by(lower_value(1));
        let ids: Vec<u64> = entries.iter().filter_map(Entry::child_id).collect();
        assert_eq!(vec![2, 3, 1], ids);
    }

    #[test]
    fn test_distance_orderings() {
        let near = internal(&[0.0, 0.0], &[1.0, 1.0], 1);
        let far = internal(&[8.0, 8.0], &[10.0, 10.0], 2);
        let wide = internal(&[-20.0, -20.0], &[20.0, 0.5], 3);
        let reference = BoundingBox::new(vec![0.0, 0.0], vec![2.0, 2.0]).expect("valid");

        let mut entries = vec![far.clone(), near.clone(), wide.clone()];
        entries.sort_by(|a, b| center_distance(&reference)(b, a));
        let ids: Vec<u64> = entries.iter().filter_map(Entry::child_id).collect();
        // descending center distance: far, wide, near
        assert_eq!(vec![2, 3, 1], ids);

        let point = [0.5, 0.5];
        entries.sort_by(min_distance_to_point(&point));
        let ids: Vec<u64> = entries.iter().filter_map(Entry::child_id).collect();
        // wide and near both contain the point, the sort is stable
        assert_eq!(vec![3, 1, 2], ids);
    }

    #[test]
    fn test_area_enlargement() {
        let candidates = vec![
            internal(&[0.0, 0.0], &[2.0, 2.0], 1),
            internal(&[5.0, 5.0], &[6.0, 6.0], 2),
            internal(&[0.0, 0.0], &[10.0, 10.0], 3),
        ];
        let target = BoundingBox::from_point(&[1.0, 1.0]);
        let scores = AreaEnlargement::new(&candidates, &target).expect("scores");
        for i in 0..candidates.len() {
            assert!(scores.enlargement(i) >= 0.0);
        }
        // both 1 and 3 contain the point, the smaller one wins
        assert_eq!(Some(0), scores.best());

        let target = BoundingBox::from_point(&[6.0, 7.0]);
        let scores = AreaEnlargement::new(&candidates, &target).expect("scores");
        assert_abs_diff_eq!(1.0, scores.enlargement(1));
        assert_eq!(Some(2), scores.best());
    }

    #[test]
    fn test_overlap_enlargement() {
        let candidates = vec![
            internal(&[0.0, 0.0], &[4.0, 4.0], 1),
            internal(&[5.0, 0.0], &[9.0, 4.0], 2),
        ];
        // the gap between the boxes, neither grows into the other
        let target = BoundingBox::from_point(&[4.5, 2.0]);
        let scores = OverlapEnlargement::new(&candidates, &target).expect("scores");
        assert_abs_diff_eq!(0.0, scores.enlargement(0));
        assert_abs_diff_eq!(0.0, scores.enlargement(1));
        // equal overlap growth, equal area growth (2 each) and equal area: first wins
        assert_eq!(Some(0), scores.best());

        let target = BoundingBox::from_point(&[6.0, 2.0]);
        let scores = OverlapEnlargement::new(&candidates, &target).expect("scores");
        assert_abs_diff_eq!(4.0, scores.enlargement(0));
        assert_abs_diff_eq!(0.0, scores.enlargement(1));
        assert_eq!(Some(1), scores.best());

        let empty = OverlapEnlargement::new(&[], &target).expect("scores");
        assert_eq!(None, empty.best());
    }
}
