use super::{comparators, entries::Entry, NodeId};
use crate::{
    config::TreeParameters,
    geometry::{Bounded, BoundingBox},
    InternalConsistencySnafu, Result,
};
use get_size::GetSize;
use snafu::prelude::*;
use std::cmp::Ordering;

/// Level of leaf nodes, internal nodes count up from here
pub const LEAF_LEVEL: u32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    level: u32,
    entries: Vec<Entry>,
}

impl Node {
    pub fn new(id: NodeId, level: u32) -> Self {
        Node {
            id,
            level,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(id: NodeId, level: u32, entries: Vec<Entry>) -> Self {
        Node { id, level, entries }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEAF_LEVEL
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_overflowed(&self, params: &TreeParameters) -> bool {
        self.entries.len() > params.max_entries
    }

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn replace_entry(&mut self, index: usize, entry: Entry) {
        self.entries[index] = entry;
    }

    pub fn sort_entries_by<F>(&mut self, compare: F)
    where
        F: FnMut(&Entry, &Entry) -> Ordering,
    {
        self.entries.sort_by(compare);
    }

    /// Removes and returns the first `count` entries in their current order
    pub fn take_first(&mut self, count: usize) -> Vec<Entry> {
        self.entries.drain(..count).collect()
    }

    /// The minimum bounding box over all entries of this node
    pub fn bounding_box(&self) -> Result<BoundingBox> {
        BoundingBox::calculate_mbr(&self.entries)
    }

    /// Heap memory held by this node
    pub fn heap_size(&self) -> usize {
        self.entries.get_heap_size()
    }

    /// Splits this overflowed node into two.
    ///
    /// `self` keeps the first group of the chosen distribution, the second group
    /// is returned as a new node at the same level with id `sibling_id`.
    pub fn split(&mut self, params: &TreeParameters, sibling_id: NodeId) -> Result<Node> {
        // From R*-tree paper
        //
        // Algorithm Split
        // S1 Invoke ChooseSplitAxis to determine the axis,
        //  perpendicular to which the split is performed
        // S2 Invoke ChooseSplitIndex to determine the best
        //  distribution into two groups along that axis
        // S3 Distribute the entries into two groups
        let min_entries = params.min_entries();
        ensure!(
            self.entries.len() >= 2 * min_entries,
            InternalConsistencySnafu {
                description: format!(
                    "Node {} with {} entries is too small to split into groups of at least {}",
                    self.id,
                    self.entries.len(),
                    min_entries
                ),
            }
        );
        let (sortings, distributions) = self.choose_split_axis(params.dimensions, min_entries)?;
        let (sorting, split_index) =
            choose_split_index(&distributions).context(InternalConsistencySnafu {
                description: format!("Node {} produced no split distributions", self.id),
            })?;
        let (left, right) = split_at_index(
            std::mem::take(&mut self.entries),
            &sortings[sorting],
            split_index,
        );
        self.entries = left;
        log::debug!(
            "Split node {} at level {} into {} + {} entries (sibling {})",
            self.id,
            self.level,
            self.entries.len(),
            right.len(),
            sibling_id
        );
        Ok(Node::with_entries(sibling_id, self.level, right))
    }

    fn sorted_indices<F>(&self, compare: F) -> Vec<usize>
    where
        F: Fn(&Entry, &Entry) -> Ordering,
    {
        let mut indices: Vec<usize> = (0..self.entries.len()).collect();
        indices.sort_by(|a, b| compare(&self.entries[*a], &self.entries[*b]));
        indices
    }

    /// All legal two-group distributions of the entries in `sorted` order
    fn bounding_distributions(
        &self,
        sorted: &[usize],
        min_entries: usize,
    ) -> Result<Vec<Distribution>> {
        let num_distributions = sorted.len() - 2 * min_entries + 1;
        let mut result = Vec::with_capacity(num_distributions);
        for k in 1..=num_distributions {
            let split_index = min_entries - 1 + k;
            let left = BoundingBox::calculate_mbr(
                sorted[..split_index].iter().map(|i| &self.entries[*i]),
            )?;
            let right = BoundingBox::calculate_mbr(
                sorted[split_index..].iter().map(|i| &self.entries[*i]),
            )?;
            result.push(Distribution {
                split_index,
                left,
                right,
            });
        }
        Ok(result)
    }

    fn choose_split_axis(
        &self,
        dimensions: usize,
        min_entries: usize,
    ) -> Result<([Vec<usize>; 2], [Vec<Distribution>; 2])> {
        // Algorithm ChooseSplitAxis
        // CSA1 For each axis
        //          Sort the entries by the lower then by the upper
        //          value of their rectangles and determine all
        //          distributions as described above. Compute S, the
        //          sum of all margin-values of the different
        //          distributions
        //      end
        // CSA2 Choose the axis with the minimum S as split axis
        let mut best: Option<(f64, [Vec<usize>; 2], [Vec<Distribution>; 2])> = None;
        for axis in 0..dimensions {
            let by_lower = self.sorted_indices(comparators::lower_value(axis));
            let by_upper = self.sorted_indices(comparators::upper_value(axis));
            let lower_distributions = self.bounding_distributions(&by_lower, min_entries)?;
            let upper_distributions = self.bounding_distributions(&by_upper, min_entries)?;
            let margin_sum: f64 = lower_distributions
                .iter()
                .chain(upper_distributions.iter())
                .map(Distribution::margin)
                .sum();
            let is_better = best
                .as_ref()
                .map_or(true, |(best_sum, _, _)| margin_sum < *best_sum);
            if is_better {
                best = Some((
                    margin_sum,
                    [by_lower, by_upper],
                    [lower_distributions, upper_distributions],
                ));
            }
        }
        let (_, sortings, distributions) = best.context(InternalConsistencySnafu {
            description: format!("Node {} has no dimensions to split along", self.id),
        })?;
        Ok((sortings, distributions))
    }

    /// Checks the local invariants of this node
    pub fn assert_invariants(&self, is_root: bool, params: &TreeParameters) {
        assert!(
            self.entries.len() <= params.max_entries,
            "Node {} holds {} entries, more than {}",
            self.id,
            self.entries.len(),
            params.max_entries
        );
        if !is_root {
            assert!(
                self.entries.len() >= params.min_entries(),
                "Node {} holds {} entries, fewer than {}",
                self.id,
                self.entries.len(),
                params.min_entries()
            );
        } else if !self.is_leaf() {
            assert!(self.entries.len() >= 2, "Internal root {} has < 2 entries", self.id);
        }
        for entry in self.entries.iter() {
            assert_eq!(
                self.is_leaf(),
                entry.is_leaf(),
                "Node {} at level {} holds mismatched entry {}",
                self.id,
                self.level,
                entry
            );
            assert_eq!(params.dimensions, entry.bounding_box().dimensions());
        }
    }
}

#[derive(Debug)]
struct Distribution {
    split_index: usize,
    left: BoundingBox,
    right: BoundingBox,
}

impl Distribution {
    fn margin(&self) -> f64 {
        self.left.margin() + self.right.margin()
    }

    fn overlap(&self) -> f64 {
        self.left.overlap(&self.right)
    }

    fn area(&self) -> f64 {
        self.left.area() + self.right.area()
    }
}

/// Returns the sorting and the split index of the best distribution
fn choose_split_index(distributions: &[Vec<Distribution>; 2]) -> Option<(usize, usize)> {
    // Algorithm ChooseSplitIndex
    // CSI1 Along the chosen split axis, choose the
    //  distribution with the minimum overlap-value
    //  Resolve ties by choosing the distribution with
    //  minimum area-value
    let mut best: Option<(usize, &Distribution)> = None;
    for (sorting, candidates) in distributions.iter().enumerate() {
        for candidate in candidates.iter() {
            let Some((_, current)) = best else {
                best = Some((sorting, candidate));
                continue;
            };
            let overlap = candidate.overlap();
            let min_overlap = current.overlap();
            if overlap < min_overlap - f64::EPSILON {
                best = Some((sorting, candidate));
            } else if (overlap - min_overlap).abs() <= f64::EPSILON
                && candidate.area() < current.area()
            {
                best = Some((sorting, candidate));
            }
        }
    }
    best.map(|(sorting, d)| (sorting, d.split_index))
}

fn split_at_index(
    entries: Vec<Entry>,
    sorted_indices: &[usize],
    split_index: usize,
) -> (Vec<Entry>, Vec<Entry>) {
    let mut pickable_entries: Vec<Option<Entry>> = entries.into_iter().map(Some).collect();
    let mut pick = |indices: &[usize]| -> Vec<Entry> {
        indices
            .iter()
            .filter_map(|index| pickable_entries[*index].take())
            .collect()
    };
    let left = pick(&sorted_indices[..split_index]);
    let right = pick(&sorted_indices[split_index..]);
    (left, right)
}
