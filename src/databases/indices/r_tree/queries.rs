use super::{comparators, entries::Entry, nodes::Node, NodeStore};
use crate::{
    databases::RecordStore,
    geometry::Bounded,
    osm_data::{BlockId, LocationQueryResult, RecordId},
    InternalConsistencySnafu, PreconditionViolationSnafu, Result,
};
use snafu::prelude::*;
use std::{cmp::Ordering, collections::BinaryHeap};

/// A candidate result, ordered by distance so a [`BinaryHeap`] keeps the farthest on top
#[derive(Debug, Clone, Copy)]
pub(crate) struct Neighbor {
    pub(crate) block_id: BlockId,
    pub(crate) record_id: RecordId,
    pub(crate) distance: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.record_id.cmp(&other.record_id))
            .then_with(|| self.block_id.cmp(&other.block_id))
    }
}

/// Keeps the `k` closest neighbours seen so far
#[derive(Debug)]
pub(crate) struct NeighborQueue {
    k: usize,
    queue: BinaryHeap<Neighbor>,
}

impl NeighborQueue {
    pub(crate) fn new(k: usize) -> Self {
        NeighborQueue {
            k,
            queue: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.queue.len() >= self.k
    }

    /// Distance of the current k-th best candidate, once there are `k` of them
    pub(crate) fn kth_distance(&self) -> Option<f64> {
        if self.is_full() {
            self.queue.peek().map(|n| n.distance)
        } else {
            None
        }
    }

    pub(crate) fn offer(&mut self, candidate: Neighbor) {
        if !self.is_full() {
            self.queue.push(candidate);
        } else if let Some(mut farthest) = self.queue.peek_mut() {
            if candidate < *farthest {
                *farthest = candidate;
            }
        }
    }

    pub(crate) fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.queue.into_sorted_vec()
    }
}

pub(crate) fn check_radius(radius: f64) -> Result<()> {
    ensure!(
        radius > 0.0 && radius.is_finite(),
        PreconditionViolationSnafu {
            description: format!("Search radius must be positive and finite, but was {radius}"),
        }
    );
    Ok(())
}

pub(crate) fn check_k(k: usize) -> Result<()> {
    ensure!(
        k > 0,
        PreconditionViolationSnafu {
            description: "At least one neighbour must be requested".to_string(),
        }
    );
    Ok(())
}

/// Loads the records behind `neighbors` and returns them in result order
pub(crate) fn resolve<R>(
    neighbors: impl IntoIterator<Item = Neighbor>,
    records: &R,
) -> Result<Vec<LocationQueryResult>>
where
    R: RecordStore,
{
    let mut results = neighbors
        .into_iter()
        .map(|n| {
            let record = records.get_record(n.block_id, n.record_id)?;
            Ok(LocationQueryResult::new(record, n.distance))
        })
        .collect::<Result<Vec<_>>>()?;
    LocationQueryResult::sort(&mut results);
    Ok(results)
}

fn leaf_parts(node: &Node, entry: &Entry) -> Result<(RecordId, BlockId)> {
    match entry {
        Entry::Leaf {
            record_id,
            block_id,
            ..
        } => Ok((*record_id, *block_id)),
        Entry::Internal { .. } => InternalConsistencySnafu {
            description: format!("Leaf node {} holds an internal entry", node.id()),
        }
        .fail(),
    }
}

fn child_of(node: &Node, entry: &Entry) -> Result<u64> {
    entry.child_id().context(InternalConsistencySnafu {
        description: format!("Internal node {} holds a leaf entry", node.id()),
    })
}

/// Finds every record within a radius of a point
#[derive(Debug)]
pub struct RangeQuery<'a> {
    target: &'a [f64],
    radius: f64,
}

impl<'a> RangeQuery<'a> {
    pub fn new(target: &'a [f64], radius: f64) -> Result<Self> {
        check_radius(radius)?;
        Ok(RangeQuery { target, radius })
    }

    pub fn execute<N, R>(&self, nodes: &N, records: &R) -> Result<Vec<LocationQueryResult>>
    where
        N: NodeStore,
        R: RecordStore,
    {
        let mut hits = Vec::new();
        let root = nodes.get_root_node()?;
        self.search(&root, nodes, &mut hits)?;
        resolve(hits, records)
    }

    fn search<N>(&self, node: &Node, nodes: &N, hits: &mut Vec<Neighbor>) -> Result<()>
    where
        N: NodeStore,
    {
        for entry in node.entries() {
            let distance = entry.bounding_box().min_distance(self.target);
            if distance > self.radius {
                continue;
            }
            if node.is_leaf() {
                let (record_id, block_id) = leaf_parts(node, entry)?;
                hits.push(Neighbor {
                    block_id,
                    record_id,
                    distance,
                });
            } else {
                let child = nodes.get_node(child_of(node, entry)?)?;
                self.search(&child, nodes, hits)?;
            }
        }
        Ok(())
    }
}

/// Branch-and-bound search for the `k` records closest to a point
#[derive(Debug)]
pub struct NearestNeighborQuery<'a> {
    target: &'a [f64],
    k: usize,
    search_radius: f64,
    neighbors: NeighborQueue,
}

struct Branch {
    child_id: u64,
    min_distance: f64,
}

impl<'a> NearestNeighborQuery<'a> {
    pub fn new(target: &'a [f64], k: usize) -> Result<Self> {
        check_k(k)?;
        Ok(NearestNeighborQuery {
            target,
            k,
            search_radius: f64::INFINITY,
            neighbors: NeighborQueue::new(k),
        })
    }

    pub fn execute<N, R>(mut self, nodes: &N, records: &R) -> Result<Vec<LocationQueryResult>>
    where
        N: NodeStore,
        R: RecordStore,
    {
        let root = nodes.get_root_node()?;
        self.search(&root, nodes)?;
        resolve(self.neighbors.into_sorted_vec(), records)
    }

    fn search<N>(&mut self, node: &Node, nodes: &N) -> Result<()>
    where
        N: NodeStore,
    {
        if node.is_leaf() {
            for entry in node.entries() {
                let (record_id, block_id) = leaf_parts(node, entry)?;
                let distance = entry.bounding_box().min_distance(self.target);
                self.neighbors.offer(Neighbor {
                    block_id,
                    record_id,
                    distance,
                });
                self.tighten_radius();
            }
            return Ok(());
        }

        let mut entries: Vec<&Entry> = node.entries().iter().collect();
        let by_distance = comparators::min_distance_to_point(self.target);
        entries.sort_by(|a, b| by_distance(*a, *b));

        if self.k == 1 {
            // Some object lies within MINMAXDIST of every entry, so no entry farther
            // than the smallest MINMAXDIST can hold the single nearest neighbour.
            let bound = entries
                .iter()
                .map(|e| e.bounding_box().min_max_distance(self.target))
                .fold(f64::INFINITY, f64::min);
            self.search_radius = self.search_radius.min(bound);
        }

        let branches = entries
            .into_iter()
            .map(|entry| {
                Ok(Branch {
                    child_id: child_of(node, entry)?,
                    min_distance: entry.bounding_box().min_distance(self.target),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for branch in branches {
            // the radius may shrink while earlier branches are searched
            if branch.min_distance > self.search_radius {
                break;
            }
            let child = nodes.get_node(branch.child_id)?;
            self.search(&child, nodes)?;
        }
        Ok(())
    }

    fn tighten_radius(&mut self) {
        if let Some(kth) = self.neighbors.kth_distance() {
            self.search_radius = self.search_radius.min(kth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(record_id: RecordId, distance: f64) -> Neighbor {
        Neighbor {
            block_id: 1,
            record_id,
            distance,
        }
    }

    #[test]
    fn test_neighbor_queue_keeps_closest() {
        let mut queue = NeighborQueue::new(2);
        assert_eq!(None, queue.kth_distance());
        queue.offer(neighbor(1, 5.0));
        assert_eq!(None, queue.kth_distance());
        queue.offer(neighbor(2, 1.0));
        assert_eq!(Some(5.0), queue.kth_distance());
        queue.offer(neighbor(3, 3.0));
        assert_eq!(Some(3.0), queue.kth_distance());
        queue.offer(neighbor(4, 10.0));
        let ids: Vec<RecordId> = queue.into_sorted_vec().iter().map(|n| n.record_id).collect();
        assert_eq!(vec![2, 3], ids);
    }

    #[test]
    fn test_preconditions() {
        let point = [0.0, 0.0];
        assert!(RangeQuery::new(&point, 0.0)
            .expect_err("zero radius")
            .is_precondition_violation());
        assert!(RangeQuery::new(&point, -1.0).is_err());
        assert!(RangeQuery::new(&point, f64::NAN).is_err());
        assert!(NearestNeighborQuery::new(&point, 0)
            .expect_err("k = 0")
            .is_precondition_violation());
        assert!(NearestNeighborQuery::new(&point, 1).is_ok());
    }
}
