use super::{
    comparators::{self, AreaEnlargement, OverlapEnlargement},
    entries::Entry,
    nodes::{Node, LEAF_LEVEL},
    queries::{NearestNeighborQuery, RangeQuery},
    NodeStore,
};
use crate::{
    config::TreeParameters,
    databases::RecordStore,
    geometry::{Bounded, BoundingBox},
    osm_data::{BlockId, LocationQueryResult, Record},
    InternalConsistencySnafu, PreconditionViolationSnafu, Result,
};
use snafu::prelude::*;
use std::collections::VecDeque;

/// A disk-oriented R*-tree over point records
///
/// Nodes live in the node store `N`, records in the record store `R`.
/// The tree itself only remembers the level of the root.
pub struct RStarTree<N, R>
where
    N: NodeStore,
    R: RecordStore,
{
    nodes: N,
    records: R,
    params: TreeParameters,
    root_level: u32,
}

/// What an insertion below a node left for its ancestors to handle
enum InsertionOutcome {
    Complete,
    /// The node was split, the new sibling must be added to the parent
    Split(Node),
    /// Entries were removed from a node at `level` and must be inserted again
    Reinsert { entries: Vec<Entry>, level: u32 },
}

/// Tracks which levels already had an overflow during the insertion of one record
struct OverflowTracker {
    level_overflow_called: Vec<bool>,
}

impl OverflowTracker {
    fn new(height: usize) -> Self {
        OverflowTracker {
            level_overflow_called: vec![false; height],
        }
    }

    /// Marks `level` and returns `true` if this is the first overflow there
    fn first_overflow_at(&mut self, level: u32) -> bool {
        let level = level as usize;
        if self.level_overflow_called.len() <= level {
            self.level_overflow_called.resize(level + 1, false);
        }
        !std::mem::replace(&mut self.level_overflow_called[level], true)
    }
}

/// Pushes entries removed for reinsertion, which come farthest first,
/// so that the nearest one is popped first
fn schedule_reinsert(insertion_stack: &mut Vec<(Entry, u32)>, entries: Vec<Entry>, level: u32) {
    insertion_stack.extend(entries.into_iter().map(|e| (e, level)));
}

impl<N, R> RStarTree<N, R>
where
    N: NodeStore,
    R: RecordStore,
{
    /// Opens the tree stored in `nodes`, creating an empty root leaf if there is none.
    pub fn new(mut nodes: N, records: R, params: TreeParameters) -> Result<Self> {
        params.validate()?;
        ensure!(
            records.dimensions() == params.dimensions,
            PreconditionViolationSnafu {
                description: format!(
                    "Record store holds {}-dimensional records, but the tree indexes {} dimensions",
                    records.dimensions(),
                    params.dimensions
                ),
            }
        );
        let root_level = if nodes.root_node_id().is_some() {
            let root = nodes.get_root_node()?;
            log::info!(
                "Opened R*-tree with root {} at level {}",
                root.id(),
                root.level()
            );
            root.level()
        } else {
            let root = Node::new(nodes.next_available_node_id(), LEAF_LEVEL);
            nodes.set_root_node(&root)?;
            nodes.flush()?;
            log::info!("Created empty R*-tree with root {}", root.id());
            LEAF_LEVEL
        };
        Ok(RStarTree {
            nodes,
            records,
            params,
            root_level,
        })
    }

    pub fn params(&self) -> &TreeParameters {
        &self.params
    }

    pub fn root_level(&self) -> u32 {
        self.root_level
    }

    /// Number of levels in the tree, a lone root leaf has height 1
    pub fn height(&self) -> usize {
        self.root_level as usize + 1
    }

    pub fn is_empty(&self) -> Result<bool> {
        let root = self.nodes.get_root_node()?;
        Ok(root.is_empty())
    }

    /// Number of records in the record store
    pub fn len(&self) -> u64 {
        self.records.num_records()
    }

    pub fn node_store(&self) -> &N {
        &self.nodes
    }

    pub fn record_store(&self) -> &R {
        &self.records
    }

    /// Write all cached state back into the stores
    pub fn flush(&mut self) -> Result<()> {
        self.nodes.flush()
    }

    /// Flush and make sure everything is durably persisted
    pub fn sync(&mut self) -> Result<()> {
        self.nodes.flush()?;
        self.nodes.sync()?;
        self.records.sync()
    }

    fn check_point(&self, point: &[f64]) -> Result<()> {
        ensure!(
            point.len() == self.params.dimensions,
            PreconditionViolationSnafu {
                description: format!(
                    "Expected a {}-dimensional point, got {} coordinates",
                    self.params.dimensions,
                    point.len()
                ),
            }
        );
        ensure!(
            point.iter().all(|c| c.is_finite()),
            PreconditionViolationSnafu {
                description: format!("Point {point:?} has non-finite coordinates"),
            }
        );
        let limit = self.params.coordinate_limit();
        ensure!(
            point.iter().all(|c| c.abs() <= limit),
            PreconditionViolationSnafu {
                description: format!("Point {point:?} has coordinates beyond ±{limit:e}"),
            }
        );
        Ok(())
    }

    /// Stores `record` in the record store and indexes it
    ///
    /// The record is validated before anything is stored.
    pub fn add_record(&mut self, record: Record) -> Result<BlockId> {
        self.check_point(&record.coordinates)?;
        let block_id = self.records.append_record(&record)?;
        self.insert_record(&record, block_id)?;
        Ok(block_id)
    }

    /// Indexes `record`, which is stored in block `block_id` of the record store
    pub fn insert_record(&mut self, record: &Record, block_id: BlockId) -> Result<()> {
        self.check_point(&record.coordinates)?;
        let entry = Entry::leaf(
            BoundingBox::from_point(&record.coordinates),
            record.id,
            block_id,
        );
        log::trace!("Inserting record {} from block {}", record.id, block_id);
        let mut tracker = OverflowTracker::new(self.height());
        self.insert(entry, LEAF_LEVEL, &mut tracker)?;
        self.nodes.flush()
    }

    fn insert(&mut self, entry: Entry, level: u32, tracker: &mut OverflowTracker) -> Result<()> {
        let mut insertion_stack = vec![(entry, level)];
        while let Some((next, target_level)) = insertion_stack.pop() {
            let mut root = self.nodes.get_root_node()?;
            match self.insert_into(&mut root, next, target_level, tracker)? {
                InsertionOutcome::Complete => (),
                InsertionOutcome::Split(sibling) => self.grow_tree(&root, &sibling)?,
                InsertionOutcome::Reinsert { entries, level } => {
                    log::debug!(
                        "Reinserting {} entries at level {}",
                        entries.len(),
                        level
                    );
                    schedule_reinsert(&mut insertion_stack, entries, level);
                }
            }
        }
        Ok(())
    }

    fn insert_into(
        &mut self,
        node: &mut Node,
        entry: Entry,
        target_level: u32,
        tracker: &mut OverflowTracker,
    ) -> Result<InsertionOutcome> {
        if node.level() == target_level {
            ensure!(
                entry.is_leaf() == node.is_leaf(),
                InternalConsistencySnafu {
                    description: format!(
                        "Cannot place entry {} into node {} at level {}",
                        entry,
                        node.id(),
                        node.level()
                    ),
                }
            );
            node.add_entry(entry);
        } else {
            ensure!(
                node.level() > target_level,
                InternalConsistencySnafu {
                    description: format!(
                        "Descended to node {} at level {}, below target level {}",
                        node.id(),
                        node.level(),
                        target_level
                    ),
                }
            );
            let index = self.choose_subtree(node, entry.bounding_box(), target_level)?;
            let child_id = node.entries()[index]
                .child_id()
                .context(InternalConsistencySnafu {
                    description: format!("Internal node {} holds a leaf entry", node.id()),
                })?;
            log::trace!(
                "Descending from node {} into child {}",
                node.id(),
                child_id
            );
            let mut child = self.nodes.get_node(child_id)?;
            let outcome = self.insert_into(&mut child, entry, target_level, tracker)?;
            node.replace_entry(index, Entry::internal(child.bounding_box()?, child.id()));
            match outcome {
                InsertionOutcome::Complete => (),
                InsertionOutcome::Split(sibling) => {
                    node.add_entry(Entry::internal(sibling.bounding_box()?, sibling.id()));
                }
                reinsert @ InsertionOutcome::Reinsert { .. } => {
                    self.nodes.update_node(node)?;
                    return Ok(reinsert);
                }
            }
        }
        let outcome = if node.is_overflowed(&self.params) {
            self.overflow_treatment(node, tracker)?
        } else {
            InsertionOutcome::Complete
        };
        self.nodes.update_node(node)?;
        Ok(outcome)
    }

    /// Index of the entry in `node` whose subtree should receive `target`
    fn choose_subtree(
        &self,
        node: &Node,
        target: &BoundingBox,
        target_level: u32,
    ) -> Result<usize> {
        // From R*-tree paper
        //
        // CS2 If the child pointers in N point to leaves
        //  determine the minimum overlap cost,
        //  otherwise determine the minimum area cost
        let best = if node.level() == target_level + 1 {
            OverlapEnlargement::new(node.entries(), target)?.best()
        } else {
            AreaEnlargement::new(node.entries(), target)?.best()
        };
        best.context(InternalConsistencySnafu {
            description: format!("Node {} has no entries to descend into", node.id()),
        })
    }

    fn overflow_treatment(
        &mut self,
        node: &mut Node,
        tracker: &mut OverflowTracker,
    ) -> Result<InsertionOutcome> {
        if node.level() != self.root_level && tracker.first_overflow_at(node.level()) {
            let entries = self.remove_for_reinsert(node)?;
            Ok(InsertionOutcome::Reinsert {
                entries,
                level: node.level(),
            })
        } else {
            let sibling_id = self.nodes.next_available_node_id();
            let sibling = node.split(&self.params, sibling_id)?;
            self.nodes.insert_node(&sibling)?;
            Ok(InsertionOutcome::Split(sibling))
        }
    }

    /// Removes the entries whose centers are farthest from the center of `node`,
    /// farthest first
    fn remove_for_reinsert(&self, node: &mut Node) -> Result<Vec<Entry>> {
        // From R*-tree paper
        //
        // RI1 For all M+1 entries of a node N, compute the distance
        //  between the centers of their rectangles and the center
        //  of the bounding rectangle of N
        // RI2 Sort the entries in decreasing order of their distances
        // RI3 Remove the first p entries from N and adjust the
        //  bounding rectangle of N
        let bounding_box = node.bounding_box()?;
        let by_center_distance = comparators::center_distance(&bounding_box);
        node.sort_entries_by(|a, b| by_center_distance(b, a));
        Ok(node.take_first(self.params.reinsert_count()))
    }

    fn grow_tree(&mut self, old_root: &Node, sibling: &Node) -> Result<()> {
        let new_root = Node::with_entries(
            self.nodes.next_available_node_id(),
            old_root.level() + 1,
            vec![
                Entry::internal(old_root.bounding_box()?, old_root.id()),
                Entry::internal(sibling.bounding_box()?, sibling.id()),
            ],
        );
        self.nodes.set_root_node(&new_root)?;
        self.root_level = new_root.level();
        log::debug!(
            "Root split, new root {} at level {}",
            new_root.id(),
            new_root.level()
        );
        Ok(())
    }

    /// All records within `radius` of `point`, nearest first
    pub fn execute_range_query(
        &self,
        point: &[f64],
        radius: f64,
    ) -> Result<Vec<LocationQueryResult>> {
        self.check_point(point)?;
        RangeQuery::new(point, radius)?.execute(&self.nodes, &self.records)
    }

    /// The `k` records nearest to `point`, nearest first
    pub fn execute_nn_query(&self, point: &[f64], k: usize) -> Result<Vec<LocationQueryResult>> {
        self.check_point(point)?;
        NearestNeighborQuery::new(point, k)?.execute(&self.nodes, &self.records)
    }

    /// Checks the whole tree to determine it is sound
    pub fn assert_invariants(&self) -> Result<()> {
        let root = self.nodes.get_root_node()?;
        assert_eq!(self.root_level, root.level(), "Stale root level");
        let mut to_search: VecDeque<(Node, bool)> = VecDeque::with_capacity(1);
        to_search.push_back((root, true));
        while let Some((current, is_root)) = to_search.pop_front() {
            current.assert_invariants(is_root, &self.params);
            if current.is_leaf() {
                continue;
            }
            for entry in current.entries() {
                let child_id = entry.child_id().context(InternalConsistencySnafu {
                    description: format!("Internal node {} holds a leaf entry", current.id()),
                })?;
                let child = self.nodes.get_node(child_id)?;
                assert_eq!(current.level() - 1, child.level());
                let child_bbox = child.bounding_box()?;
                assert!(
                    entry.bounding_box().contains(&child_bbox),
                    "Entry {} in node {} does not cover child bounds {}",
                    entry,
                    current.id(),
                    child_bbox
                );
                to_search.push_back((child, false));
            }
        }
        Ok(())
    }

    /// Logs statistics about the tree
    pub fn print_stats(&self) {
        log::info!(
            "R*-tree: height {}, {} records, parameters {:?}",
            self.height(),
            self.len(),
            self.params
        );
        self.nodes.print_stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::databases::{
        indices::r_tree::{
            in_memory::{self, InMemoryRStarTree},
            NodeId,
        },
        sequential_scan,
    };

    /// M = 4, m = 2, p = 2
    fn params() -> TreeParameters {
        let params = TreeParameters {
            dimensions: 2,
            max_entries: 4,
            min_fill_factor: 0.5,
            reinsert_fraction: 0.5,
        };
        params.validate().expect("valid");
        params
    }

    fn leaf(x: f64, y: f64, record_id: i64) -> Entry {
        Entry::leaf(BoundingBox::from_point(&[x, y]), record_id, 1)
    }

    fn record_ids(entries: &[Entry]) -> Vec<i64> {
        entries
            .iter()
            .map(|e| match e {
                Entry::Leaf { record_id, .. } => *record_id,
                Entry::Internal { .. } => panic!("unexpected internal entry"),
            })
            .collect()
    }

    fn sorted_ids(node: &Node) -> Vec<i64> {
        let mut ids = record_ids(node.entries());
        ids.sort();
        ids
    }

    /// A root at level 1 over a full leaf near the origin, which also holds an
    /// outlier at (40, 1), and a half full leaf near (100, 0).
    fn two_leaf_tree() -> (InMemoryRStarTree, NodeId, NodeId) {
        let mut tree = in_memory::new(params()).expect("tree");
        let near = Node::with_entries(
            tree.nodes.next_available_node_id(),
            LEAF_LEVEL,
            vec![
                leaf(0.0, 0.0, 1),
                leaf(1.0, 0.0, 2),
                leaf(2.0, 2.0, 3),
                leaf(40.0, 1.0, 4),
            ],
        );
        let far = Node::with_entries(
            tree.nodes.next_available_node_id(),
            LEAF_LEVEL,
            vec![leaf(100.0, 0.0, 5), leaf(101.0, 1.0, 6)],
        );
        tree.nodes.insert_node(&near).expect("insert");
        tree.nodes.insert_node(&far).expect("insert");
        let root = Node::with_entries(
            tree.nodes.next_available_node_id(),
            1,
            vec![
                Entry::internal(near.bounding_box().expect("mbr"), near.id()),
                Entry::internal(far.bounding_box().expect("mbr"), far.id()),
            ],
        );
        tree.nodes.set_root_node(&root).expect("root");
        tree.root_level = 1;
        tree.assert_invariants().expect("invariants");
        (tree, near.id(), far.id())
    }

    #[test]
    fn test_overflow_tracker() {
        let mut tracker = OverflowTracker::new(1);
        assert!(tracker.first_overflow_at(0));
        assert!(!tracker.first_overflow_at(0));
        // grows when the tree grows during an insertion
        assert!(tracker.first_overflow_at(3));
        assert!(!tracker.first_overflow_at(3));
        assert!(tracker.first_overflow_at(1));
        assert_eq!(4, tracker.level_overflow_called.len());
    }

    #[test]
    fn test_first_overflow_reinserts_instead_of_splitting() {
        let (mut tree, near_id, far_id) = two_leaf_tree();
        let num_nodes = tree.nodes.num_nodes();
        tree.insert_record(&Record::new(7, "g", vec![0.5, 0.5]), 1)
            .expect("insert");
        tree.assert_invariants().expect("invariants");
        assert_eq!(num_nodes, tree.nodes.num_nodes());
        assert_eq!(2, tree.height());
        // the outlier moved over to the far leaf, the origin went back home
        let near = tree.nodes.get_node(near_id).expect("near");
        let far = tree.nodes.get_node(far_id).expect("far");
        assert_eq!(vec![1, 2, 3, 7], sorted_ids(&near));
        assert_eq!(vec![4, 5, 6], sorted_ids(&far));
    }

    #[test]
    fn test_second_overflow_at_a_level_splits() {
        let (mut tree, near_id, _) = two_leaf_tree();
        let num_nodes = tree.nodes.num_nodes();
        let mut tracker = OverflowTracker::new(tree.height());
        let mut near = tree.nodes.get_node(near_id).expect("near");
        near.add_entry(leaf(0.5, 0.5, 7));

        let removed = match tree.overflow_treatment(&mut near, &mut tracker) {
            Ok(InsertionOutcome::Reinsert { entries, level }) => {
                assert_eq!(LEAF_LEVEL, level);
                entries
            }
            _ => panic!("first overflow should reinsert"),
        };
        assert_eq!(params().reinsert_count(), removed.len());
        assert_eq!(3, near.len());
        assert_eq!(num_nodes, tree.nodes.num_nodes());

        for entry in removed {
            near.add_entry(entry);
        }
        assert!(near.is_overflowed(&params()));
        let sibling = match tree.overflow_treatment(&mut near, &mut tracker) {
            Ok(InsertionOutcome::Split(sibling)) => sibling,
            _ => panic!("second overflow should split"),
        };
        assert_eq!(num_nodes + 1, tree.nodes.num_nodes());
        assert_eq!(5, near.len() + sibling.len());
        assert!(near.len() >= 2 && sibling.len() >= 2);
        assert_eq!(near.level(), sibling.level());
    }

    #[test]
    fn test_root_always_splits() {
        let mut tree = in_memory::new(params()).expect("tree");
        let mut tracker = OverflowTracker::new(tree.height());
        let mut root = tree.nodes.get_root_node().expect("root");
        for i in 0..5 {
            root.add_entry(leaf(i as f64, 0.0, i));
        }
        match tree.overflow_treatment(&mut root, &mut tracker) {
            Ok(InsertionOutcome::Split(sibling)) => {
                assert_eq!(5, root.len() + sibling.len())
            }
            _ => panic!("root overflow should split"),
        }
        // the root level was never marked as overflowed
        assert!(tracker.first_overflow_at(LEAF_LEVEL));

        let mut tree = in_memory::new(params()).expect("tree");
        for i in 0..4 {
            tree.add_record(Record::new(i, format!("p{i}"), vec![i as f64, 1.0]))
                .expect("insert");
        }
        assert_eq!((1, 1), (tree.height(), tree.nodes.num_nodes()));
        tree.add_record(Record::new(4, "p4", vec![4.0, 1.0]))
            .expect("insert");
        assert_eq!((2, 3), (tree.height(), tree.nodes.num_nodes()));
        tree.assert_invariants().expect("invariants");
    }

    #[test]
    fn test_remove_for_reinsert_takes_farthest_from_center() {
        let tree = in_memory::new(params()).expect("tree");
        // bounding box [0, 10] x [0, 10] with its center at (5, 5)
        let mut node = Node::with_entries(
            99,
            LEAF_LEVEL,
            vec![
                leaf(7.0, 5.0, 1),
                leaf(0.0, 0.0, 2),
                leaf(5.0, 6.0, 3),
                leaf(10.0, 4.0, 4),
                leaf(1.0, 10.0, 5),
            ],
        );
        let removed = tree.remove_for_reinsert(&mut node).expect("remove");
        assert_eq!(vec![2, 5], record_ids(&removed));
        assert_eq!(vec![4, 1, 3], record_ids(node.entries()));
    }

    #[test]
    fn test_reinsertion_pops_nearest_first() {
        let mut insertion_stack = vec![(leaf(50.0, 50.0, 0), LEAF_LEVEL)];
        let farthest_first = vec![leaf(9.0, 0.0, 1), leaf(5.0, 0.0, 2), leaf(1.0, 0.0, 3)];
        schedule_reinsert(&mut insertion_stack, farthest_first, LEAF_LEVEL);
        let popped: Vec<i64> = std::iter::from_fn(|| insertion_stack.pop())
            .map(|(entry, level)| {
                assert_eq!(LEAF_LEVEL, level);
                record_ids(std::slice::from_ref(&entry))[0]
            })
            .collect();
        assert_eq!(vec![3, 2, 1, 0], popped);
    }

    #[test]
    fn test_huge_coordinates() {
        let mut tree = in_memory::new(params()).expect("tree");
        let err = tree
            .add_record(Record::new(1, "far out", vec![-1e200, -1e200]))
            .expect_err("beyond the coordinate limit");
        assert!(err.is_precondition_violation());
        // rejected before it was stored
        assert_eq!(0, tree.len());

        let limit = params().coordinate_limit();
        let mut points = vec![
            [-limit, -limit],
            [limit, limit],
            [0.0, 0.0],
            [limit / 2.0, -limit / 2.0],
            [1.0, 2.0],
            [-0.3 * limit, 0.7 * limit],
            [2.0, 2.0],
        ];
        for i in 0..25 {
            let step = limit / 13.0;
            points.push([(i % 5) as f64 * step - limit / 3.0, (i / 5) as f64 * -step]);
        }
        for (id, point) in points.iter().enumerate() {
            tree.add_record(Record::new(id as i64, format!("p{id}"), point.to_vec()))
                .expect("insert near the limit");
        }
        tree.assert_invariants().expect("invariants");
        assert_eq!(points.len() as u64, tree.len());
        for k in [1, 3, 10] {
            let expected =
                sequential_scan::sequential_nn_query(tree.record_store(), &[0.0, 0.0], k)
                    .expect("scan");
            assert_eq!(expected, tree.execute_nn_query(&[0.0, 0.0], k).expect("nn"));
        }
        assert!(tree
            .execute_nn_query(&[2.0 * limit, 0.0], 1)
            .expect_err("query beyond the limit")
            .is_precondition_violation());
    }
}
