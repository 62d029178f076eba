mod comparators;
mod entries;
pub mod in_memory;
mod nodes;
pub mod on_disk;
mod queries;
mod tree;

pub use entries::Entry;
pub use nodes::{Node, LEAF_LEVEL};
pub use queries::{NearestNeighborQuery, RangeQuery};
pub use tree::RStarTree;

pub(crate) use queries::{check_k, check_radius, resolve, Neighbor, NeighborQueue};

use crate::{MissingRootSnafu, Result};
use snafu::prelude::*;

pub type NodeId = u64;

/// Persists the nodes of an R*-tree
///
/// Node ids are handed out by the store, start at `1`, and are never reused.
pub trait NodeStore {
    fn get_node(&self, id: NodeId) -> Result<Node>;

    /// Stores a node that was never stored before
    fn insert_node(&mut self, node: &Node) -> Result<()>;

    /// Overwrites an existing node
    fn update_node(&mut self, node: &Node) -> Result<()>;

    /// Stores `node` (inserting or updating it) and makes it the root
    fn set_root_node(&mut self, node: &Node) -> Result<()>;

    fn root_node_id(&self) -> Option<NodeId>;

    fn get_root_node(&self) -> Result<Node> {
        let id = self.root_node_id().context(MissingRootSnafu)?;
        self.get_node(id)
    }

    fn next_available_node_id(&mut self) -> NodeId;

    fn num_nodes(&self) -> usize;

    /// Flush all pending changes into the backing storage (where used)
    fn flush(&mut self) -> Result<()>;

    /// Make all flushed changes durable (where used)
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn print_stats(&self);
}
