use super::*;
use crate::{
    config::TreeParameters, databases::in_memory_records::InMemoryRecordStore,
    InternalConsistencySnafu, NodeNotFoundSnafu,
};
use rustc_hash::FxHashMap;

pub type InMemoryRStarTree = RStarTree<InMemoryNodeStore, InMemoryRecordStore>;

/// An empty tree that keeps both nodes and records in memory
pub fn new(params: TreeParameters) -> Result<InMemoryRStarTree> {
    RStarTree::new(
        InMemoryNodeStore::new(),
        InMemoryRecordStore::new(params.dimensions),
        params,
    )
}

#[derive(Debug)]
pub struct InMemoryNodeStore {
    nodes: FxHashMap<NodeId, Node>,
    root: Option<NodeId>,
    next_id: NodeId,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        InMemoryNodeStore {
            nodes: FxHashMap::default(),
            root: None,
            next_id: 1,
        }
    }
}

impl Default for InMemoryNodeStore {
    fn default() -> Self {
        InMemoryNodeStore::new()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn get_node(&self, id: NodeId) -> Result<Node> {
        self.nodes
            .get(&id)
            .cloned()
            .context(NodeNotFoundSnafu { id })
    }

    fn insert_node(&mut self, node: &Node) -> Result<()> {
        ensure!(
            !self.nodes.contains_key(&node.id()),
            InternalConsistencySnafu {
                description: format!("Node {} was already stored", node.id()),
            }
        );
        self.nodes.insert(node.id(), node.clone());
        Ok(())
    }

    fn update_node(&mut self, node: &Node) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(&node.id())
            .context(NodeNotFoundSnafu { id: node.id() })?;
        *slot = node.clone();
        Ok(())
    }

    fn set_root_node(&mut self, node: &Node) -> Result<()> {
        self.nodes.insert(node.id(), node.clone());
        self.root = Some(node.id());
        Ok(())
    }

    fn root_node_id(&self) -> Option<NodeId> {
        self.root
    }

    fn next_available_node_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn flush(&mut self) -> Result<()> {
        // no-op in memory
        Ok(())
    }

    fn print_stats(&self) {
        let heap: usize = self.nodes.values().map(Node::heap_size).sum();
        log::info!(
            "In-memory R*-tree index holding {} nodes in about {}KB",
            self.nodes.len(),
            heap / 1024
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::databases::indices::r_tree::tests;

    #[test]
    fn test_small_scenario() {
        let tree = new(TreeParameters::new(2, 3).expect("valid")).expect("tree");
        tests::test_small_scenario(tree);
    }

    #[test]
    fn test_against_sequential_scan() {
        let tree = new(TreeParameters::new(2, 4).expect("valid")).expect("tree");
        tests::test_against_sequential_scan(tree, 600);
    }

    #[test]
    fn test_against_sequential_scan_default_parameters() {
        let tree = new(TreeParameters::default()).expect("tree");
        tests::test_against_sequential_scan(tree, 2_000);
    }

    #[test]
    fn test_preconditions() {
        let tree = new(TreeParameters::new(2, 4).expect("valid")).expect("tree");
        tests::test_preconditions(tree);
    }

    #[test]
    fn test_store_lookups() {
        let mut store = InMemoryNodeStore::new();
        assert!(store.get_root_node().expect_err("no root").is_not_found());
        let id = store.next_available_node_id();
        assert_eq!(1, id);
        assert_eq!(2, store.next_available_node_id());
        let node = Node::new(id, LEAF_LEVEL);
        assert!(store.update_node(&node).expect_err("missing").is_not_found());
        store.insert_node(&node).expect("insert");
        assert!(store
            .insert_node(&node)
            .expect_err("duplicate")
            .is_internal_consistency());
        store.set_root_node(&node).expect("root");
        assert_eq!(node, store.get_root_node().expect("root"));
        assert!(store.get_node(99).expect_err("missing").is_not_found());
    }
}
