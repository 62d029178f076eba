use super::*;
use crate::{
    config::{IndexConfig, TreeParameters, DEFAULT_BLOCK_SIZE},
    databases::data_file::DataFile,
    geometry::{Bounded, BoundingBox},
    utils::MappedFile,
    InternalConsistencySnafu, InvalidFormatSnafu, NodeNotFoundSnafu, PreconditionViolationSnafu,
};
use bytes::{Buf, BufMut};
use lru::LruCache;
use snafu::prelude::*;
use std::{cell::RefCell, path::Path};

pub type OnDiskRStarTree = RStarTree<OnDiskNodeStore, DataFile>;

/// Creates fresh index and data files as described by `config`
pub fn create(config: &IndexConfig) -> Result<OnDiskRStarTree> {
    config.validate()?;
    let nodes = OnDiskNodeStore::create(&config.index_file, &config.tree, config.node_cache_size)?;
    let records = DataFile::create(&config.data_file, config.tree.dimensions, config.block_size)?;
    RStarTree::new(nodes, records, config.tree)
}

/// Opens the index and data files described by `config`
pub fn open(config: &IndexConfig) -> Result<OnDiskRStarTree> {
    config.validate()?;
    let nodes = OnDiskNodeStore::open(&config.index_file, &config.tree, config.node_cache_size)?;
    let records = DataFile::open(&config.data_file, config.tree.dimensions)?;
    RStarTree::new(nodes, records, config.tree)
}

/// An on-disk tree backed by anonymous files, which are removed once dropped
pub fn temporary(params: TreeParameters, cache_size: usize) -> Result<OnDiskRStarTree> {
    params.validate()?;
    let nodes = OnDiskNodeStore::temporary(&params, cache_size)?;
    let records = DataFile::temporary(params.dimensions, DEFAULT_BLOCK_SIZE)?;
    RStarTree::new(nodes, records, params)
}

const MAGIC: u32 = 0x5253_5449; // "RSTI"
const VERSION: u16 = 1;
/// magic, version, dimensions, max entries, has root, root id, next id, number of nodes
const HEADER_SIZE: usize = 4 + 2 + 2 + 2 + 1 + 8 + 8 + 8;
/// present flag, id, level, number of entries
const NODE_HEADER_SIZE: usize = 1 + 8 + 4 + 2;
const LEAF_ENTRY_TAG: u8 = 1;
const INTERNAL_ENTRY_TAG: u8 = 0;
const INITIAL_SLOTS: usize = 64;

/// How nodes are laid out in the index file
///
/// Slot 0 holds the file header, slot `id` holds node `id`.
/// Every slot has room for one entry more than a node may hold.
#[derive(Debug, Clone, Copy)]
struct SlotLayout {
    dimensions: usize,
    max_entries: usize,
}

impl SlotLayout {
    fn entry_size(&self) -> usize {
        1 + 16 * self.dimensions + 8 + 8
    }

    fn slot_size(&self) -> usize {
        let node_size = NODE_HEADER_SIZE + (self.max_entries + 1) * self.entry_size();
        node_size.max(HEADER_SIZE)
    }

    fn slot_offset(&self, id: NodeId) -> usize {
        id as usize * self.slot_size()
    }

    fn write_node(&self, file: &mut MappedFile, node: &Node) -> Result<()> {
        ensure!(
            node.len() <= self.max_entries + 1,
            InternalConsistencySnafu {
                description: format!(
                    "Node {} with {} entries does not fit into a slot",
                    node.id(),
                    node.len()
                ),
            }
        );
        let offset = self.slot_offset(node.id());
        file.ensure_len(offset + self.slot_size())?;
        let mut buf = &mut file.bytes_mut()[offset..offset + self.slot_size()];
        buf.put_u8(1);
        buf.put_u64(node.id());
        buf.put_u32(node.level());
        buf.put_u16(node.len() as u16);
        for entry in node.entries() {
            self.write_entry(&mut buf, entry)?;
        }
        Ok(())
    }

    fn write_entry(&self, mut buf: impl BufMut, entry: &Entry) -> Result<()> {
        let bounding_box = entry.bounding_box();
        ensure!(
            bounding_box.dimensions() == self.dimensions,
            PreconditionViolationSnafu {
                description: format!(
                    "Entry {} does not have {} dimensions",
                    entry, self.dimensions
                ),
            }
        );
        match entry {
            Entry::Internal { child_id, .. } => {
                buf.put_u8(INTERNAL_ENTRY_TAG);
                Self::write_box(&mut buf, bounding_box);
                buf.put_u64(*child_id);
                buf.put_u64(0);
            }
            Entry::Leaf {
                record_id,
                block_id,
                ..
            } => {
                buf.put_u8(LEAF_ENTRY_TAG);
                Self::write_box(&mut buf, bounding_box);
                buf.put_i64(*record_id);
                buf.put_u64(*block_id);
            }
        }
        Ok(())
    }

    fn write_box(mut buf: impl BufMut, bounding_box: &BoundingBox) {
        for value in bounding_box
            .lower_left()
            .iter()
            .chain(bounding_box.upper_right())
        {
            buf.put_f64(*value);
        }
    }

    /// Reads node `id`, `None` if its slot was never written
    fn read_node(&self, file: &MappedFile, id: NodeId) -> Result<Option<Node>> {
        let offset = self.slot_offset(id);
        if offset + self.slot_size() > file.len() {
            return Ok(None);
        }
        let mut buf = &file.bytes()[offset..offset + self.slot_size()];
        if buf.get_u8() == 0 {
            return Ok(None);
        }
        let stored_id = buf.get_u64();
        ensure!(
            stored_id == id,
            InvalidFormatSnafu {
                description: format!("Slot of node {id} holds node {stored_id}"),
            }
        );
        let level = buf.get_u32();
        let len = buf.get_u16() as usize;
        ensure!(
            len <= self.max_entries + 1,
            InvalidFormatSnafu {
                description: format!("Node {id} claims to hold {len} entries"),
            }
        );
        let entries = (0..len)
            .map(|_| self.read_entry(&mut buf))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Node::with_entries(id, level, entries)))
    }

    fn read_entry(&self, buf: &mut &[u8]) -> Result<Entry> {
        let tag = buf.get_u8();
        let lower_left = (0..self.dimensions).map(|_| buf.get_f64()).collect();
        let upper_right = (0..self.dimensions).map(|_| buf.get_f64()).collect();
        let bounding_box = BoundingBox::new(lower_left, upper_right)?;
        match tag {
            INTERNAL_ENTRY_TAG => {
                let child_id = buf.get_u64();
                buf.advance(8);
                Ok(Entry::internal(bounding_box, child_id))
            }
            LEAF_ENTRY_TAG => {
                let record_id = buf.get_i64();
                let block_id = buf.get_u64();
                Ok(Entry::leaf(bounding_box, record_id, block_id))
            }
            _ => InvalidFormatSnafu {
                description: format!("Unknown entry tag {tag}"),
            }
            .fail(),
        }
    }
}

struct CachedNode {
    node: Node,
    dirty: bool,
}

struct CacheData {
    cache: LruCache<NodeId, CachedNode>,
    must_flush: Vec<Node>,
}

impl CacheData {
    fn new() -> Self {
        CacheData {
            cache: LruCache::unbounded(),
            must_flush: Vec::new(),
        }
    }
}

/// Keeps nodes in fixed-size slots of a memory mapped index file
///
/// Recently used nodes are kept in an LRU cache, changes are written back on [`flush`](NodeStore::flush).
pub struct OnDiskNodeStore {
    file: MappedFile,
    layout: SlotLayout,
    root: Option<NodeId>,
    next_id: NodeId,
    num_nodes: usize,
    cache_size: usize,
    cache_data: RefCell<CacheData>,
}

impl OnDiskNodeStore {
    /// Creates (or truncates) the index file at `path`
    pub fn create<P>(path: P, params: &TreeParameters, cache_size: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let layout = Self::layout(params)?;
        let file = MappedFile::create(path, layout.slot_size() * INITIAL_SLOTS)?;
        Ok(Self::initialise(file, layout, cache_size))
    }

    /// An index file that is removed once dropped
    pub fn temporary(params: &TreeParameters, cache_size: usize) -> Result<Self> {
        let layout = Self::layout(params)?;
        let file = MappedFile::temporary(layout.slot_size() * INITIAL_SLOTS)?;
        Ok(Self::initialise(file, layout, cache_size))
    }

    /// Opens an existing index file, which must have been created with the same parameters
    pub fn open<P>(path: P, params: &TreeParameters, cache_size: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let layout = Self::layout(params)?;
        let file = MappedFile::open(path)?;
        ensure!(
            file.len() >= HEADER_SIZE,
            InvalidFormatSnafu {
                description: format!("Index file is only {} bytes long", file.len()),
            }
        );
        let mut buf = file.bytes();
        let magic = buf.get_u32();
        let version = buf.get_u16();
        ensure!(
            magic == MAGIC && version == VERSION,
            InvalidFormatSnafu {
                description: format!("Not an index file (magic={magic:#x}, version={version})"),
            }
        );
        let dimensions = buf.get_u16() as usize;
        let max_entries = buf.get_u16() as usize;
        ensure!(
            dimensions == layout.dimensions && max_entries == layout.max_entries,
            PreconditionViolationSnafu {
                description: format!(
                    "Index file was built with {} dimensions and {} entries per node, \
                     but {} and {} were requested",
                    dimensions, max_entries, layout.dimensions, layout.max_entries
                ),
            }
        );
        let has_root = buf.get_u8() != 0;
        let root_id = buf.get_u64();
        let next_id = buf.get_u64();
        let num_nodes = buf.get_u64() as usize;
        log::info!(
            "Opened index file with {} nodes (root {})",
            num_nodes,
            root_id
        );
        Ok(OnDiskNodeStore {
            file,
            layout,
            root: has_root.then_some(root_id),
            next_id,
            num_nodes,
            cache_size,
            cache_data: RefCell::new(CacheData::new()),
        })
    }

    fn layout(params: &TreeParameters) -> Result<SlotLayout> {
        params.validate()?;
        Ok(SlotLayout {
            dimensions: params.dimensions,
            max_entries: params.max_entries,
        })
    }

    fn initialise(file: MappedFile, layout: SlotLayout, cache_size: usize) -> Self {
        let mut store = OnDiskNodeStore {
            file,
            layout,
            root: None,
            next_id: 1,
            num_nodes: 0,
            cache_size,
            cache_data: RefCell::new(CacheData::new()),
        };
        store.write_header();
        store
    }

    fn write_header(&mut self) {
        let mut buf = &mut self.file.bytes_mut()[..HEADER_SIZE];
        buf.put_u32(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u16(self.layout.dimensions as u16);
        buf.put_u16(self.layout.max_entries as u16);
        buf.put_u8(self.root.is_some() as u8);
        buf.put_u64(self.root.unwrap_or(0));
        buf.put_u64(self.next_id);
        buf.put_u64(self.num_nodes as u64);
    }

    fn cache_node(&self, node: Node, dirty: bool) {
        let mut mut_cache_data = self.cache_data.borrow_mut();
        if !mut_cache_data.cache.contains(&node.id())
            && mut_cache_data.cache.len() >= self.cache_size
        {
            if let Some((_, uncached)) = mut_cache_data.cache.pop_lru() {
                if uncached.dirty {
                    mut_cache_data.must_flush.push(uncached.node);
                }
            }
        }
        mut_cache_data.cache.put(node.id(), CachedNode { node, dirty });
    }

    /// Looks for `id` in the cache or in the nodes waiting to be flushed
    fn find_pending(&self, id: NodeId) -> Option<Node> {
        let cached = {
            self.cache_data
                .borrow_mut()
                .cache
                .get(&id)
                .map(|c| c.node.clone())
        };
        if cached.is_some() {
            return cached;
        }
        let position = {
            self.cache_data
                .borrow()
                .must_flush
                .iter()
                .position(|n| n.id() == id)
        };
        position.map(|position| {
            let node = self.cache_data.borrow_mut().must_flush.swap_remove(position);
            if self.cache_size > 0 {
                self.cache_node(node.clone(), true);
            } else {
                self.cache_data.borrow_mut().must_flush.push(node.clone());
            }
            node
        })
    }

    fn contains(&self, id: NodeId) -> Result<bool> {
        if id == 0 || id >= self.next_id {
            return Ok(false);
        }
        if self.find_pending(id).is_some() {
            return Ok(true);
        }
        Ok(self.layout.read_node(&self.file, id)?.is_some())
    }

    fn store(&mut self, node: &Node) -> Result<()> {
        ensure!(
            node.id() != 0 && node.id() < self.next_id,
            InternalConsistencySnafu {
                description: format!("Node id {} was never handed out", node.id()),
            }
        );
        if self.cache_size == 0 {
            // drop any stale pending copy, the slot is written right away
            self.cache_data
                .get_mut()
                .must_flush
                .retain(|n| n.id() != node.id());
            self.layout.write_node(&mut self.file, node)
        } else {
            self.cache_node(node.clone(), true);
            Ok(())
        }
    }
}

impl NodeStore for OnDiskNodeStore {
    fn get_node(&self, id: NodeId) -> Result<Node> {
        ensure!(id != 0 && id < self.next_id, NodeNotFoundSnafu { id });
        if let Some(node) = self.find_pending(id) {
            return Ok(node);
        }
        let node = self
            .layout
            .read_node(&self.file, id)?
            .context(NodeNotFoundSnafu { id })?;
        if self.cache_size > 0 {
            self.cache_node(node.clone(), false);
        }
        Ok(node)
    }

    fn insert_node(&mut self, node: &Node) -> Result<()> {
        ensure!(
            !self.contains(node.id())?,
            InternalConsistencySnafu {
                description: format!("Node {} was already stored", node.id()),
            }
        );
        self.store(node)?;
        self.num_nodes += 1;
        Ok(())
    }

    fn update_node(&mut self, node: &Node) -> Result<()> {
        ensure!(
            self.contains(node.id())?,
            NodeNotFoundSnafu { id: node.id() }
        );
        self.store(node)
    }

    fn set_root_node(&mut self, node: &Node) -> Result<()> {
        if self.contains(node.id())? {
            self.update_node(node)?;
        } else {
            self.insert_node(node)?;
        }
        self.root = Some(node.id());
        self.write_header();
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
        self.num_nodes
    }

    fn flush(&mut self) -> Result<()> {
        let layout = self.layout;
        let cache_data = self.cache_data.get_mut();
        for node in std::mem::take(&mut cache_data.must_flush) {
            layout.write_node(&mut self.file, &node)?;
        }
        for (_, cached) in cache_data.cache.iter_mut() {
            if cached.dirty {
                layout.write_node(&mut self.file, &cached.node)?;
                cached.dirty = false;
            }
        }
        self.write_header();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()
    }

    fn print_stats(&self) {
        log::info!(
            "On-disk R*-tree index holding {} nodes in {}KB. Also {}/{} nodes in cache.",
            self.num_nodes,
            self.num_nodes * self.layout.slot_size() / 1024,
            self.cache_data.borrow().cache.len(),
            self.cache_size
        );
    }
}

impl Drop for OnDiskNodeStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush().and_then(|_| self.sync()) {
            log::warn!("Could not flush index file: {}", e);
        }
    }
}
