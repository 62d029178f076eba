use super::NodeId;
use crate::{
    geometry::{Bounded, BoundingBox},
    osm_data::{BlockId, RecordId},
};
use get_size::GetSize;
use std::fmt;

/// A slot in a node
///
/// Internal nodes hold [`Entry::Internal`] pointing at a child node,
/// leaves hold [`Entry::Leaf`] pointing at a record in the record store.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Internal {
        bounding_box: BoundingBox,
        child_id: NodeId,
    },
    Leaf {
        bounding_box: BoundingBox,
        record_id: RecordId,
        block_id: BlockId,
    },
}

impl Entry {
    pub fn internal(bounding_box: BoundingBox, child_id: NodeId) -> Self {
        Entry::Internal {
            bounding_box,
            child_id,
        }
    }

    pub fn leaf(bounding_box: BoundingBox, record_id: RecordId, block_id: BlockId) -> Self {
        Entry::Leaf {
            bounding_box,
            record_id,
            block_id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Entry::Leaf { .. })
    }

    pub fn child_id(&self) -> Option<NodeId> {
        match self {
            Entry::Internal { child_id, .. } => Some(*child_id),
            Entry::Leaf { .. } => None,
        }
    }
}

impl Bounded for Entry {
    fn bounding_box(&self) -> &BoundingBox {
        match self {
            Entry::Internal { bounding_box, .. } | Entry::Leaf { bounding_box, .. } => {
                bounding_box
            }
        }
    }
}

impl GetSize for Entry {
    fn get_heap_size(&self) -> usize {
        self.bounding_box().get_heap_size()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Internal {
                bounding_box,
                child_id,
            } => write!(f, "{bounding_box} -> node {child_id}"),
            Entry::Leaf {
                bounding_box,
                record_id,
                block_id,
            } => write!(f, "{bounding_box} -> record {record_id}@{block_id}"),
        }
    }
}
