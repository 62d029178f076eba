use super::RecordStore;
use crate::{
    osm_data::{BlockId, Record, FIRST_DATA_BLOCK},
    BlockNotFoundSnafu, PreconditionViolationSnafu, Result,
};
use snafu::prelude::*;
use std::ops::Range;

pub const DEFAULT_RECORDS_PER_BLOCK: usize = 64;

/// Keeps records in memory, grouped into blocks of a fixed number of records
#[derive(Debug)]
pub struct InMemoryRecordStore {
    dimensions: usize,
    records_per_block: usize,
    blocks: Vec<Vec<Record>>,
    num_records: u64,
}

impl InMemoryRecordStore {
    pub fn new(dimensions: usize) -> Self {
        Self::with_block_capacity(dimensions, DEFAULT_RECORDS_PER_BLOCK)
    }

    pub fn with_block_capacity(dimensions: usize, records_per_block: usize) -> Self {
        InMemoryRecordStore {
            dimensions,
            records_per_block: records_per_block.max(1),
            blocks: Vec::new(),
            num_records: 0,
        }
    }

    fn block_index(&self, block_id: BlockId) -> Option<usize> {
        block_id
            .checked_sub(FIRST_DATA_BLOCK)
            .map(|i| i as usize)
            .filter(|i| *i < self.blocks.len())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get_data_block(&self, block_id: BlockId) -> Result<Vec<Record>> {
        let index = self
            .block_index(block_id)
            .context(BlockNotFoundSnafu { block_id })?;
        Ok(self.blocks[index].clone())
    }

    fn block_ids(&self) -> Range<BlockId> {
        FIRST_DATA_BLOCK..FIRST_DATA_BLOCK + self.blocks.len() as BlockId
    }

    fn num_records(&self) -> u64 {
        self.num_records
    }

    fn append_record(&mut self, record: &Record) -> Result<BlockId> {
        ensure!(
            record.dimensions() == self.dimensions,
            PreconditionViolationSnafu {
                description: format!(
                    "Record {} has {} coordinates, expected {}",
                    record.id,
                    record.dimensions(),
                    self.dimensions
                ),
            }
        );
        let needs_block = self
            .blocks
            .last()
            .map_or(true, |block| {
                block.len() >= self.records_per_block || block.iter().any(|r| r.id == record.id)
            });
        if needs_block {
            self.blocks.push(Vec::with_capacity(self.records_per_block));
        }
        let index = self.blocks.len() - 1;
        self.blocks[index].push(record.clone());
        self.num_records += 1;
        Ok(FIRST_DATA_BLOCK + index as BlockId)
    }
}
