use super::RecordStore;
use crate::{
    osm_data::{BlockId, Record, RecordId, FIRST_DATA_BLOCK},
    utils::MappedFile,
    BlockNotFoundSnafu, InvalidFormatSnafu, PreconditionViolationSnafu, Result,
};
use bytes::{Buf, BufMut};
use snafu::prelude::*;
use rustc_hash::FxHashSet;
use std::{ops::Range, path::Path};

const MAGIC: u32 = 0x5253_5444; // "RSTD"
const VERSION: u16 = 1;
/// magic, version, dimensions, block size, number of data blocks, number of records
const METADATA_SIZE: usize = 4 + 2 + 2 + 4 + 8 + 8;
/// record count at the start of every data block
const BLOCK_HEADER_SIZE: usize = 2;

/// Stores records in fixed-size blocks of a memory mapped file
///
/// Block 0 holds the metadata, data blocks follow. Each data block starts with
/// its record count, followed by the records packed one after another.
/// Record ids are unique within a block.
pub struct DataFile {
    file: MappedFile,
    dimensions: usize,
    block_size: usize,
    num_blocks: u64,
    num_records: u64,
    /// Bytes used in the last data block
    last_block_fill: usize,
    /// Ids of the records in the last data block
    last_block_ids: FxHashSet<RecordId>,
    max_block_records: usize,
}

impl DataFile {
    /// Creates (or truncates) the data file at `path`
    pub fn create<P>(path: P, dimensions: usize, block_size: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        Self::check_layout(dimensions, block_size)?;
        let file = MappedFile::create(path, block_size * 2)?;
        Self::initialise(file, dimensions, block_size)
    }

    /// A data file that is removed once dropped
    pub fn temporary(dimensions: usize, block_size: usize) -> Result<Self> {
        Self::check_layout(dimensions, block_size)?;
        let file = MappedFile::temporary(block_size * 2)?;
        Self::initialise(file, dimensions, block_size)
    }

    /// Opens an existing data file, which must hold records with `dimensions` coordinates
    pub fn open<P>(path: P, dimensions: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = MappedFile::open(path)?;
        ensure!(
            file.len() >= METADATA_SIZE,
            InvalidFormatSnafu {
                description: format!("Data file is only {} bytes long", file.len()),
            }
        );
        let mut buf = file.bytes();
        let magic = buf.get_u32();
        let version = buf.get_u16();
        ensure!(
            magic == MAGIC && version == VERSION,
            InvalidFormatSnafu {
                description: format!("Not a data file (magic={magic:#x}, version={version})"),
            }
        );
        let stored_dimensions = buf.get_u16() as usize;
        let block_size = buf.get_u32() as usize;
        let num_blocks = buf.get_u64();
        let num_records = buf.get_u64();
        ensure!(
            block_size >= METADATA_SIZE,
            InvalidFormatSnafu {
                description: format!("Invalid block size {block_size}"),
            }
        );
        ensure!(
            stored_dimensions == dimensions,
            PreconditionViolationSnafu {
                description: format!(
                    "Data file holds {stored_dimensions}-dimensional records, expected {dimensions}"
                ),
            }
        );
        ensure!(
            file.len() >= (num_blocks as usize + 1) * block_size,
            InvalidFormatSnafu {
                description: format!(
                    "Data file of {} bytes is too short for {} blocks of {} bytes",
                    file.len(),
                    num_blocks,
                    block_size
                ),
            }
        );
        let mut data_file = DataFile {
            file,
            dimensions,
            block_size,
            num_blocks,
            num_records,
            last_block_fill: 0,
            last_block_ids: FxHashSet::default(),
            max_block_records: u16::MAX as usize,
        };
        if num_blocks > 0 {
            let last_block = data_file.get_data_block(num_blocks)?;
            data_file.last_block_fill = BLOCK_HEADER_SIZE
                + last_block
                    .iter()
                    .map(|r| data_file.record_size(r))
                    .sum::<usize>();
            data_file.last_block_ids = last_block.iter().map(|r| r.id).collect();
        }
        log::info!(
            "Opened data file with {} records in {} blocks",
            num_records,
            num_blocks
        );
        Ok(data_file)
    }

    fn check_layout(dimensions: usize, block_size: usize) -> Result<()> {
        ensure!(
            dimensions > 0 && dimensions <= u16::MAX as usize,
            PreconditionViolationSnafu {
                description: format!("Unsupported number of dimensions: {dimensions}"),
            }
        );
        ensure!(
            block_size >= METADATA_SIZE && block_size <= u32::MAX as usize,
            PreconditionViolationSnafu {
                description: format!("Unsupported block size: {block_size}"),
            }
        );
        Ok(())
    }

    fn initialise(file: MappedFile, dimensions: usize, block_size: usize) -> Result<Self> {
        let mut data_file = DataFile {
            file,
            dimensions,
            block_size,
            num_blocks: 0,
            num_records: 0,
            last_block_fill: 0,
            last_block_ids: FxHashSet::default(),
            max_block_records: u16::MAX as usize,
        };
        data_file.write_metadata();
        log::info!("Created data file with blocks of {} bytes", block_size);
        Ok(data_file)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn write_metadata(&mut self) {
        let mut buf = &mut self.file.bytes_mut()[..METADATA_SIZE];
        buf.put_u32(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u16(self.dimensions as u16);
        buf.put_u32(self.block_size as u32);
        buf.put_u64(self.num_blocks);
        buf.put_u64(self.num_records);
    }

    fn block_offset(&self, block_id: BlockId) -> usize {
        block_id as usize * self.block_size
    }

    fn block(&self, block_id: BlockId) -> Result<&[u8]> {
        ensure!(
            self.block_ids().contains(&block_id),
            BlockNotFoundSnafu { block_id }
        );
        let offset = self.block_offset(block_id);
        Ok(&self.file.bytes()[offset..offset + self.block_size])
    }

    fn record_size(&self, record: &Record) -> usize {
        8 + 2 + record.name.len() + 8 * self.dimensions
    }

    fn read_record(&self, buf: &mut &[u8]) -> Result<Record> {
        ensure!(
            buf.remaining() >= 10,
            InvalidFormatSnafu {
                description: "Record header runs past the end of its block".to_string(),
            }
        );
        let id = buf.get_i64();
        let name_len = buf.get_u16() as usize;
        ensure!(
            buf.remaining() >= name_len + 8 * self.dimensions,
            InvalidFormatSnafu {
                description: format!("Record {id} runs past the end of its block"),
            }
        );
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf.advance(name_len);
        let coordinates = (0..self.dimensions).map(|_| buf.get_f64()).collect();
        Ok(Record {
            id,
            name,
            coordinates,
        })
    }

    fn write_record(mut buf: impl BufMut, record: &Record) {
        buf.put_i64(record.id);
        buf.put_u16(record.name.len() as u16);
        buf.put_slice(record.name.as_bytes());
        for c in record.coordinates.iter() {
            buf.put_f64(*c);
        }
    }
}

impl RecordStore for DataFile {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn get_data_block(&self, block_id: BlockId) -> Result<Vec<Record>> {
        let mut buf = self.block(block_id)?;
        let count = buf.get_u16();
        (0..count).map(|_| self.read_record(&mut buf)).collect()
    }

    fn block_ids(&self) -> Range<BlockId> {
        FIRST_DATA_BLOCK..FIRST_DATA_BLOCK + self.num_blocks
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
        let size = self.record_size(record);
        ensure!(
            record.name.len() <= u16::MAX as usize && size + BLOCK_HEADER_SIZE <= self.block_size,
            PreconditionViolationSnafu {
                description: format!(
                    "Record {} needs {} bytes, but blocks only hold {}",
                    record.id,
                    size,
                    self.block_size - BLOCK_HEADER_SIZE
                ),
            }
        );
        if self.num_blocks == 0
            || self.last_block_fill + size > self.block_size
            || self.last_block_ids.len() >= self.max_block_records
            || self.last_block_ids.contains(&record.id)
        {
            self.num_blocks += 1;
            self.last_block_fill = BLOCK_HEADER_SIZE;
            self.last_block_ids.clear();
            let end = self.block_offset(self.num_blocks + 1);
            self.file.ensure_len(end)?;
            let offset = self.block_offset(self.num_blocks);
            (&mut self.file.bytes_mut()[offset..]).put_u16(0);
        }
        let block_id = self.num_blocks;
        let offset = self.block_offset(block_id);
        let fill = self.last_block_fill;
        self.last_block_ids.insert(record.id);
        let count = self.last_block_ids.len() as u16;
        let block = &mut self.file.bytes_mut()[offset..offset + self.block_size];
        Self::write_record(&mut block[fill..], record);
        (&mut block[..BLOCK_HEADER_SIZE]).put_u16(count);
        self.last_block_fill += size;
        self.num_records += 1;
        self.write_metadata();
        Ok(block_id)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()
    }
}

impl Drop for DataFile {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            log::warn!("Could not flush data file: {}", e);
        }
    }
}
