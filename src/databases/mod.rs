use crate::{
    osm_data::{BlockId, Record, RecordId},
    quick_xml_reader, RecordNotFoundSnafu, Result,
};
use snafu::prelude::*;
use std::{ops::Range, path::Path, time::Instant};

pub mod data_file;
pub mod in_memory_records;
pub mod indices;
pub mod sequential_scan;

use indices::r_tree::{NodeStore, RStarTree};

/// Keeps records in numbered blocks
///
/// Data blocks are numbered from [`FIRST_DATA_BLOCK`](crate::osm_data::FIRST_DATA_BLOCK).
/// Record ids are unique within a block, so `(block_id, record_id)` names exactly one record.
/// Appending an id that is already in the current block starts a new block.
pub trait RecordStore {
    /// Number of coordinates of every stored record
    fn dimensions(&self) -> usize;

    fn get_data_block(&self, block_id: BlockId) -> Result<Vec<Record>>;

    fn get_record(&self, block_id: BlockId, record_id: RecordId) -> Result<Record> {
        self.get_data_block(block_id)?
            .into_iter()
            .find(|record| record.id == record_id)
            .context(RecordNotFoundSnafu {
                block_id,
                record_id,
            })
    }

    /// Ids of all data blocks in order
    fn block_ids(&self) -> Range<BlockId>;

    fn num_records(&self) -> u64;

    /// Stores `record` and returns the block it was placed in
    fn append_record(&mut self, record: &Record) -> Result<BlockId>;

    /// Make all appended records durable (where used)
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Stores and indexes every named node in the OSM XML file at `path`
///
/// Returns the number of records added.
pub fn load_osm_file<P, N, R>(path: P, tree: &mut RStarTree<N, R>) -> Result<u64>
where
    P: AsRef<Path>,
    N: NodeStore,
    R: RecordStore,
{
    let path = path.as_ref();
    log::info!("Loading named nodes from {}", path.display());
    let start = Instant::now();
    let total = quick_xml_reader::scan_records(
        path,
        |record, count: u64| {
            tree.add_record(record)?;
            let count = count + 1;
            if count % 10_000 == 0 {
                log::info!("Indexed {count} records so far");
            }
            Ok(count)
        },
        0,
    )?;
    tree.sync()?;
    log::info!(
        "Indexed {} records from {} in {}",
        total,
        path.display(),
        pretty_duration::pretty_duration(&start.elapsed(), None)
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TreeParameters, r_tree::in_memory};
    use std::io::Write;

    #[test]
    fn test_load_osm_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="51.0" minlon="-1.0" maxlat="52.0" maxlon="1.0"/>
  <node id="1" lat="51.5" lon="-0.1">
    <tag k="name" v="Tower"/>
  </node>
  <node id="2" lat="51.6" lon="-0.2"/>
  <node id="3" lat="51.4" lon="0.1">
    <tag k="amenity" v="pub"/>
    <tag k="name" v="The Anchor"/>
  </node>
  <way id="10">
    <nd ref="1"/>
    <tag k="name" v="Some Road"/>
  </way>
</osm>"#
        )
        .expect("write osm");
        let params = TreeParameters::new(2, 4).expect("valid");
        let mut tree = in_memory::new(params).expect("tree");
        let count = load_osm_file(file.path(), &mut tree).expect("load");
        assert_eq!(2, count);
        assert_eq!(2, tree.len());
        let nearest = tree.execute_nn_query(&[51.5, -0.1], 1).expect("nn query");
        assert_eq!("Tower", nearest[0].name);
        assert_eq!(vec![51.5, -0.1], nearest[0].coordinates);
    }
}
