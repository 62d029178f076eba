//! Queries that read every data block instead of using the index.
//!
//! Slow, but independent of the tree, which makes them a baseline for
//! measuring and checking the indexed queries.

use super::{
    indices::r_tree::{check_k, check_radius, resolve, Neighbor, NeighborQueue},
    RecordStore,
};
use crate::{geometry::BoundingBox, LocationQueryResult, PreconditionViolationSnafu, Result};
use snafu::prelude::*;

fn check_point<R>(records: &R, point: &[f64]) -> Result<()>
where
    R: RecordStore,
{
    ensure!(
        point.len() == records.dimensions() && point.iter().all(|c| c.is_finite()),
        PreconditionViolationSnafu {
            description: format!(
                "Expected a finite {}-dimensional point, got {point:?}",
                records.dimensions()
            ),
        }
    );
    Ok(())
}

/// Calls `visit` with every stored record and its distance to `point`
fn scan<R, F>(records: &R, point: &[f64], mut visit: F) -> Result<()>
where
    R: RecordStore,
    F: FnMut(Neighbor),
{
    for block_id in records.block_ids() {
        for record in records.get_data_block(block_id)? {
            // same metric as the tree's leaf entries
            let distance = BoundingBox::from_point(&record.coordinates).min_distance(point);
            visit(Neighbor {
                block_id,
                record_id: record.id,
                distance,
            });
        }
    }
    Ok(())
}

/// All records within `radius` of `point`, nearest first
pub fn sequential_range_query<R>(
    records: &R,
    point: &[f64],
    radius: f64,
) -> Result<Vec<LocationQueryResult>>
where
    R: RecordStore,
{
    check_point(records, point)?;
    check_radius(radius)?;
    let mut hits = Vec::new();
    scan(records, point, |candidate| {
        if candidate.distance <= radius {
            hits.push(candidate);
        }
    })?;
    resolve(hits, records)
}

/// The `k` records closest to `point`, nearest first
pub fn sequential_nn_query<R>(
    records: &R,
    point: &[f64],
    k: usize,
) -> Result<Vec<LocationQueryResult>>
where
    R: RecordStore,
{
    check_point(records, point)?;
    check_k(k)?;
    let mut neighbors = NeighborQueue::new(k);
    scan(records, point, |candidate| neighbors.offer(candidate))?;
    resolve(neighbors.into_sorted_vec(), records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{databases::in_memory_records::InMemoryRecordStore, Record};

    fn store() -> InMemoryRecordStore {
        let mut store = InMemoryRecordStore::with_block_capacity(2, 2);
        for (id, name, x, y) in [
            (1, "A", 0.0, 0.0),
            (2, "B", 3.0, 4.0),
            (3, "C", 10.0, 10.0),
            (4, "D", -3.0, -4.0),
        ] {
            store
                .append_record(&Record::new(id, name, vec![x, y]))
                .expect("append");
        }
        store
    }

    #[test]
    fn test_sequential_nn() {
        let store = store();
        let results = sequential_nn_query(&store, &[0.0, 0.0], 3).expect("query");
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        // B and D tie at 5.0, ordered by name
        assert_eq!(vec!["A", "B", "D"], names);
        assert_eq!(5.0, results[2].distance);

        let all = sequential_nn_query(&store, &[0.0, 0.0], 10).expect("query");
        assert_eq!(4, all.len());
    }

    #[test]
    fn test_sequential_range() {
        let store = store();
        let results = sequential_range_query(&store, &[0.0, 0.0], 5.0).expect("query");
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(vec!["A", "B", "D"], names);
        assert!(sequential_range_query(&store, &[0.0, 0.0], 4.9)
            .expect("query")
            .iter()
            .all(|r| r.name == "A"));
        assert!(sequential_range_query(&store, &[0.0], 1.0).is_err());
        assert!(sequential_nn_query(&store, &[0.0, 0.0], 0).is_err());
    }
}
