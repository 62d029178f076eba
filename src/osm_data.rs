use get_size::GetSize;
use itertools::Itertools;
use std::{cmp::Ordering, fmt};

// <node id="106904" lat="51.5195553" lon="-0.0362329" version="5">
//     <tag k="name" v="Limehouse Basin Lock"/>
//   </node>

pub type RecordId = i64;
/// Identifies a block in the record store. Block `0` is reserved for metadata.
pub type BlockId = u64;

pub const FIRST_DATA_BLOCK: BlockId = 1;

/// A named location, the unit of data that gets indexed
#[derive(Debug, Clone, PartialEq, GetSize)]
pub struct Record {
    pub id: RecordId,
    pub name: String,
    pub coordinates: Vec<f64>,
}

impl Record {
    pub fn new(id: RecordId, name: impl Into<String>, coordinates: Vec<f64>) -> Self {
        Record {
            id,
            name: name.into(),
            coordinates,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.coordinates.len()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({})",
            self.id,
            self.name,
            self.coordinates.iter().join(", ")
        )
    }
}

/// A record found by a query, together with its distance to the query point
#[derive(Debug, Clone, PartialEq)]
pub struct LocationQueryResult {
    pub record_id: RecordId,
    pub name: String,
    pub coordinates: Vec<f64>,
    pub distance: f64,
}

impl LocationQueryResult {
    pub fn new(record: Record, distance: f64) -> Self {
        LocationQueryResult {
            record_id: record.id,
            name: record.name,
            coordinates: record.coordinates,
            distance,
        }
    }

    /// Result order: ascending distance, then name, then id.
    pub fn ordering(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.record_id.cmp(&other.record_id))
    }

    pub fn sort(results: &mut [LocationQueryResult]) {
        results.sort_by(|a, b| a.ordering(b));
    }
}

impl fmt::Display for LocationQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-----------------------------------------")?;
        writeln!(f, "Record ID: {}", self.record_id)?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "Coordinates: [{}]", self.coordinates.iter().join(", "))?;
        writeln!(f, "Distance: {}", self.distance)?;
        write!(f, "-----------------------------------------")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ordering() {
        let mut results = vec![
            LocationQueryResult::new(Record::new(3, "Cafe", vec![1.0, 1.0]), 2.0),
            LocationQueryResult::new(Record::new(1, "Bakery", vec![1.0, 1.0]), 2.0),
            LocationQueryResult::new(Record::new(2, "Zoo", vec![0.0, 0.0]), 0.5),
        ];
        LocationQueryResult::sort(&mut results);
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(vec!["Zoo", "Bakery", "Cafe"], names);
    }

    #[test]
    fn test_display() {
        let record = Record::new(7, "Lighthouse", vec![51.5, -0.25]);
        assert_eq!("#7 Lighthouse (51.5, -0.25)", record.to_string());
        let result = LocationQueryResult::new(record, 1.5);
        let text = result.to_string();
        assert!(text.contains("Name: Lighthouse"));
        assert!(text.contains("Coordinates: [51.5, -0.25]"));
        assert!(text.contains("Distance: 1.5"));
    }
}
