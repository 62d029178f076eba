use snafu::{prelude::*, Backtrace, IntoError};
use std::path::PathBuf;

pub mod config;
pub mod databases;
pub mod geometry;
pub mod osm_data;
pub mod quick_xml_reader;
pub mod utils;

pub use config::{IndexConfig, TreeParameters};
pub use databases::{
    indices::r_tree::{self, NodeStore, RStarTree},
    RecordStore,
};
pub use geometry::BoundingBox;
pub use osm_data::{BlockId, LocationQueryResult, Record, RecordId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Precondition violated: {description}"))]
    PreconditionViolation {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Internal consistency violated: {description}"))]
    InternalConsistency {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Cannot compute a bounding box over an empty set"))]
    EmptyInput { backtrace: Backtrace },
    #[snafu(display("No node with id {id} exists"))]
    NodeNotFound { id: u64, backtrace: Backtrace },
    #[snafu(display("The node store has no root node"))]
    MissingRoot { backtrace: Backtrace },
    #[snafu(display("Record {record_id} could not be found in block {block_id}"))]
    RecordNotFound {
        block_id: u64,
        record_id: i64,
        backtrace: Backtrace,
    },
    #[snafu(display("Block {block_id} does not exist"))]
    BlockNotFound { block_id: u64, backtrace: Backtrace },
    #[snafu(display("Invalid file format: {description}"))]
    InvalidFormat {
        description: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Error reading or writing data: {source}"))]
    Io {
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Error reading OSM XML: {source}"))]
    Xml {
        source: quick_xml::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Could not parse '{value}' as an integer: {source}"))]
    ParseInt {
        value: String,
        source: std::num::ParseIntError,
        backtrace: Backtrace,
    },
    #[snafu(display("Could not parse '{value}' as a float: {source}"))]
    ParseFloat {
        value: String,
        source: std::num::ParseFloatError,
        backtrace: Backtrace,
    },
    #[snafu(display("Could not load config from {}: {source}", path.display()))]
    Config {
        path: PathBuf,
        source: toml::de::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Errors that indicate a bug in the tree rather than bad input or a failing store.
    pub fn is_internal_consistency(&self) -> bool {
        matches!(
            self,
            Error::InternalConsistency { .. } | Error::EmptyInput { .. }
        )
    }

    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, Error::PreconditionViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound { .. }
                | Error::MissingRoot { .. }
                | Error::RecordNotFound { .. }
                | Error::BlockNotFound { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        IoSnafu.into_error(source)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(source: quick_xml::Error) -> Self {
        XmlSnafu.into_error(source)
    }
}
