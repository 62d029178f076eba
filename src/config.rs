use crate::{ConfigSnafu, PreconditionViolationSnafu, Result};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024; // 32KiB
pub const DEFAULT_NODE_CACHE_SIZE: usize = 64;

/// Shape parameters of an R*-tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParameters {
    /// Number of coordinates of every indexed point
    pub dimensions: usize,
    /// Maximum number of entries in a node (`M`)
    pub max_entries: usize,
    /// Minimum fill of non-root nodes as a fraction of `max_entries`
    pub min_fill_factor: f64,
    /// Fraction of `max_entries` that is reinserted on a node's first overflow
    pub reinsert_fraction: f64,
}

impl Default for TreeParameters {
    fn default() -> Self {
        TreeParameters {
            dimensions: 2,
            max_entries: 32,
            min_fill_factor: 0.4,
            reinsert_fraction: 0.3,
        }
    }
}

impl TreeParameters {
    pub fn new(dimensions: usize, max_entries: usize) -> Result<Self> {
        let params = TreeParameters {
            dimensions,
            max_entries,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// `m`, the minimum number of entries in any non-root node
    pub fn min_entries(&self) -> usize {
        ((self.max_entries as f64 * self.min_fill_factor).floor() as usize).max(1)
    }

    /// `p`, the number of entries removed from an overflowing node for reinsertion
    pub fn reinsert_count(&self) -> usize {
        let p = (self.reinsert_fraction * self.max_entries as f64).round() as usize;
        let upper = self.max_entries + 1 - self.min_entries();
        p.clamp(1, upper)
    }

    /// Largest absolute coordinate a point in the tree may have
    ///
    /// Areas, overlaps and squared distances of boxes within this range, and their sums
    /// over the entries of a node, stay finite.
    pub fn coordinate_limit(&self) -> f64 {
        let headroom = f64::MAX / (1u64 << 20) as f64 / self.dimensions.max(1) as f64;
        0.5 * headroom.powf(1.0 / self.dimensions.max(2) as f64)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.dimensions > 0,
            PreconditionViolationSnafu {
                description: "dimensions must be greater than 0".to_string(),
            }
        );
        ensure!(
            self.dimensions <= u16::MAX as usize,
            PreconditionViolationSnafu {
                description: format!("dimensions must not exceed {}", u16::MAX),
            }
        );
        ensure!(
            self.max_entries >= 2 && self.max_entries < u16::MAX as usize,
            PreconditionViolationSnafu {
                description: format!(
                    "max_entries must be in [2, {}), but was {}",
                    u16::MAX,
                    self.max_entries
                ),
            }
        );
        ensure!(
            self.min_fill_factor > 0.0 && self.min_fill_factor <= 0.5,
            PreconditionViolationSnafu {
                description: format!(
                    "min_fill_factor must be in (0, 0.5], but was {}",
                    self.min_fill_factor
                ),
            }
        );
        ensure!(
            (0.0..1.0).contains(&self.reinsert_fraction),
            PreconditionViolationSnafu {
                description: format!(
                    "reinsert_fraction must be in [0, 1), but was {}",
                    self.reinsert_fraction
                ),
            }
        );
        Ok(())
    }
}

/// Where and how the on-disk index and data files are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub index_file: PathBuf,
    pub data_file: PathBuf,
    /// Number of nodes kept in the LRU cache of the on-disk node store
    pub node_cache_size: usize,
    /// Size of a data file block in bytes
    pub block_size: usize,
    pub tree: TreeParameters,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            index_file: PathBuf::from("indexfile.dat"),
            data_file: PathBuf::from("datafile.dat"),
            node_cache_size: DEFAULT_NODE_CACHE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            tree: TreeParameters::default(),
        }
    }
}

impl IndexConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents).context(ConfigSnafu { path })?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given, otherwise falls back to the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.tree.validate()?;
        ensure!(
            self.block_size >= 64 && self.block_size <= u32::MAX as usize,
            PreconditionViolationSnafu {
                description: format!(
                    "block_size must be in [64, {}], but was {}",
                    u32::MAX,
                    self.block_size
                ),
            }
        );
        ensure!(
            self.index_file != self.data_file,
            PreconditionViolationSnafu {
                description: "index_file and data_file must differ".to_string(),
            }
        );
        Ok(())
    }
}
