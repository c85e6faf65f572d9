//! Settings for shard resolution.

use std::{fmt, path::PathBuf, str::FromStr};

use crate::{
    error::{Error, Result},
    index::{htm, GscIndexer, HtmIndexer, ShardIndexer},
    refcat::ShardCatalog,
    resolver::ShardResolver,
};

pub const DEFAULT_REFCAT: &str = "ps1_pv3_3pi_20170110";

/// Footprints are padded by this many pixels on every side, to catch sources
/// whose positions are a little off.
pub const DEFAULT_PIXEL_MARGIN: f64 = 300.;

/// A sky-partitioning scheme, as named on the command line: `HTM` (depth 7),
/// `HTM<depth>`, `GSC1`, or `GSC64` (also just `GSC`). Case doesn't matter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexerConfig {
    Htm { depth: u32 },
    Gsc1,
    Gsc64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig::Htm {
            depth: htm::DEFAULT_DEPTH,
        }
    }
}

impl FromStr for IndexerConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();

        let config = match upper.as_str() {
            "HTM" => IndexerConfig::default(),
            "GSC" | "GSC64" => IndexerConfig::Gsc64,
            "GSC1" => IndexerConfig::Gsc1,
            other => {
                let depth = other
                    .strip_prefix("HTM")
                    .and_then(|d| d.parse::<u32>().ok())
                    .filter(|d| *d <= htm::MAX_DEPTH)
                    .ok_or_else(|| Error::UnknownIndexer(s.to_owned()))?;
                IndexerConfig::Htm { depth }
            }
        };

        Ok(config)
    }
}

impl fmt::Display for IndexerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerConfig::Htm { depth } => write!(f, "HTM{depth}"),
            IndexerConfig::Gsc1 => f.write_str("GSC1"),
            IndexerConfig::Gsc64 => f.write_str("GSC64"),
        }
    }
}

impl IndexerConfig {
    pub fn build(&self) -> Result<Box<dyn ShardIndexer>> {
        Ok(match self {
            IndexerConfig::Htm { depth } => Box::new(HtmIndexer::new(*depth)?),
            IndexerConfig::Gsc1 => Box::new(GscIndexer::new1()),
            IndexerConfig::Gsc64 => Box::new(GscIndexer::new64()),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub refcat: String,
    pub refcat_root: Option<PathBuf>,
    pub indexer: IndexerConfig,
    pub pixel_margin: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            refcat: DEFAULT_REFCAT.to_owned(),
            refcat_root: None,
            indexer: IndexerConfig::default(),
            pixel_margin: DEFAULT_PIXEL_MARGIN,
        }
    }
}

impl ResolverConfig {
    pub fn catalog(&self) -> ShardCatalog {
        ShardCatalog::new(self.refcat.clone(), self.refcat_root.clone())
    }

    pub fn resolver(&self) -> Result<ShardResolver> {
        Ok(ShardResolver::new(self.indexer.build()?, self.pixel_margin))
    }
}
