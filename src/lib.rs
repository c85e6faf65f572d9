//! Tools for building small astronomical test-data fixtures
//!
//! Two jobs live here. The first is working out which shards of a sharded
//! reference catalog overlap a set of images, so that a test repository only
//! needs to carry those shards. The second is trimming a calibration export
//! down to the detectors and filters a test actually uses, without leaving
//! associations pointing at datasets that are gone.
//!
//! Both jobs are driven from small command-line programs:
//! `refcat-shard-resolver` and `trim-export`. Everything is synchronous and
//! local; inputs are read once, and outputs are written once.

use tracing_subscriber::{fmt, EnvFilter};

pub mod config;
pub mod detectors;
pub mod error;
pub mod export;
pub mod fitsfile;
pub mod geometry;
pub mod index;
pub mod refcat;
pub mod resolver;
pub mod wcs;

#[cfg(test)]
mod testutil;

pub use config::{IndexerConfig, ResolverConfig};
pub use detectors::{parse_detector_list, DetectorRef, DetectorSelection, DetectorTable};
pub use error::{Error, Result};
pub use export::{trim_export, trim_refcat_export, ExportDocument};
pub use geometry::{compute_cap, Box2D, Footprint, SkyPoint, SphericalCap};
pub use index::{ShardId, ShardIndexer};
pub use refcat::ShardCatalog;
pub use resolver::{collect_input_files, resolve_shards_for_files, ShardResolver};

/// Set up logging to stderr. `RUST_LOG` wins if it's set; otherwise we log at
/// INFO, or DEBUG if `verbose`.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    // A second initialization (e.g. in tests) is harmless, so we ignore it.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time()
        .with_writer(std::io::stderr)
        .try_init();
}
