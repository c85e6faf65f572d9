//! Sky partitioning schemes used to shard reference catalogs.
//!
//! A reference catalog is split into files by cell of some fixed tiling of the
//! sphere. Given a region of the sky, an indexer tells us which cells (and
//! hence which shard files) we need.

use std::collections::BTreeSet;

use crate::geometry::{SkyPoint, SphericalCap};

pub mod gscbin;
pub mod htm;

pub use gscbin::GscIndexer;
pub use htm::HtmIndexer;

/// Opaque identifier of one cell of a sky partitioning.
pub type ShardId = u64;

pub trait ShardIndexer {
    /// Human-readable name of the scheme, e.g. `HTM7`.
    fn name(&self) -> String;

    /// The name by which catalog exports key their shards, e.g. `htm7`.
    fn dimension(&self) -> String;

    /// The cell containing `point`.
    fn shard_for_point(&self, point: &SkyPoint) -> ShardId;

    /// Every cell that intersects `cap`. This may over-cover but never
    /// under-covers.
    fn shards_for_cap(&self, cap: &SphericalCap) -> BTreeSet<ShardId>;
}
