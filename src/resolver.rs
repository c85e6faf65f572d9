//! Working out which reference-catalog shards a set of images needs.
//!
//! For each file we pick the detector HDUs to consider, circumscribe each one's
//! padded footprint with a cap, and ask the indexer which cells that cap
//! touches. Results are unioned across detectors and files, so input order and
//! duplicate inputs don't matter.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    detectors::{DetectorRef, DetectorTable},
    error::{Error, Result},
    fitsfile::{FitsFile, Hdu},
    geometry::Footprint,
    index::{ShardId, ShardIndexer},
};

/// Expand the user's path argument: a file stands for itself, and a directory
/// for every FITS file directly inside it, in name order.
pub fn collect_input_files<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let meta = fs::metadata(path).map_err(Error::io(path))?;

    if !meta.is_dir() {
        return Ok(vec![path.to_owned()]);
    }

    let mut files = Vec::new();

    for entry in fs::read_dir(path).map_err(Error::io(path))? {
        let entry = entry.map_err(Error::io(path))?;
        let is_fits = entry.file_name().to_string_lossy().contains(".fits");

        if is_fits && entry.path().is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    debug!(dir = %path.display(), n = files.len(), "collected input files");
    Ok(files)
}

/// The HDUs of `fits` to compute footprints for.
pub fn select_hdus<'a>(
    fits: &'a FitsFile,
    table: &DetectorTable,
    detectors: Option<&[DetectorRef]>,
) -> Result<Vec<&'a Hdu>> {
    let Some(detectors) = detectors else {
        return Ok(fits.image_hdus());
    };

    let mut hdus = Vec::with_capacity(detectors.len());

    for detector in detectors {
        let entry = table.resolve(detector, fits.name())?;
        let hdu = entry
            .hdu
            .and_then(|index| fits.hdu(index))
            .filter(|hdu| hdu.is_image())
            .ok_or_else(|| Error::InvalidDetector {
                source_name: fits.name().to_owned(),
                detector: detector.to_string(),
            })?;
        hdus.push(hdu);
    }

    Ok(hdus)
}

/// The shards overlapping the selected detectors of one opened file.
pub fn resolve_shards_for_fits(
    fits: &FitsFile,
    indexer: &dyn ShardIndexer,
    margin: f64,
    detectors: Option<&[DetectorRef]>,
) -> Result<BTreeSet<ShardId>> {
    let table = DetectorTable::from_fits(fits);
    let mut shards = BTreeSet::new();

    for hdu in select_hdus(fits, &table, detectors)? {
        let cap = Footprint::from_hdu(hdu)
            .and_then(|fp| fp.cap(margin))
            .map_err(|e| e.in_hdu(fits.name(), hdu.index()))?;
        let found = indexer.shards_for_cap(&cap);

        debug!(
            file = fits.name(),
            hdu = hdu.index(),
            ra = cap.center.ra_deg,
            dec = cap.center.dec_deg,
            radius = cap.radius_deg,
            n = found.len(),
            "resolved footprint"
        );

        shards.extend(found);
    }

    Ok(shards)
}

/// The shards overlapping every file in `files`.
pub fn resolve_shards_for_files<P: AsRef<Path>>(
    files: &[P],
    indexer: &dyn ShardIndexer,
    margin: f64,
    detectors: Option<&[DetectorRef]>,
) -> Result<BTreeSet<ShardId>> {
    let mut shards = BTreeSet::new();

    for path in files {
        let fits = FitsFile::open(path)?;
        shards.extend(resolve_shards_for_fits(&fits, indexer, margin, detectors)?);
    }

    info!(
        files = files.len(),
        indexer = %indexer.name(),
        n = shards.len(),
        "resolved shards"
    );
    Ok(shards)
}

/// A configured resolution: an indexing scheme, a margin, and optionally a
/// set of detectors.
pub struct ShardResolver {
    indexer: Box<dyn ShardIndexer>,
    margin: f64,
    detectors: Option<Vec<DetectorRef>>,
}

impl ShardResolver {
    pub fn new(indexer: Box<dyn ShardIndexer>, margin: f64) -> Self {
        ShardResolver {
            indexer,
            margin,
            detectors: None,
        }
    }

    pub fn with_detectors(mut self, detectors: Vec<DetectorRef>) -> Self {
        self.detectors = Some(detectors);
        self
    }

    pub fn indexer(&self) -> &dyn ShardIndexer {
        self.indexer.as_ref()
    }

    pub fn resolve_file<P: AsRef<Path>>(&self, path: P) -> Result<BTreeSet<ShardId>> {
        self.resolve_files(&[path])
    }

    pub fn resolve_files<P: AsRef<Path>>(&self, files: &[P]) -> Result<BTreeSet<ShardId>> {
        resolve_shards_for_files(
            files,
            self.indexer.as_ref(),
            self.margin,
            self.detectors.as_deref(),
        )
    }
}
