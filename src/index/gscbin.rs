//! The GSC sky binning.
//!
//! The sky is cut into declination strips of fixed height, and each strip into
//! as many RA bins as make them roughly square at the strip's middle. Bins are
//! numbered consecutively from the south pole, and that "total" bin number is
//! the shard id. We support the 1° and 1/64° binnings.

use once_cell::sync::Lazy;
use std::collections::BTreeSet;

use super::{ShardId, ShardIndexer};
use crate::{
    geometry::{SkyPoint, SphericalCap},
    wcs::D2R,
};

static BIN1: Lazy<GscBinning> = Lazy::new(|| GscBinning::new_generic(1.0, 180));
static BIN64: Lazy<GscBinning> = Lazy::new(|| GscBinning::new_generic(0.015625, 11520));

#[derive(Debug)]
pub struct GscBinning {
    bin_size: f64,
    dec_bins: usize,
    total_bins: usize,
    master_index: Vec<GscBinIndex>,
}

#[derive(Debug)]
struct GscBinIndex {
    start_bin: usize,
    num_bins: usize,
}

impl GscBinning {
    /// The 1° binning: 180 declination strips, 41164 bins in all.
    pub fn new1() -> &'static Self {
        &BIN1
    }

    /// The 1/64° binning: 11520 declination strips, 168966386 bins in all.
    pub fn new64() -> &'static Self {
        &BIN64
    }

    fn new_generic(bin_size: f64, dec_bins: usize) -> Self {
        let mut master_index = Vec::with_capacity(dec_bins);
        let mut ra_sum = 0;

        for i_bin in 0..dec_bins {
            let declination = i_bin as f64 * bin_size - 90.0;
            let num_ra_bins =
                (360. / bin_size * f64::cos((declination + bin_size / 2.) * D2R)) as usize;

            master_index.push(GscBinIndex {
                start_bin: ra_sum,
                // Strips that touch the poles still need somewhere to put
                // their sources.
                num_bins: usize::max(num_ra_bins, 1),
            });

            ra_sum += num_ra_bins;
        }

        GscBinning {
            bin_size,
            dec_bins,
            total_bins: ra_sum,
            master_index,
        }
    }

    pub fn total_bins(&self) -> usize {
        self.total_bins
    }

    /// Given a declination in degrees, get the declination bin number for this
    /// binning. The result is between 0 and `dec_bins`; out-of-range inputs
    /// are clamped to the poles.
    pub fn get_dec_bin(&self, dec: f64) -> usize {
        let bin = ((dec.clamp(-90., 90.) + 90.) / self.bin_size) as usize;
        usize::min(bin, self.dec_bins - 1)
    }

    /// Offset of `ra_deg` within the strip, without wrapping; `ra_deg` is
    /// expected in [0, 360].
    fn ra_offset(&self, dec_bin: usize, ra_deg: f64) -> usize {
        let num_bins = self.master_index[dec_bin].num_bins;
        let delta_bin = (ra_deg.max(0.) * num_bins as f64 / 360.) as usize;
        usize::min(delta_bin, num_bins - 1)
    }

    /// Given a declination bin number (between 0 and `dec_bins`) and an RA in
    /// degrees, get the "total" bin number associated with the RA. The result
    /// is between 0 and `total_bins`.
    pub fn get_total_bin(&self, dec_bin: usize, ra_deg: f64) -> usize {
        self.master_index[dec_bin].start_bin + self.ra_offset(dec_bin, ra_deg.rem_euclid(360.))
    }

    /// The total bins of one declination strip that cover `[ra_min, ra_max]`,
    /// with `0 <= ra_min <= ra_max <= 360`.
    fn ra_range(&self, dec_bin: usize, ra_min: f64, ra_max: f64) -> std::ops::RangeInclusive<usize> {
        let start = self.master_index[dec_bin].start_bin;
        start + self.ra_offset(dec_bin, ra_min)..=start + self.ra_offset(dec_bin, ra_max)
    }
}

/// A [`ShardIndexer`] over one of the GSC binnings.
#[derive(Clone, Copy, Debug)]
pub struct GscIndexer {
    binning: &'static GscBinning,
    per_degree: u32,
}

impl GscIndexer {
    pub fn new1() -> Self {
        GscIndexer {
            binning: GscBinning::new1(),
            per_degree: 1,
        }
    }

    pub fn new64() -> Self {
        GscIndexer {
            binning: GscBinning::new64(),
            per_degree: 64,
        }
    }

    pub fn binning(&self) -> &'static GscBinning {
        self.binning
    }
}

impl ShardIndexer for GscIndexer {
    fn name(&self) -> String {
        format!("GSC{}", self.per_degree)
    }

    fn dimension(&self) -> String {
        format!("gsc_bin{}", self.per_degree)
    }

    fn shard_for_point(&self, point: &SkyPoint) -> ShardId {
        let dec_bin = self.binning.get_dec_bin(point.dec_deg);
        self.binning.get_total_bin(dec_bin, point.ra_deg) as ShardId
    }

    fn shards_for_cap(&self, cap: &SphericalCap) -> BTreeSet<ShardId> {
        let binning = self.binning;
        let radius_deg = cap.radius_deg.max(0.);
        let ra_deg = cap.center.ra_deg.rem_euclid(360.);
        let min_dec = f64::max(cap.center.dec_deg - radius_deg, -90.0);
        let max_dec = f64::min(cap.center.dec_deg + radius_deg, 90.0);
        let bin0 = binning.get_dec_bin(min_dec);
        let bin1 = binning.get_dec_bin(max_dec);

        let cos_dec = f64::min(f64::cos(min_dec * D2R), f64::cos(max_dec * D2R));

        let (ra_bound_1, ra_bound_2) = if cos_dec <= 0. {
            ((0., 360.0), None)
        } else {
            let search_radius_ra = radius_deg / cos_dec;
            let min_ra = ra_deg - search_radius_ra;
            let max_ra = ra_deg + search_radius_ra;

            if min_ra <= 0. && max_ra >= 360. {
                // We cover all RA's, which might happen with a reasonable
                // radius if we're right at the poles.
                ((0., 360.0), None)
            } else if min_ra < 0. {
                // Break the search into two RA chunks:
                // (0, naive-max) and (wrapped-naive-min, 360)
                ((0., max_ra), Some((min_ra + 360., 360.)))
            } else if max_ra > 360. {
                ((min_ra, 360.), Some((0., max_ra - 360.)))
            } else {
                ((min_ra, max_ra), None)
            }
        };

        let mut found = BTreeSet::new();

        for ibin in bin0..=bin1 {
            found.extend(binning.ra_range(ibin, ra_bound_1.0, ra_bound_1.1).map(|b| b as ShardId));

            if let Some(b2) = ra_bound_2 {
                found.extend(binning.ra_range(ibin, b2.0, b2.1).map(|b| b as ShardId));
            }
        }

        found
    }
}
