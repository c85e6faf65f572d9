//! Celestial world-coordinate transforms.
//!
//! We implement the zenithal projections (Calabretta & Greisen 2002, §5.1),
//! which are what image headers use in practice. Distortion conventions layered
//! on top of them (a `-SIP` suffix, or the `TPV`, `TNX` and `ZPX` codes that
//! DECam and NOAO pipelines write) are accepted, but we map through the linear
//! TAN part only. The shard resolver pads footprints by hundreds of pixels,
//! which swamps the few-pixel corrections those terms make.
//!
//! Pixel coordinates in this API are 0-based, unlike FITS.

use ndarray::{array, Array1, Array2, ArrayView2, Axis};
use tracing::debug;

use crate::{
    error::{Error, Result},
    fitsfile::Header,
};

/// Degree-to-radian conversion factor
pub const D2R: f64 = std::f64::consts::PI / 180.;

const HALF_PI: f64 = std::f64::consts::FRAC_PI_2;
const DETERMINANT_THRESHOLD: f64 = 1e-30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Gnomonic
    Tan,
    /// Slant orthographic, without the slant terms
    Sin,
    /// Zenithal equidistant
    Arc,
    /// Stereographic
    Stg,
    /// Zenithal equal-area
    Zea,
}

impl Projection {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "TAN" => Some(Projection::Tan),
            "SIN" => Some(Projection::Sin),
            "ARC" => Some(Projection::Arc),
            "STG" => Some(Projection::Stg),
            "ZEA" => Some(Projection::Zea),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Projection::Tan => "TAN",
            Projection::Sin => "SIN",
            Projection::Arc => "ARC",
            Projection::Stg => "STG",
            Projection::Zea => "ZEA",
        }
    }

    /// Native latitude for a radial distance `r` (radians) in the plane of
    /// projection, or `None` if `r` lies outside the projection's boundary.
    fn theta_from_radius(self, r: f64) -> Option<f64> {
        match self {
            Projection::Tan => Some(1f64.atan2(r)),
            Projection::Sin => (r <= 1.).then(|| r.acos()),
            Projection::Arc => (r <= std::f64::consts::PI).then(|| HALF_PI - r),
            Projection::Stg => Some(HALF_PI - 2. * (r / 2.).atan()),
            Projection::Zea => (r <= 2.).then(|| HALF_PI - 2. * (r / 2.).asin()),
        }
    }

    /// Radial distance (radians) in the plane of projection for a native
    /// latitude, or `None` where the projection diverges or folds over.
    fn radius_from_theta(self, theta: f64) -> Option<f64> {
        let (sin_t, cos_t) = theta.sin_cos();

        match self {
            Projection::Tan => (sin_t > 0.).then(|| cos_t / sin_t),
            Projection::Sin => (sin_t >= 0.).then_some(cos_t),
            Projection::Arc => Some(HALF_PI - theta),
            Projection::Stg => (sin_t > -1.).then(|| 2. * cos_t / (1. + sin_t)),
            Projection::Zea => Some((2. * (1. - sin_t)).max(0.).sqrt()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Wcs {
    projection: Projection,

    /// Reference pixel, 1-based as in the header.
    crpix: Array1<f64>,

    /// Linear transformation, degrees per pixel.
    cd: Array2<f64>,
    cd_inv: Array2<f64>,

    /// Which intermediate axis (0 or 1) carries longitude.
    lng_axis: usize,

    /// Celestial coordinates of the native pole and the native longitude of
    /// the celestial pole, in radians.
    alpha_p: f64,
    delta_p: f64,
    phi_p: f64,
}

fn split_ctype(ctype: &str) -> (&str, &str, &str) {
    // e.g. "RA---TAN-SIP" => ("RA", "TAN", "-SIP")
    let axis = ctype.get(..4).unwrap_or(ctype).trim_end_matches('-');
    let proj = ctype.get(5..8).unwrap_or("");
    let suffix = ctype.get(8..).unwrap_or("");
    (axis, proj, suffix)
}

fn is_longitude(axis: &str) -> bool {
    axis == "RA" || (axis.len() == 4 && axis.ends_with("LON"))
}

fn is_latitude(axis: &str) -> bool {
    axis == "DEC" || (axis.len() == 4 && axis.ends_with("LAT"))
}

impl Wcs {
    /// Initialize WCS from FITS headers. Only the primary (unlettered)
    /// solution is considered.
    pub fn from_header(header: &Header) -> Result<Self> {
        let ctype1 = header
            .get_str("CTYPE1")
            .ok_or_else(|| Error::InvalidGeometry("no CTYPE1 keyword; header has no WCS".into()))?;
        let ctype2 = header
            .get_str("CTYPE2")
            .ok_or_else(|| Error::InvalidGeometry("no CTYPE2 keyword; header has no WCS".into()))?;

        let (axis1, proj1, suffix1) = split_ctype(ctype1);
        let (axis2, proj2, suffix2) = split_ctype(ctype2);

        let lng_axis = if is_longitude(axis1) && is_latitude(axis2) {
            0
        } else if is_latitude(axis1) && is_longitude(axis2) {
            1
        } else {
            return Err(Error::InvalidGeometry(format!(
                "CTYPE1/CTYPE2 `{ctype1}`/`{ctype2}` are not a celestial axis pair"
            )));
        };

        if proj1 != proj2 {
            return Err(Error::InvalidGeometry(format!(
                "mismatched projections `{ctype1}` and `{ctype2}`"
            )));
        }

        // TPV, TNX and ZPX carry polynomial distortion on top of a zenithal
        // base; we keep only the linear TAN part.
        let (projection, distorted) = match proj1 {
            "TPV" | "TNX" | "ZPX" => (Projection::Tan, true),
            code => {
                let projection = Projection::from_code(code).ok_or_else(|| {
                    Error::InvalidGeometry(format!(
                        "unsupported projection `{proj1}` in `{ctype1}`"
                    ))
                })?;
                (projection, false)
            }
        };

        if distorted || !suffix1.is_empty() || !suffix2.is_empty() {
            debug!(ctype1, ctype2, "ignoring distortion terms; using the linear solution");
        }

        let f = |key: &str, default: f64| header.get_f64(key).unwrap_or(default);
        let crpix = [f("CRPIX1", 0.), f("CRPIX2", 0.)];
        let crval = [f("CRVAL1", 0.), f("CRVAL2", 0.)];
        let cdelt = [f("CDELT1", 1.), f("CDELT2", 1.)];

        let has = |keys: &[&str]| keys.iter().any(|k| header.contains(k));

        let cd = if has(&["CD1_1", "CD1_2", "CD2_1", "CD2_2"]) {
            array![
                [f("CD1_1", 0.), f("CD1_2", 0.)],
                [f("CD2_1", 0.), f("CD2_2", 0.)]
            ]
        } else if has(&["PC1_1", "PC1_2", "PC2_1", "PC2_2"]) {
            array![
                [cdelt[0] * f("PC1_1", 1.), cdelt[0] * f("PC1_2", 0.)],
                [cdelt[1] * f("PC2_1", 0.), cdelt[1] * f("PC2_2", 1.)]
            ]
        } else {
            let (sin_r, cos_r) = (f("CROTA2", 0.) * D2R).sin_cos();
            array![
                [cdelt[0] * cos_r, -cdelt[1] * sin_r],
                [cdelt[0] * sin_r, cdelt[1] * cos_r]
            ]
        };

        Self::new(
            projection,
            [crval[lng_axis], crval[1 - lng_axis]],
            crpix,
            cd,
            lng_axis,
            header.get_f64("LONPOLE"),
        )
    }

    /// A plain TAN projection with square pixels, east to the left.
    pub fn new_tan(crval1: f64, crval2: f64, crpix1: f64, crpix2: f64, cd22: f64) -> Result<Self> {
        Self::new(
            Projection::Tan,
            [crval1, crval2],
            [crpix1, crpix2],
            array![[-cd22, 0.], [0., cd22]],
            0,
            None,
        )
    }

    fn new(
        projection: Projection,
        lng_lat: [f64; 2],
        crpix: [f64; 2],
        cd: Array2<f64>,
        lng_axis: usize,
        lonpole: Option<f64>,
    ) -> Result<Self> {
        let det = cd[(0, 0)] * cd[(1, 1)] - cd[(0, 1)] * cd[(1, 0)];

        if !(det.abs() > DETERMINANT_THRESHOLD) {
            return Err(Error::InvalidGeometry(format!(
                "linear transformation matrix is singular (determinant {det:e})"
            )));
        }

        let cd_inv = array![
            [cd[(1, 1)] / det, -cd[(0, 1)] / det],
            [-cd[(1, 0)] / det, cd[(0, 0)] / det]
        ];

        // For zenithal projections the reference point is the native pole, so
        // the celestial coordinates of the native pole are just CRVAL. The
        // default LONPOLE is 180° unless the reference point is the celestial
        // pole itself.
        let (lng0, lat0) = (lng_lat[0], lng_lat[1]);

        if !(-90. ..=90.).contains(&lat0) {
            return Err(Error::InvalidGeometry(format!(
                "reference latitude {lat0} out of range"
            )));
        }

        let phi_p = lonpole.unwrap_or(if lat0 >= 90. { 0. } else { 180. });

        Ok(Wcs {
            projection,
            crpix: Array1::from(crpix.to_vec()),
            cd,
            cd_inv,
            lng_axis,
            alpha_p: lng0 * D2R,
            delta_p: lat0 * D2R,
            phi_p: phi_p * D2R,
        })
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Convert 0-based pixel coordinates to (RA, Dec) in degrees, with RA in
    /// [0, 360).
    pub fn pixel_to_world_scalar(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let offset = array![x + 1., y + 1.] - &self.crpix;
        let inter = self.cd.dot(&offset);
        let (ix, iy) = (inter[self.lng_axis], inter[1 - self.lng_axis]);

        let r = (ix * ix + iy * iy).sqrt() * D2R;
        let phi = if r == 0. { 0. } else { ix.atan2(-iy) };

        let theta = self
            .projection
            .theta_from_radius(r)
            .filter(|t| t.is_finite())
            .ok_or_else(|| {
                Error::InvalidGeometry(format!(
                    "pixel ({x}, {y}) falls outside the {} projection boundary",
                    self.projection.code()
                ))
            })?;

        // Native spherical to celestial (Calabretta & Greisen 2002, eq. 2)
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_dp, cos_dp) = self.delta_p.sin_cos();
        let (sin_dphi, cos_dphi) = (phi - self.phi_p).sin_cos();

        let sin_dec = (sin_t * sin_dp + cos_t * cos_dp * cos_dphi).clamp(-1., 1.);
        let ra = self.alpha_p + (-cos_t * sin_dphi).atan2(sin_t * cos_dp - cos_t * sin_dp * cos_dphi);

        let ra_deg = (ra / D2R).rem_euclid(360.);
        let dec_deg = sin_dec.asin() / D2R;

        if !(ra_deg.is_finite() && dec_deg.is_finite()) {
            return Err(Error::InvalidGeometry(format!(
                "pixel ({x}, {y}) did not map to finite sky coordinates"
            )));
        }

        Ok((ra_deg, dec_deg))
    }

    /// Convert (RA, Dec) in degrees to 0-based pixel coordinates.
    pub fn world_to_pixel_scalar(&self, ra_deg: f64, dec_deg: f64) -> Result<(f64, f64)> {
        let (sin_d, cos_d) = (dec_deg * D2R).sin_cos();
        let (sin_dp, cos_dp) = self.delta_p.sin_cos();
        let (sin_da, cos_da) = (ra_deg * D2R - self.alpha_p).sin_cos();

        let phi = self.phi_p + (-cos_d * sin_da).atan2(sin_d * cos_dp - cos_d * sin_dp * cos_da);
        let theta = (sin_d * sin_dp + cos_d * cos_dp * cos_da).clamp(-1., 1.).asin();

        let r = self.projection.radius_from_theta(theta).ok_or_else(|| {
            Error::InvalidGeometry(format!(
                "({ra_deg}, {dec_deg}) cannot be represented in the {} projection",
                self.projection.code()
            ))
        })? / D2R;

        let (ix, iy) = (r * phi.sin(), -r * phi.cos());
        let mut inter = Array1::<f64>::zeros(2);
        inter[self.lng_axis] = ix;
        inter[1 - self.lng_axis] = iy;

        let pixel = self.cd_inv.dot(&inter) + &self.crpix - 1.;
        Ok((pixel[0], pixel[1]))
    }

    /// Map an N×2 array of 0-based (x, y) pixel positions to an N×2 array of
    /// (RA, Dec) in degrees. Fails on the first point that doesn't map.
    pub fn sample_world(&self, pixels: ArrayView2<f64>) -> Result<Array2<f64>> {
        if pixels.ncols() != 2 {
            return Err(Error::InvalidGeometry(format!(
                "expected N×2 pixel coordinates, got {} columns",
                pixels.ncols()
            )));
        }

        let mut world = Array2::zeros(pixels.raw_dim());

        for (pix, mut out) in pixels.axis_iter(Axis(0)).zip(world.axis_iter_mut(Axis(0))) {
            let (ra, dec) = self.pixel_to_world_scalar(pix[0], pix[1])?;
            out[0] = ra;
            out[1] = dec;
        }

        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitsfile::HeaderValue;
    use approx::assert_abs_diff_eq;

    fn header(cards: &[(&str, HeaderValue)]) -> Header {
        let mut h = Header::default();
        for (k, v) in cards {
            h.push(*k, v.clone());
        }
        h
    }

    fn s(v: &str) -> HeaderValue {
        HeaderValue::String(v.to_owned())
    }

    fn r(v: f64) -> HeaderValue {
        HeaderValue::Real(v)
    }

    #[test]
    fn reference_pixel_maps_to_reference_value() {
        let wcs = Wcs::new_tan(150.0, 2.2, 1024.5, 2048.5, 0.27 / 3600.).unwrap();
        let (ra, dec) = wcs.pixel_to_world_scalar(1023.5, 2047.5).unwrap();
        assert_abs_diff_eq!(ra, 150.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dec, 2.2, epsilon = 1e-12);
    }

    #[test]
    fn east_is_left() {
        let wcs = Wcs::new_tan(10.0, 0.0, 1., 1., 1. / 3600.).unwrap();
        let (ra_right, _) = wcs.pixel_to_world_scalar(100., 0.).unwrap();
        let (_, dec_up) = wcs.pixel_to_world_scalar(0., 100.).unwrap();
        assert!(ra_right < 10.0);
        assert!(dec_up > 0.0);
        assert_abs_diff_eq!(ra_right, 10.0 - 100. / 3600., epsilon = 1e-8);
    }

    #[test]
    fn round_trips_through_every_projection() {
        for code in ["TAN", "SIN", "ARC", "STG", "ZEA"] {
            let h = header(&[
                ("CTYPE1", s(&format!("RA---{code}"))),
                ("CTYPE2", s(&format!("DEC--{code}"))),
                ("CRVAL1", r(359.9)),
                ("CRVAL2", r(-30.0)),
                ("CRPIX1", r(100.0)),
                ("CRPIX2", r(200.0)),
                ("CD1_1", r(-1e-3)),
                ("CD1_2", r(2e-5)),
                ("CD2_1", r(-3e-5)),
                ("CD2_2", r(1e-3)),
            ]);
            let wcs = Wcs::from_header(&h).unwrap();
            assert_eq!(wcs.projection().code(), code);

            for &(x, y) in &[(0., 0.), (512., 17.), (-300., 900.)] {
                let (ra, dec) = wcs.pixel_to_world_scalar(x, y).unwrap();
                assert!((0. ..360.).contains(&ra));
                let (px, py) = wcs.world_to_pixel_scalar(ra, dec).unwrap();
                assert_abs_diff_eq!(px, x, epsilon = 1e-6);
                assert_abs_diff_eq!(py, y, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn pc_cdelt_and_crota_agree_with_cd() {
        let base = [
            ("CTYPE1", s("RA---TAN")),
            ("CTYPE2", s("DEC--TAN")),
            ("CRVAL1", r(45.0)),
            ("CRVAL2", r(60.0)),
            ("CRPIX1", r(10.0)),
            ("CRPIX2", r(10.0)),
        ];

        let mut cd = base.to_vec();
        cd.extend([
            ("CD1_1", r(-2e-4)),
            ("CD1_2", r(0.)),
            ("CD2_1", r(0.)),
            ("CD2_2", r(2e-4)),
        ]);

        let mut pc = base.to_vec();
        pc.extend([
            ("CDELT1", r(-2e-4)),
            ("CDELT2", r(2e-4)),
            ("PC1_1", r(1.)),
            ("PC2_2", r(1.)),
        ]);

        let mut crota = base.to_vec();
        crota.extend([("CDELT1", r(-2e-4)), ("CDELT2", r(2e-4)), ("CROTA2", r(0.))]);

        let expected = Wcs::from_header(&header(&cd))
            .unwrap()
            .pixel_to_world_scalar(300., -40.)
            .unwrap();

        for cards in [pc, crota] {
            let got = Wcs::from_header(&header(&cards))
                .unwrap()
                .pixel_to_world_scalar(300., -40.)
                .unwrap();
            assert_abs_diff_eq!(got.0, expected.0, epsilon = 1e-12);
            assert_abs_diff_eq!(got.1, expected.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn swapped_axes_are_handled() {
        let normal = header(&[
            ("CTYPE1", s("RA---TAN")),
            ("CTYPE2", s("DEC--TAN")),
            ("CRVAL1", r(120.0)),
            ("CRVAL2", r(-5.0)),
            ("CD1_1", r(-1e-3)),
            ("CD2_2", r(1e-3)),
        ]);
        let swapped = header(&[
            ("CTYPE1", s("DEC--TAN")),
            ("CTYPE2", s("RA---TAN")),
            ("CRVAL1", r(-5.0)),
            ("CRVAL2", r(120.0)),
            ("CD1_2", r(1e-3)),
            ("CD2_1", r(-1e-3)),
        ]);

        let a = Wcs::from_header(&normal).unwrap().pixel_to_world_scalar(40., 70.).unwrap();
        let b = Wcs::from_header(&swapped).unwrap().pixel_to_world_scalar(40., 70.).unwrap();
        assert_abs_diff_eq!(a.0, b.0, epsilon = 1e-10);
        assert_abs_diff_eq!(a.1, b.1, epsilon = 1e-10);
    }

    #[test]
    fn distortion_is_ignored() {
        let h = header(&[
            ("CTYPE1", s("RA---TPV")),
            ("CTYPE2", s("DEC--TPV")),
            ("CD1_1", r(-1e-3)),
            ("CD2_2", r(1e-3)),
        ]);
        let tpv = Wcs::from_header(&h).unwrap();
        assert_eq!(tpv.projection(), Projection::Tan);

        let tan = Wcs::new_tan(0., 0., 0., 0., 1e-3).unwrap();
        let a = tpv.pixel_to_world_scalar(30., -20.).unwrap();
        let b = tan.pixel_to_world_scalar(30., -20.).unwrap();
        assert_abs_diff_eq!(a.0, b.0, epsilon = 1e-10);
        assert_abs_diff_eq!(a.1, b.1, epsilon = 1e-10);

        for code in ["TNX", "ZPX"] {
            let h = header(&[
                ("CTYPE1", s(&format!("RA---{code}"))),
                ("CTYPE2", s(&format!("DEC--{code}"))),
                ("CD1_1", r(-1e-3)),
                ("CD2_2", r(1e-3)),
            ]);
            assert_eq!(Wcs::from_header(&h).unwrap().projection(), Projection::Tan);
        }

        let h = header(&[
            ("CTYPE1", s("RA---TAN-SIP")),
            ("CTYPE2", s("DEC--TAN-SIP")),
            ("CD1_1", r(-1e-3)),
            ("CD2_2", r(1e-3)),
        ]);
        assert_eq!(Wcs::from_header(&h).unwrap().projection(), Projection::Tan);
    }

    #[test]
    fn malformed_headers_are_geometry_errors() {
        let no_wcs = header(&[("NAXIS", HeaderValue::Integer(2))]);
        assert!(matches!(Wcs::from_header(&no_wcs), Err(Error::InvalidGeometry(_))));

        let singular = header(&[
            ("CTYPE1", s("RA---TAN")),
            ("CTYPE2", s("DEC--TAN")),
            ("CD1_1", r(1e-3)),
            ("CD1_2", r(1e-3)),
            ("CD2_1", r(1e-3)),
            ("CD2_2", r(1e-3)),
        ]);
        assert!(matches!(Wcs::from_header(&singular), Err(Error::InvalidGeometry(_))));

        let linear = header(&[("CTYPE1", s("LINEAR")), ("CTYPE2", s("LINEAR"))]);
        assert!(matches!(Wcs::from_header(&linear), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn sin_boundary_is_an_error() {
        let wcs = Wcs::new(
            Projection::Sin,
            [0., 0.],
            [1., 1.],
            array![[-1., 0.], [0., 1.]],
            0,
            None,
        )
        .unwrap();
        // 100 degrees from the reference point is beyond the SIN horizon.
        assert!(matches!(
            wcs.pixel_to_world_scalar(100., 0.),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn samples_many_points() {
        let wcs = Wcs::new_tan(200.0, 45.0, 1., 1., 1e-3).unwrap();
        let pixels = array![[0., 0.], [10., 0.], [0., 10.]];
        let world = wcs.sample_world(pixels.view()).unwrap();
        assert_eq!(world.dim(), (3, 2));
        assert_abs_diff_eq!(world[(0, 0)], 200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(world[(0, 1)], 45.0, epsilon = 1e-12);
        assert!(world[(2, 1)] > 45.0);
    }
}
