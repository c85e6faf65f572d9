//! Footprints on the sky
//!
//! We approximate the sky footprint of an image by the circle that
//! circumscribes its (padded) pixel box: map the box center to the sky, map the
//! four corners, and take the largest center-to-corner separation as the
//! radius. This over-covers rather than under-covers, which is what we want
//! for picking reference-catalog shards.

use ndarray::{array, s, Array2, Axis};

use crate::{
    error::{Error, Result},
    fitsfile::Hdu,
    wcs::{Wcs, D2R},
};

/// A floating-point box in 0-based pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Box2D {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Box2D {
    /// A box of `width` by `height` pixels starting at `origin`, or at (0, 0)
    /// if no origin is given.
    pub fn new(width: f64, height: f64, origin: Option<(f64, f64)>) -> Self {
        let (x0, y0) = origin.unwrap_or((0., 0.));

        Box2D {
            min_x: x0,
            min_y: y0,
            max_x: x0 + width,
            max_y: y0 + height,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the box by `margin` pixels on every side.
    pub fn grow(&self, margin: f64) -> Self {
        Box2D {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.min_x + self.max_x),
            0.5 * (self.min_y + self.max_y),
        )
    }

    /// The four corners, counterclockwise from the minimum.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }
}

/// A position on the celestial sphere, in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkyPoint {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyPoint {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        SkyPoint { ra_deg, dec_deg }
    }

    /// Angular separation in degrees, using the Vincenty formula, which stays
    /// accurate at both tiny and near-antipodal separations.
    pub fn separation(&self, other: &SkyPoint) -> f64 {
        let (sin_d1, cos_d1) = (self.dec_deg * D2R).sin_cos();
        let (sin_d2, cos_d2) = (other.dec_deg * D2R).sin_cos();
        let (sin_da, cos_da) = ((other.ra_deg - self.ra_deg) * D2R).sin_cos();

        let num1 = cos_d2 * sin_da;
        let num2 = cos_d1 * sin_d2 - sin_d1 * cos_d2 * cos_da;
        let denom = sin_d1 * sin_d2 + cos_d1 * cos_d2 * cos_da;

        num1.hypot(num2).atan2(denom) / D2R
    }

    pub fn to_vector(&self) -> [f64; 3] {
        let (sin_a, cos_a) = (self.ra_deg * D2R).sin_cos();
        let (sin_d, cos_d) = (self.dec_deg * D2R).sin_cos();
        [cos_d * cos_a, cos_d * sin_a, sin_d]
    }

    /// The point in the direction of `v`, which need not be normalized.
    pub fn from_vector(v: [f64; 3]) -> Self {
        let ra = v[1].atan2(v[0]) / D2R;
        let dec = v[2].atan2(v[0].hypot(v[1])) / D2R;
        SkyPoint::new(ra.rem_euclid(360.), dec)
    }
}

/// A circular region of the sky.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphericalCap {
    pub center: SkyPoint,
    pub radius_deg: f64,
}

impl SphericalCap {
    pub fn new(center: SkyPoint, radius_deg: f64) -> Self {
        SphericalCap { center, radius_deg }
    }

    pub fn contains(&self, point: &SkyPoint) -> bool {
        self.center.separation(point) <= self.radius_deg
    }
}

/// Compute the circle circumscribing `bbox` grown by `margin` pixels on every
/// side.
pub fn compute_cap(bbox: &Box2D, wcs: &Wcs, margin: f64) -> Result<SphericalCap> {
    let grown = bbox.grow(margin);
    let (cx, cy) = grown.center();
    let [c0, c1, c2, c3] = grown.corners();

    // Row 0 is the center; rows 1-4 are the corners.
    let pixels = array![
        [cx, cy],
        [c0.0, c0.1],
        [c1.0, c1.1],
        [c2.0, c2.1],
        [c3.0, c3.1]
    ];
    let world: Array2<f64> = wcs.sample_world(pixels.view())?;

    let center = SkyPoint::new(world[(0, 0)], world[(0, 1)]);
    let radius_deg = world
        .slice(s![1.., ..])
        .axis_iter(Axis(0))
        .map(|row| center.separation(&SkyPoint::new(row[0], row[1])))
        .fold(0f64, f64::max);

    if !radius_deg.is_finite() {
        return Err(Error::InvalidGeometry(format!(
            "footprint around ({:.6}, {:.6}) has a non-finite radius",
            center.ra_deg, center.dec_deg
        )));
    }

    Ok(SphericalCap::new(center, radius_deg))
}

/// The pixel extent and world coordinates of one image HDU.
#[derive(Clone, Debug)]
pub struct Footprint {
    pub bbox: Box2D,
    pub wcs: Wcs,
}

impl Footprint {
    pub fn new(bbox: Box2D, wcs: Wcs) -> Self {
        Footprint { bbox, wcs }
    }

    pub fn from_hdu(hdu: &Hdu) -> Result<Self> {
        let (width, height) = hdu.image_size().ok_or_else(|| {
            Error::InvalidGeometry("HDU does not contain a two-dimensional image".into())
        })?;

        let bbox = Box2D::new(width as f64, height as f64, None);
        Ok(Footprint::new(bbox, hdu.get_wcs()?))
    }

    pub fn cap(&self, margin: f64) -> Result<SphericalCap> {
        compute_cap(&self.bbox, &self.wcs, margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn box_grows_symmetrically() {
        let b = Box2D::new(100., 50., Some((10., 20.)));
        assert_eq!(b.center(), (60., 45.));

        let g = b.grow(5.);
        assert_eq!(g.width(), 110.);
        assert_eq!(g.height(), 60.);
        assert_eq!(g.center(), b.center());
        assert_eq!(g.corners()[0], (5., 15.));
        assert_eq!(g.corners()[2], (115., 75.));
    }

    #[test]
    fn separations() {
        let a = SkyPoint::new(10., 0.);
        assert_abs_diff_eq!(a.separation(&SkyPoint::new(11., 0.)), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(a.separation(&SkyPoint::new(190., 0.)), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            SkyPoint::new(0., 89.).separation(&SkyPoint::new(180., 89.)),
            2.0,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            SkyPoint::new(359.9, 0.).separation(&SkyPoint::new(0.1, 0.)),
            0.2,
            epsilon = 1e-9
        );
    }

    #[test]
    fn vectors_round_trip() {
        let p = SkyPoint::new(271.5, -33.25);
        let q = SkyPoint::from_vector(p.to_vector());
        assert_abs_diff_eq!(p.ra_deg, q.ra_deg, epsilon = 1e-10);
        assert_abs_diff_eq!(p.dec_deg, q.dec_deg, epsilon = 1e-10);
    }

    #[test]
    fn cap_circumscribes_the_box() {
        let scale = 1. / 3600.;
        let wcs = Wcs::new_tan(150., 2., 1001., 2001., scale).unwrap();
        let bbox = Box2D::new(2000., 4000., None);
        let cap = compute_cap(&bbox, &wcs, 0.).unwrap();

        assert_abs_diff_eq!(cap.center.ra_deg, 150., epsilon = 1e-9);
        assert_abs_diff_eq!(cap.center.dec_deg, 2., epsilon = 1e-9);

        // Half-diagonal of a 2000 x 4000 box at 1"/pixel, less a little
        // gnomonic compression.
        let expected = (1000f64.hypot(2000.)) * scale;
        assert_abs_diff_eq!(cap.radius_deg, expected, epsilon = 1e-4);
        assert!(cap.radius_deg < expected);

        let padded = compute_cap(&bbox, &wcs, 300.).unwrap();
        assert!(padded.radius_deg > cap.radius_deg);
        assert_abs_diff_eq!(padded.radius_deg, (1300f64.hypot(2300.)) * scale, epsilon = 1e-4);
    }

    #[test]
    fn cap_contains_the_corners() {
        let wcs = Wcs::new_tan(0.05, 89.9, 1., 1., 1e-3).unwrap();
        let bbox = Box2D::new(500., 500., None);
        let cap = compute_cap(&bbox, &wcs, 10.).unwrap();

        for (x, y) in bbox.corners() {
            let (ra, dec) = wcs.pixel_to_world_scalar(x, y).unwrap();
            assert!(cap.contains(&SkyPoint::new(ra, dec)));
        }
    }
}
