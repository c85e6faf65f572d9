//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use flate2::{write::GzEncoder, Compression};
use std::{io::Write, path::Path};

#[path = "../../src/testutil.rs"]
mod testutil;

pub use testutil::FitsBuilder;

/// Binned DECam-like pixels.
pub const SCALE: f64 = 8. * 0.27 / 3600.;

/// One image extension: detector number, name, and the sky position of its
/// center.
pub struct Chip {
    pub ccdnum: i64,
    pub name: &'static str,
    pub ra: f64,
    pub dec: f64,
}

/// A multi-extension file with a dataless primary and one 256x512 TAN image
/// per chip.
pub fn mosaic(chips: &[Chip]) -> Vec<u8> {
    mosaic_with_projection(chips, "TAN")
}

/// [`mosaic`] with another projection code in the `CTYPE`s.
pub fn mosaic_with_projection(chips: &[Chip], projection: &str) -> Vec<u8> {
    let mut fits = FitsBuilder::new().primary(&[]);

    for chip in chips {
        let ccdnum = chip.ccdnum.to_string();
        let detpos = format!("'{}'", chip.name);
        fits = fits
            .image(256, 512, &[("CCDNUM", ccdnum.as_str()), ("DETPOS", detpos.as_str())])
            .zenithal(projection, chip.ra, chip.dec, SCALE);
    }

    fits.finish()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn write(path: &Path, data: &[u8]) {
    std::fs::write(path, data).unwrap();
}

/// Two nearby chips and one far away.
pub fn decam_chips() -> Vec<Chip> {
    vec![
        Chip {
            ccdnum: 25,
            name: "S1",
            ra: 150.0,
            dec: 2.0,
        },
        Chip {
            ccdnum: 26,
            name: "S2",
            ra: 150.2,
            dec: 2.0,
        },
        Chip {
            ccdnum: 35,
            name: "N1",
            ra: 10.0,
            dec: -40.0,
        },
    ]
}
