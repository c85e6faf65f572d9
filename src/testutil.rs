//! Helpers for building small synthetic FITS files in tests.
//!
//! The integration tests pull this file in too, through `tests/common`.

struct HduSpec {
    cards: Vec<(String, String)>,
    size: Option<(u64, u64)>,
    data_len: usize,
}

#[derive(Default)]
pub struct FitsBuilder {
    hdus: Vec<HduSpec>,
}

fn owned(extra: &[(&str, &str)]) -> Vec<(String, String)> {
    extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl FitsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dataless primary HDU.
    pub fn primary(mut self, extra: &[(&str, &str)]) -> Self {
        let mut cards = owned(&[
            ("SIMPLE", "T"),
            ("BITPIX", "8"),
            ("NAXIS", "0"),
            ("EXTEND", "T"),
        ]);
        cards.extend(owned(extra));
        self.hdus.push(HduSpec {
            cards,
            size: None,
            data_len: 0,
        });
        self
    }

    pub fn primary_image(mut self, width: u64, height: u64, extra: &[(&str, &str)]) -> Self {
        let mut cards = owned(&[("SIMPLE", "T"), ("BITPIX", "8"), ("NAXIS", "2")]);
        cards.push(("NAXIS1".to_owned(), width.to_string()));
        cards.push(("NAXIS2".to_owned(), height.to_string()));
        cards.extend(owned(extra));
        self.hdus.push(HduSpec {
            cards,
            size: Some((width, height)),
            data_len: (width * height) as usize,
        });
        self
    }

    pub fn image(mut self, width: u64, height: u64, extra: &[(&str, &str)]) -> Self {
        let mut cards = owned(&[("XTENSION", "'IMAGE'"), ("BITPIX", "8"), ("NAXIS", "2")]);
        cards.push(("NAXIS1".to_owned(), width.to_string()));
        cards.push(("NAXIS2".to_owned(), height.to_string()));
        cards.extend(owned(&[("PCOUNT", "0"), ("GCOUNT", "1")]));
        cards.extend(owned(extra));
        self.hdus.push(HduSpec {
            cards,
            size: Some((width, height)),
            data_len: (width * height) as usize,
        });
        self
    }

    pub fn table(mut self, extra: &[(&str, &str)]) -> Self {
        let mut cards = owned(&[
            ("XTENSION", "'BINTABLE'"),
            ("BITPIX", "8"),
            ("NAXIS", "2"),
            ("NAXIS1", "8"),
            ("NAXIS2", "3"),
            ("PCOUNT", "0"),
            ("GCOUNT", "1"),
            ("TFIELDS", "1"),
            ("TFORM1", "'8A'"),
        ]);
        cards.extend(owned(extra));
        self.hdus.push(HduSpec {
            cards,
            size: None,
            data_len: 24,
        });
        self
    }

    /// A tile-compressed image with an empty compressed-data table.
    pub fn compressed_image(mut self, width: u64, height: u64, extra: &[(&str, &str)]) -> Self {
        let mut cards = owned(&[
            ("XTENSION", "'BINTABLE'"),
            ("BITPIX", "8"),
            ("NAXIS", "2"),
            ("NAXIS1", "8"),
            ("NAXIS2", "0"),
            ("PCOUNT", "0"),
            ("GCOUNT", "1"),
            ("TFIELDS", "1"),
            ("TFORM1", "'1PB(0)'"),
            ("ZIMAGE", "T"),
            ("ZBITPIX", "16"),
            ("ZNAXIS", "2"),
        ]);
        cards.push(("ZNAXIS1".to_owned(), width.to_string()));
        cards.push(("ZNAXIS2".to_owned(), height.to_string()));
        cards.extend(owned(extra));
        self.hdus.push(HduSpec {
            cards,
            size: Some((width, height)),
            data_len: 0,
        });
        self
    }

    /// Give the most recently added image a TAN WCS centered on (`ra`, `dec`)
    /// with square pixels of `scale` degrees.
    pub fn tan(self, ra: f64, dec: f64, scale: f64) -> Self {
        self.zenithal("TAN", ra, dec, scale)
    }

    /// Like [`FitsBuilder::tan`], but writing `projection` (e.g. `TPV`) into
    /// the `CTYPE`s.
    pub fn zenithal(mut self, projection: &str, ra: f64, dec: f64, scale: f64) -> Self {
        let hdu = self.hdus.last_mut().expect("a WCS needs an HDU");
        let (width, height) = hdu.size.expect("a WCS needs an image HDU");

        for (k, v) in [
            ("CTYPE1", format!("'RA---{projection}'")),
            ("CTYPE2", format!("'DEC--{projection}'")),
            ("CRVAL1", format!("{ra:.10}")),
            ("CRVAL2", format!("{dec:.10}")),
            ("CRPIX1", format!("{:.1}", width as f64 / 2. + 0.5)),
            ("CRPIX2", format!("{:.1}", height as f64 / 2. + 0.5)),
            ("CD1_1", format!("{:.10E}", -scale)),
            ("CD1_2", "0.0".to_owned()),
            ("CD2_1", "0.0".to_owned()),
            ("CD2_2", format!("{scale:.10E}")),
        ] {
            hdu.cards.push((k.to_owned(), v));
        }

        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();

        for hdu in self.hdus {
            let mut header = String::new();

            for (key, value) in &hdu.cards {
                header.push_str(&format!("{:<80}", format!("{key:<8}= {value:>20}")));
            }

            header.push_str(&format!("{:<80}", "END"));

            while header.len() % 2880 != 0 {
                header.push(' ');
            }

            out.extend_from_slice(header.as_bytes());

            let padded = hdu.data_len.div_ceil(2880) * 2880;
            out.resize(out.len() + padded, 0);
        }

        out
    }
}
