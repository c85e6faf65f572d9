//! Just enough FITS to find out where images point on the sky.
//!
//! We only ever need headers: the shard resolver cares about image sizes and
//! world coordinates, never pixels. So we walk the file HDU by HDU, parse each
//! header, and skip over the data units without looking at them. This works on
//! gzipped files too, since we never need to seek.
//!
//! Tile-compressed images are stored as binary tables with `ZIMAGE = T`. Their
//! `ZNAXISn` keywords describe the image as it would be after decompression,
//! which is what we report as the image size.

use flate2::read::GzDecoder;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, prelude::*, BufReader, ErrorKind},
    path::Path,
};
use tracing::debug;

use crate::{
    error::{Error, Result},
    wcs::Wcs,
};

const CARD_SIZE: usize = 80;
const BLOCK_SIZE: usize = 2880;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    String(String),
    Undefined,
}

impl HeaderValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HeaderValue::Logical(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers are promoted; plenty of writers emit `CRPIX1 = 1024`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HeaderValue::Integer(i) => Some(*i as f64),
            HeaderValue::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn parse(field: &str) -> std::result::Result<Self, String> {
        let field = field.trim_start();

        if let Some(rest) = field.strip_prefix('\'') {
            // Embedded quotes are doubled; trailing blanks are not significant.
            let mut text = String::new();
            let mut chars = rest.chars().peekable();

            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        text.push('\'');
                    }
                    Some('\'') => return Ok(HeaderValue::String(text.trim_end().to_owned())),
                    Some(c) => text.push(c),
                    None => return Err("unterminated string value".to_owned()),
                }
            }
        }

        let token = field.split('/').next().unwrap_or("").trim();

        Ok(match token {
            "" => HeaderValue::Undefined,
            "T" => HeaderValue::Logical(true),
            "F" => HeaderValue::Logical(false),
            _ => {
                if let Ok(i) = token.parse::<i64>() {
                    HeaderValue::Integer(i)
                } else if let Ok(f) = token.replace(['D', 'd'], "E").parse::<f64>() {
                    HeaderValue::Real(f)
                } else {
                    // Complex values and other oddities; keep the raw text.
                    HeaderValue::String(token.to_owned())
                }
            }
        })
    }
}

/// The keyword/value cards of one HDU, in file order.
///
/// Commentary cards (`COMMENT`, `HISTORY`, blank keywords, `CONTINUE`) carry
/// nothing we need and are not retained. When a keyword repeats, lookups see
/// its first occurrence.
#[derive(Clone, Debug, Default)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn push<S: Into<String>>(&mut self, keyword: S, value: HeaderValue) {
        let keyword = keyword.into();
        self.index.entry(keyword.clone()).or_insert(self.cards.len());
        self.cards.push((keyword, value));
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.index.get(keyword).map(|&i| &self.cards[i].1)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.index.contains_key(keyword)
    }

    pub fn get_bool(&self, keyword: &str) -> Option<bool> {
        self.get(keyword).and_then(HeaderValue::as_bool)
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(HeaderValue::as_i64)
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(HeaderValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse one 80-character card. Returns `None` for commentary cards.
    fn parse_card(card: &[u8]) -> std::result::Result<Option<(String, HeaderValue)>, String> {
        if !card.is_ascii() {
            return Err("non-ASCII characters in header card".to_owned());
        }

        // Safe to slice by byte offsets now.
        let text = std::str::from_utf8(card).map_err(|e| e.to_string())?;
        let keyword = text[..8].trim_end();

        if keyword.is_empty()
            || keyword == "COMMENT"
            || keyword == "HISTORY"
            || &text[8..10] != "= "
        {
            return Ok(None);
        }

        let value = HeaderValue::parse(&text[10..]).map_err(|e| format!("{keyword}: {e}"))?;
        Ok(Some((keyword.to_owned(), value)))
    }
}

#[derive(Clone, Debug)]
pub struct Hdu {
    index: usize,
    header: Header,
}

impl Hdu {
    /// Zero-based position of this HDU in its file. The primary HDU is 0.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_primary(&self) -> bool {
        self.index == 0
    }

    pub fn extname(&self) -> Option<&str> {
        self.header.get_str("EXTNAME")
    }

    pub fn xtension(&self) -> Option<&str> {
        self.header.get_str("XTENSION")
    }

    /// Get the (width, height) of the image carried by this HDU, in FITS axis
    /// order (`NAXIS1`, `NAXIS2`). Returns `None` for table HDUs, for empty
    /// HDUs, and for anything that isn't at least two-dimensional.
    pub fn image_size(&self) -> Option<(u64, u64)> {
        let h = &self.header;

        let (naxis, axis1, axis2) = if self.is_tile_compressed() {
            ("ZNAXIS", "ZNAXIS1", "ZNAXIS2")
        } else if self.is_primary() || self.xtension() == Some("IMAGE") {
            ("NAXIS", "NAXIS1", "NAXIS2")
        } else {
            return None;
        };

        if h.get_i64(naxis)? < 2 {
            return None;
        }

        let width = h.get_i64(axis1)?;
        let height = h.get_i64(axis2)?;

        if width > 0 && height > 0 {
            Some((width as u64, height as u64))
        } else {
            None
        }
    }

    pub fn is_image(&self) -> bool {
        self.image_size().is_some()
    }

    pub fn is_tile_compressed(&self) -> bool {
        self.xtension() == Some("BINTABLE") && self.header.get_bool("ZIMAGE") == Some(true)
    }

    /// Get a Wcs object based on this HDU's headers.
    pub fn get_wcs(&self) -> Result<Wcs> {
        Wcs::from_header(&self.header)
    }

    /// Size of the data unit that follows the header, in bytes, without the
    /// padding to a whole number of blocks.
    fn data_size(&self) -> std::result::Result<u64, String> {
        let h = &self.header;
        let bitpix = h.get_i64("BITPIX").ok_or("missing BITPIX")?;
        let naxis = h.get_i64("NAXIS").ok_or("missing NAXIS")?;

        if naxis == 0 {
            return Ok(0);
        }

        // Random-groups data declare NAXIS1 = 0 and leave it out of the product.
        let random_groups = h.get_bool("GROUPS") == Some(true) && h.get_i64("NAXIS1") == Some(0);
        let first_axis = if random_groups { 2 } else { 1 };
        let mut nelem: u64 = 1;

        for i in first_axis..=naxis {
            let n = h
                .get_i64(&format!("NAXIS{i}"))
                .ok_or_else(|| format!("missing NAXIS{i}"))?;
            nelem = nelem
                .checked_mul(u64::try_from(n).map_err(|_| format!("negative NAXIS{i}"))?)
                .ok_or("data unit size overflows")?;
        }

        let pcount = h.get_i64("PCOUNT").unwrap_or(0).max(0) as u64;
        let gcount = h.get_i64("GCOUNT").unwrap_or(1).max(0) as u64;
        let bits = (bitpix.unsigned_abs())
            .checked_mul(gcount)
            .and_then(|v| v.checked_mul(pcount + nelem))
            .ok_or("data unit size overflows")?;

        Ok(bits / 8)
    }
}

/// The headers of every HDU in a FITS file.
#[derive(Debug)]
pub struct FitsFile {
    name: String,
    hdus: Vec<Hdu>,
}

impl FitsFile {
    /// Open a FITS file, transparently decompressing it if it is gzipped.
    ///
    /// The file handle is released before this returns, whether or not the
    /// file parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(Error::io(path))?;
        let mut reader = BufReader::new(file);

        let is_gzip = reader
            .fill_buf()
            .map_err(Error::io(path))?
            .starts_with(&GZIP_MAGIC);

        if is_gzip {
            debug!(file = %name, "reading gzip-compressed FITS");
            Self::from_reader(name, GzDecoder::new(reader))
        } else {
            Self::from_reader(name, reader)
        }
    }

    /// Read all HDU headers from a stream. `name` is only used to label errors.
    pub fn from_reader<S: Into<String>, R: Read>(name: S, mut src: R) -> Result<Self> {
        let name = name.into();
        let mut hdus = Vec::new();

        loop {
            let index = hdus.len();

            let header = match read_header(&mut src, index).map_err(|e| Error::file_format(&name, e))? {
                Some(h) => h,
                None => break,
            };

            if index == 0 && header.get_bool("SIMPLE") != Some(true) {
                return Err(Error::file_format(&name, "primary header lacks SIMPLE = T"));
            }

            if index > 0 && !header.contains("XTENSION") {
                // Anything after the last HDU that isn't an extension is
                // "special records", which we can ignore.
                debug!(file = %name, "ignoring trailing non-extension records");
                break;
            }

            let hdu = Hdu { index, header };
            let nbytes = hdu.data_size().map_err(|e| {
                Error::file_format(&name, format!("HDU {index}: {e}"))
            })?;
            skip_data(&mut src, nbytes)
                .map_err(|e| Error::file_format(&name, format!("HDU {index}: {e}")))?;
            hdus.push(hdu);
        }

        debug!(file = %name, n_hdus = hdus.len(), "read FITS headers");
        Ok(FitsFile { name, hdus })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn hdu(&self, index: usize) -> Option<&Hdu> {
        self.hdus.get(index)
    }

    pub fn len(&self) -> usize {
        self.hdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hdus.is_empty()
    }

    /// The HDUs whose footprints we consider by default: every image-bearing
    /// extension, treating the primary HDU as metadata. A file with no
    /// extensions at all gets its primary HDU considered instead, if that
    /// carries an image.
    pub fn image_hdus(&self) -> Vec<&Hdu> {
        if self.hdus.len() == 1 {
            return self.hdus.iter().filter(|h| h.is_image()).collect();
        }

        self.hdus.iter().skip(1).filter(|h| h.is_image()).collect()
    }
}

/// Read the next header. Returns `Ok(None)` if the stream ends cleanly at an
/// HDU boundary (after the primary).
fn read_header<R: Read>(src: &mut R, index: usize) -> std::result::Result<Option<Header>, String> {
    let mut header = Header::default();
    let mut block = vec![0; BLOCK_SIZE];
    let mut first_block = true;

    loop {
        let n = fill_block(src, &mut block).map_err(|e| e.to_string())?;

        if n == 0 && first_block && index > 0 {
            return Ok(None);
        }

        if n < BLOCK_SIZE {
            return Err(format!("HDU {index}: truncated header"));
        }

        for card in block.chunks_exact(CARD_SIZE) {
            if &card[..8] == b"END     " {
                return Ok(Some(header));
            }

            if let Some((keyword, value)) =
                Header::parse_card(card).map_err(|e| format!("HDU {index}: {e}"))?
            {
                header.push(keyword, value);
            }
        }

        first_block = false;
    }
}

/// Like `read_exact`, but reports how much was read instead of failing on a
/// short read, so that we can tell a clean EOF from a truncated block.
fn fill_block<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Skip a data unit and its block padding. Some writers leave off the
/// padding of the final HDU, so a short read is only an error if it cuts into
/// the data proper.
fn skip_data<R: Read>(src: &mut R, nbytes: u64) -> std::result::Result<(), String> {
    let block = BLOCK_SIZE as u64;
    let padded = nbytes.div_ceil(block) * block;
    let copied = io::copy(&mut src.by_ref().take(padded), &mut io::sink()).map_err(|e| e.to_string())?;

    if copied < nbytes {
        return Err(format!("truncated data unit ({copied} of {nbytes} bytes)"));
    }

    Ok(())
}
