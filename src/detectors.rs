//! Naming detectors.
//!
//! Users pick detectors either by number (`25`) or by name (`S1`). We parse
//! each choice into a [`DetectorRef`] once, up front, and resolve it through an
//! explicit id ↔ name table built from whatever we're working on: the HDUs of
//! a raw FITS file, or the `detector` dimension of a registry export.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    convert::Infallible,
    fmt,
    str::FromStr,
};

use crate::{
    error::{Error, Result},
    export::{document::ExportDocument, node::Mapping, node::Node},
    fitsfile::FitsFile,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DetectorRef {
    Numeric(i64),
    Named(String),
}

impl FromStr for DetectorRef {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();

        Ok(match s.parse() {
            Ok(n) => DetectorRef::Numeric(n),
            Err(_) => DetectorRef::Named(s.to_owned()),
        })
    }
}

impl fmt::Display for DetectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorRef::Numeric(n) => write!(f, "{n}"),
            DetectorRef::Named(s) => f.write_str(s),
        }
    }
}

/// Parse a user-supplied list like `S1,S2 25`.
pub fn parse_detector_list(text: &str) -> Vec<DetectorRef> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse() {
            Ok(r) => r,
            Err(never) => match never {},
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectorEntry {
    pub id: i64,
    pub name: String,

    /// The HDU holding this detector, when the table came from a FITS file.
    pub hdu: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct DetectorTable {
    entries: Vec<DetectorEntry>,
    by_id: BTreeMap<i64, usize>,
    by_name: HashMap<String, usize>,
}

impl DetectorTable {
    /// Add a detector. The first entry for an id or name wins.
    pub fn push(&mut self, entry: DetectorEntry) {
        let index = self.entries.len();
        self.by_id.entry(entry.id).or_insert(index);
        self.by_name.entry(entry.name.clone()).or_insert(index);
        self.entries.push(entry);
    }

    /// Build the table for a FITS file.
    ///
    /// Mosaic cameras label their extensions with `CCDNUM` and `DETPOS`, and
    /// we use those when they're present. Any other HDU falls back to its
    /// extension name (or `HDU<n>`). In a file that does use `CCDNUM`, such
    /// HDUs are numbered after all of the HDUs, so that they can't collide
    /// with real detector numbers; otherwise they're numbered by HDU index.
    pub fn from_fits(fits: &FitsFile) -> Self {
        let mut table = DetectorTable::default();
        let n_hdus = fits.len() as i64;
        let numbered = fits.hdus().iter().any(|h| h.header().contains("CCDNUM"));
        let mut unlabeled = n_hdus;

        for hdu in fits.hdus() {
            let header = hdu.header();
            let name_fallback = || match hdu.extname() {
                Some(name) => name.to_owned(),
                None if hdu.is_primary() => "PRIMARY".to_owned(),
                None => format!("HDU{}", hdu.index()),
            };

            let (id, name) = match (header.get_i64("CCDNUM"), header.get_str("DETPOS")) {
                (Some(id), Some(name)) => (id, name.trim().to_owned()),
                _ if hdu.is_primary() => (0, name_fallback()),
                _ if numbered => {
                    unlabeled += 1;
                    (unlabeled, name_fallback())
                }
                _ => (hdu.index() as i64, name_fallback()),
            };

            table.push(DetectorEntry {
                id,
                name,
                hdu: Some(hdu.index()),
            });
        }

        table
    }

    /// Build the table from the `detector` dimension of an export.
    pub fn from_export(doc: &ExportDocument) -> Self {
        let mut table = DetectorTable::default();

        for row in doc.dimension_rows("detector").filter_map(Node::as_map) {
            let id = row.get("id").and_then(Node::as_i64);
            let name = row.get("full_name").and_then(Node::scalar_text);

            if let (Some(id), Some(name)) = (id, name) {
                table.push(DetectorEntry {
                    id,
                    name,
                    hdu: None,
                });
            }
        }

        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DetectorEntry> {
        self.entries.iter()
    }

    pub fn get(&self, detector: &DetectorRef) -> Option<&DetectorEntry> {
        let index = match detector {
            DetectorRef::Numeric(id) => self.by_id.get(id),
            DetectorRef::Named(name) => self.by_name.get(name),
        }?;
        Some(&self.entries[*index])
    }

    /// Look up a detector, failing if the table doesn't know it. `source_name`
    /// labels the error.
    pub fn resolve(&self, detector: &DetectorRef, source_name: &str) -> Result<&DetectorEntry> {
        self.get(detector).ok_or_else(|| Error::InvalidDetector {
            source_name: source_name.to_owned(),
            detector: detector.to_string(),
        })
    }

    pub fn name_of(&self, id: i64) -> Option<&str> {
        self.get(&DetectorRef::Numeric(id)).map(|e| e.name.as_str())
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.get(&DetectorRef::Named(name.to_owned())).map(|e| e.id)
    }
}

/// The detectors to keep when trimming an export, by id and by name.
///
/// Unlike [`DetectorTable::resolve`], building a selection never fails: a
/// detector the export doesn't know simply selects nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectorSelection {
    pub ids: BTreeSet<i64>,
    pub names: BTreeSet<String>,
}

impl DetectorSelection {
    pub fn from_refs(refs: &[DetectorRef], table: &DetectorTable) -> Self {
        let mut sel = DetectorSelection::default();

        for r in refs {
            match r {
                DetectorRef::Numeric(id) => {
                    sel.ids.insert(*id);
                    sel.names.extend(table.name_of(*id).map(str::to_owned));
                }
                DetectorRef::Named(name) => {
                    sel.names.insert(name.clone());
                    sel.ids.extend(table.id_of(name));
                }
            }
        }

        sel
    }

    /// Whether a `detector` value from a data id is selected.
    pub fn matches(&self, detector: &Node) -> bool {
        if let Some(id) = detector.as_i64() {
            return self.ids.contains(&id);
        }

        detector
            .as_str()
            .map(|name| self.names.contains(name))
            .unwrap_or(false)
    }

    /// Whether a row of the `detector` dimension is selected.
    pub fn matches_dimension_row(&self, row: &Mapping) -> bool {
        let by_name = row
            .get("full_name")
            .and_then(Node::scalar_text)
            .map(|n| self.names.contains(&n))
            .unwrap_or(false);
        let by_id = row
            .get("id")
            .and_then(Node::as_i64)
            .map(|id| self.ids.contains(&id))
            .unwrap_or(false);
        by_name || by_id
    }
}
