//! Registry export documents.
//!
//! An export is a fixed header followed by a `data` list of typed records:
//!
//! ```yaml
//! description: Butler Data Repository Export
//! version: 1.0.2
//! universe_version: 2
//! universe_namespace: daf_butler
//! data:
//! - type: dimension
//!   element: detector
//!   records:
//!   - instrument: DECam
//!     id: 25
//!     full_name: S1
//! - type: dataset
//!   dataset_type: bias
//!   run: DECam/calib
//!   records:
//!   - dataset_id:
//!     - !uuid '0a1b...'
//!     data_id:
//!     - instrument: DECam
//!       detector: 25
//! ```

use flate2::read::GzDecoder;
use std::{
    collections::BTreeSet,
    fs::File,
    io::{prelude::*, BufReader},
    path::Path,
};
use tracing::debug;

use super::node::{Mapping, Node};
use crate::error::{Error, Result};

pub const DIMENSION: &str = "dimension";
pub const COLLECTION: &str = "collection";
pub const DATASET_TYPE: &str = "dataset_type";
pub const DATASET: &str = "dataset";
pub const ASSOCIATIONS: &str = "associations";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One entry of the `data` list.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// The record's `type` field.
    pub kind: String,

    /// All of the record's fields, `type` included, in document order.
    pub body: Mapping,
}

impl Record {
    pub fn from_mapping(body: Mapping) -> Result<Self> {
        let kind = body
            .get_str("type")
            .ok_or_else(|| Error::ExportFormat("data record without a `type`".into()))?
            .to_owned();
        Ok(Record { kind, body })
    }

    /// For `dimension` records, the dimension element (`instrument`,
    /// `detector`, `physical_filter`, ...).
    pub fn element(&self) -> Option<&str> {
        self.body.get_str("element")
    }

    /// The record's `records` rows, if any.
    pub fn rows(&self) -> &[Node] {
        self.body
            .get("records")
            .and_then(Node::as_seq)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A copy of this record with its `records` rows replaced.
    pub fn with_rows(&self, rows: Vec<Node>) -> Self {
        let mut body = self.body.clone();
        body.insert("records", Node::Seq(rows));
        Record {
            kind: self.kind.clone(),
            body,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportDocument {
    pub description: Node,
    pub version: Node,
    pub universe_version: i64,
    pub universe_namespace: Node,
    pub data: Vec<Record>,
}

impl ExportDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        Self::from_node(Node::from_value(value)?)
    }

    pub fn from_reader<R: Read>(src: R) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_reader(src)?;
        Self::from_node(Node::from_value(value)?)
    }

    /// Read an export from disk, transparently decompressing it if it is
    /// gzipped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(Error::io(path))?;
        let mut reader = BufReader::new(file);

        let is_gzip = reader
            .fill_buf()
            .map_err(Error::io(path))?
            .starts_with(&GZIP_MAGIC);

        let doc = if is_gzip {
            Self::from_reader(GzDecoder::new(reader))
        } else {
            Self::from_reader(reader)
        }?;

        debug!(file = %path.display(), records = doc.data.len(), "read export");
        Ok(doc)
    }

    pub fn from_node(node: Node) -> Result<Self> {
        let top = match node {
            Node::Map(m) => m,
            _ => {
                return Err(Error::ExportFormat(
                    "top level of an export must be a mapping".into(),
                ))
            }
        };

        let field = |key: &str| {
            top.get(key)
                .cloned()
                .ok_or_else(|| Error::ExportFormat(format!("missing top-level `{key}`")))
        };

        let universe_version = field("universe_version")?.as_i64().ok_or_else(|| {
            Error::ExportFormat("`universe_version` must be an integer".into())
        })?;

        for (key, _) in top.iter() {
            if !matches!(
                key,
                "description" | "version" | "universe_version" | "universe_namespace" | "data"
            ) {
                debug!(key, "dropping unrecognized top-level key");
            }
        }

        let data = match field("data")? {
            Node::Seq(items) => items
                .into_iter()
                .map(|item| match item {
                    Node::Map(m) => Record::from_mapping(m),
                    other => Err(Error::ExportFormat(format!(
                        "data record is not a mapping: {other:?}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Node::Null => Vec::new(),
            _ => return Err(Error::ExportFormat("`data` must be a list".into())),
        };

        Ok(ExportDocument {
            description: field("description")?,
            version: field("version")?,
            universe_version,
            universe_namespace: field("universe_namespace")?,
            data,
        })
    }

    /// The header fields and data, in the order exports are written.
    pub fn to_mapping(&self) -> Mapping {
        let mut m = Mapping::new();
        m.insert("description", self.description.clone());
        m.insert("version", self.version.clone());
        m.insert("universe_version", Node::Int(self.universe_version));
        m.insert("universe_namespace", self.universe_namespace.clone());
        m.insert(
            "data",
            Node::Seq(self.data.iter().map(|r| Node::Map(r.body.clone())).collect()),
        );
        m
    }

    /// Records of one kind, in document order.
    pub fn records_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.data.iter().filter(move |r| r.kind == kind)
    }

    /// Every `physical_filter` name the document defines.
    pub fn filter_names(&self) -> BTreeSet<String> {
        self.dimension_rows("physical_filter")
            .filter_map(Node::as_map)
            .filter_map(|row| row.get_str("name"))
            .map(str::to_owned)
            .collect()
    }

    /// Expand a comma-separated filter list against the document. Each item
    /// is either a full `physical_filter` name or a band, the name's first
    /// word (`g` for `g DECam SDSS c0001 4720.0 1520.0`), which picks every
    /// filter in that band. Items matching nothing are kept as given.
    pub fn select_filters(&self, text: &str) -> BTreeSet<String> {
        let known = self.filter_names();
        let mut selected = BTreeSet::new();

        for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if known.contains(item) {
                selected.insert(item.to_owned());
                continue;
            }

            let n_before = selected.len();
            selected.extend(
                known
                    .iter()
                    .filter(|name| name.split_whitespace().next() == Some(item))
                    .cloned(),
            );

            if selected.len() == n_before {
                debug!(filter = item, "filter not defined in export");
                selected.insert(item.to_owned());
            }
        }

        selected
    }

    /// The rows of `dimension` records for `element`.
    pub fn dimension_rows<'a>(&'a self, element: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.records_of(DIMENSION)
            .filter(move |r| r.element() == Some(element))
            .flat_map(|r| r.rows().iter())
    }
}
