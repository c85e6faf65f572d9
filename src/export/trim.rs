//! Trimming registry exports down to a few detectors.
//!
//! We can't trim in one sweep: nothing says `dataset` records come before the
//! `physical_filter` dimension or the `associations` that refer to them. So
//! [`first_pass`] walks the document in order, decides what it can, and notes
//! which dataset ids and filters survived; [`second_pass`] then settles the
//! filter rows and associations against those survivors. Neither pass mutates
//! its input.

use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{
    document::{ExportDocument, Record, ASSOCIATIONS, COLLECTION, DATASET, DATASET_TYPE, DIMENSION},
    node::{Mapping, Node},
};
use crate::{
    detectors::DetectorSelection,
    error::{Error, Result},
    index::ShardId,
};

pub const UUID_TAG: &str = "uuid";
pub const TIMESPAN_TAG: &str = "lsst.daf.butler.Timespan";

/// What the first pass learned.
#[derive(Clone, Debug)]
pub struct FirstPass {
    /// The document with everything decidable in one sweep already decided.
    pub partial: ExportDocument,

    /// Every `associations` record, as found.
    pub associations: Vec<Record>,

    /// Dataset ids of the dataset rows that were kept.
    pub surviving_ids: BTreeSet<String>,

    /// Filters used by the dataset rows that were kept.
    pub surviving_filters: BTreeSet<String>,
}

/// The `data_id` entries of a dataset row; exports write either one mapping
/// or a list of them.
fn data_ids(row: &Mapping) -> Vec<&Mapping> {
    match row.get("data_id").map(Node::untagged) {
        Some(Node::Seq(items)) => items.iter().filter_map(Node::as_map).collect(),
        Some(Node::Map(m)) => vec![m],
        _ => Vec::new(),
    }
}

/// The row's filter, or `None` if the row is filter-agnostic.
fn physical_filter(data_id: &Mapping) -> Option<String> {
    data_id
        .get("physical_filter")
        .and_then(Node::scalar_text)
        .filter(|f| !f.is_empty())
}

fn retag_uuid(node: &Node) -> Node {
    match node {
        Node::Str(_) => Node::tagged(UUID_TAG, node.clone()),
        other => other.clone(),
    }
}

/// Dataset ids of a row, and the row rewritten so they carry `!uuid` tags.
fn collect_dataset_ids(row: &Mapping) -> (Vec<String>, Mapping) {
    let mut row = row.clone();
    let mut ids = Vec::new();

    if let Some(value) = row.get("dataset_id") {
        let retagged = match value {
            Node::Seq(items) => Node::Seq(items.iter().map(retag_uuid).collect()),
            other => retag_uuid(other),
        };

        match retagged.untagged() {
            Node::Seq(items) => ids.extend(items.iter().filter_map(Node::scalar_text)),
            scalar => ids.extend(scalar.scalar_text()),
        }

        row.insert("dataset_id", retagged);
    }

    (ids, row)
}

/// Keep the dataset rows that `keep` accepts, accumulating survivors.
fn trim_dataset_record<F>(
    record: &Record,
    keep: F,
    ids: &mut BTreeSet<String>,
    filters: &mut BTreeSet<String>,
) -> Record
where
    F: Fn(&Mapping) -> bool,
{
    let mut rows = Vec::new();

    for row in record.rows() {
        let Some(row) = row.as_map() else {
            continue;
        };

        let entries = data_ids(row);

        if !entries.iter().any(|d| keep(d)) {
            continue;
        }

        let (row_ids, row) = collect_dataset_ids(row);
        ids.extend(row_ids);
        filters.extend(entries.iter().filter_map(|d| physical_filter(d)));
        rows.push(Node::Map(row));
    }

    debug!(
        dataset_type = record.body.get_str("dataset_type").unwrap_or("?"),
        kept = rows.len(),
        of = record.rows().len(),
        "trimmed dataset rows"
    );

    record.with_rows(rows)
}

fn partial_document(doc: &ExportDocument) -> ExportDocument {
    ExportDocument {
        description: doc.description.clone(),
        version: doc.version.clone(),
        universe_version: doc.universe_version,
        universe_namespace: doc.universe_namespace.clone(),
        data: Vec::new(),
    }
}

/// Decide everything that can be decided in one sweep through the document.
pub fn first_pass(
    doc: &ExportDocument,
    detectors: &DetectorSelection,
    filters: &BTreeSet<String>,
) -> FirstPass {
    let mut partial = partial_document(doc);
    let mut associations = Vec::new();
    let mut surviving_ids = BTreeSet::new();
    let mut surviving_filters = BTreeSet::new();

    let keep_data_id = |data_id: &Mapping| {
        let detector_ok = data_id
            .get("detector")
            .map(|d| detectors.matches(d))
            .unwrap_or(false);

        let filter_ok = match physical_filter(data_id) {
            None => true,
            Some(f) => filters.contains(&f),
        };

        detector_ok && filter_ok
    };

    for record in &doc.data {
        match (record.kind.as_str(), record.element()) {
            (DIMENSION, Some("instrument")) | (DIMENSION, Some("physical_filter")) => {
                partial.data.push(record.clone());
            }

            (DIMENSION, Some("detector")) => {
                let rows = record
                    .rows()
                    .iter()
                    .filter(|row| {
                        row.as_map()
                            .map(|r| detectors.matches_dimension_row(r))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                partial.data.push(record.with_rows(rows));
            }

            (DIMENSION, element) => {
                info!(
                    element = element.unwrap_or("?"),
                    "dropping dimension records that are not trimmed"
                );
            }

            (COLLECTION, _) | (DATASET_TYPE, _) => partial.data.push(record.clone()),

            (DATASET, _) => partial.data.push(trim_dataset_record(
                record,
                keep_data_id,
                &mut surviving_ids,
                &mut surviving_filters,
            )),

            (ASSOCIATIONS, _) => {
                associations.push(record.clone());
                partial.data.push(record.clone());
            }

            (other, _) => info!(kind = other, "dropping record of unrecognized type"),
        }
    }

    FirstPass {
        partial,
        associations,
        surviving_ids,
        surviving_filters,
    }
}

fn prune_ids(ids: &Node, surviving: &BTreeSet<String>) -> Node {
    let items = ids.as_seq().map(Vec::as_slice).unwrap_or(&[]);

    Node::Seq(
        items
            .iter()
            .filter(|id| {
                id.scalar_text()
                    .map(|t| surviving.contains(&t))
                    .unwrap_or(false)
            })
            .map(retag_uuid)
            .collect(),
    )
}

fn retag_timespan(timespan: &Node) -> Node {
    match timespan {
        Node::Map(_) => Node::tagged(TIMESPAN_TAG, timespan.clone()),
        other => other.clone(),
    }
}

/// Rewrite one `associations` record so that it only mentions surviving
/// datasets.
fn finish_association(
    record: Record,
    recorded: &[Record],
    surviving: &BTreeSet<String>,
) -> Result<Record> {
    let collection = record.body.get_str("collection").unwrap_or("?").to_owned();
    let matches = recorded.iter().filter(|r| **r == record).count();

    if matches > 1 {
        return Err(Error::AmbiguousAssociation {
            collection,
            matches,
        });
    }

    let mut body = record.body;

    if let Some(ranges) = body.get("validity_ranges") {
        let ranges = ranges.as_seq().map(Vec::as_slice).unwrap_or(&[]);
        let mut rewritten = Vec::with_capacity(ranges.len());
        let mut any_survivors = false;

        for range in ranges {
            let Some(range) = range.as_map() else {
                continue;
            };

            let ids = prune_ids(range.get("dataset_ids").unwrap_or(&Node::Null), surviving);
            any_survivors |= ids.as_seq().is_some_and(|s| !s.is_empty());

            let mut out = Mapping::new();
            out.insert("timespan", retag_timespan(range.get("timespan").unwrap_or(&Node::Null)));
            out.insert("dataset_ids", ids);
            rewritten.push(Node::Map(out));
        }

        let value = if any_survivors {
            Node::Seq(rewritten)
        } else {
            debug!(%collection, "no validity range keeps any dataset");
            Node::Null
        };

        body.insert("validity_ranges", value);
    }

    if let Some(ids) = body.get("dataset_ids") {
        let pruned = prune_ids(ids, surviving);
        body.insert("dataset_ids", pruned);
    }

    Ok(Record {
        kind: record.kind,
        body,
    })
}

fn finish<F>(first: FirstPass, keep_filter: F) -> Result<ExportDocument>
where
    F: Fn(&str) -> bool,
{
    let FirstPass {
        mut partial,
        associations,
        surviving_ids,
        ..
    } = first;

    partial.data = partial
        .data
        .into_iter()
        .map(|record| {
            if record.kind == DIMENSION && record.element() == Some("physical_filter") {
                let rows = record
                    .rows()
                    .iter()
                    .filter(|row| {
                        row.as_map()
                            .and_then(|r| r.get("name"))
                            .and_then(Node::scalar_text)
                            .map(|name| keep_filter(&name))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Ok(record.with_rows(rows))
            } else if record.kind == ASSOCIATIONS {
                finish_association(record, &associations, &surviving_ids)
            } else {
                Ok(record)
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(partial)
}

/// Settle the filter rows and associations against the survivors of the
/// first pass. Filter rows are kept only if the filter was both requested and
/// used by a surviving dataset.
pub fn second_pass(first: FirstPass, filters: &BTreeSet<String>) -> Result<ExportDocument> {
    let keep: BTreeSet<String> = filters
        .intersection(&first.surviving_filters)
        .cloned()
        .collect();

    finish(first, |name| keep.contains(name))
}

/// Trim an export to the datasets of the selected detectors and filters.
pub fn trim_export(
    doc: &ExportDocument,
    detectors: &DetectorSelection,
    filters: &BTreeSet<String>,
) -> Result<ExportDocument> {
    let first = first_pass(doc, detectors, filters);

    info!(
        datasets = first.surviving_ids.len(),
        filters = ?first.surviving_filters,
        "first pass done"
    );

    second_pass(first, filters)
}

/// Trim a reference-catalog export to the datasets of the given shards. The
/// shards are identified in each `data_id` by `dimension` (e.g. `htm7`).
pub fn trim_refcat_export(
    doc: &ExportDocument,
    shards: &BTreeSet<ShardId>,
    dimension: &str,
) -> Result<ExportDocument> {
    let mut partial = partial_document(doc);
    let mut associations = Vec::new();
    let mut surviving_ids = BTreeSet::new();
    let mut surviving_filters = BTreeSet::new();

    let keep_data_id = |data_id: &Mapping| {
        data_id
            .get(dimension)
            .and_then(Node::as_i64)
            .and_then(|id| ShardId::try_from(id).ok())
            .map(|id| shards.contains(&id))
            .unwrap_or(false)
    };

    for record in &doc.data {
        match record.kind.as_str() {
            DIMENSION | COLLECTION | DATASET_TYPE => partial.data.push(record.clone()),

            DATASET => partial.data.push(trim_dataset_record(
                record,
                keep_data_id,
                &mut surviving_ids,
                &mut surviving_filters,
            )),

            ASSOCIATIONS => {
                associations.push(record.clone());
                partial.data.push(record.clone());
            }

            other => info!(kind = other, "dropping record of unrecognized type"),
        }
    }

    info!(
        shards = shards.len(),
        datasets = surviving_ids.len(),
        "trimmed reference catalog export"
    );

    finish(
        FirstPass {
            partial,
            associations,
            surviving_ids,
            surviving_filters,
        },
        |_| true,
    )
}
