mod common;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use common::{gzip, write};
use testdata_tools::{
    export::{to_yaml_string, write_to_path, Node, Record},
    parse_detector_list, trim_export, trim_refcat_export, DetectorSelection, DetectorTable, Error,
    ExportDocument,
};

const G: &str = "g DECam SDSS c0001 4720.0 1520.0";
const I: &str = "i DECam SDSS c0003 7835.0 1470.0";

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

fn trim(doc: &ExportDocument, detectors: &str, filters: Option<&str>) -> ExportDocument {
    let table = DetectorTable::from_export(doc);
    let selection = DetectorSelection::from_refs(&parse_detector_list(detectors), &table);
    let filters = match filters {
        Some(text) => doc.select_filters(text),
        None => doc.filter_names(),
    };
    trim_export(doc, &selection, &filters).unwrap()
}

fn find<'a>(doc: &'a ExportDocument, kind: &str, key: &str, value: &str) -> &'a Record {
    doc.data
        .iter()
        .find(|r| r.kind == kind && r.body.get_str(key) == Some(value))
        .unwrap()
}

fn column(record: &Record, key: &str) -> Vec<String> {
    record
        .rows()
        .iter()
        .filter_map(|row| row.as_map()?.get(key)?.scalar_text())
        .collect()
}

fn range_ids(doc: &ExportDocument, collection: &str) -> Vec<Vec<String>> {
    let assoc = find(doc, "associations", "collection", collection);
    assoc
        .body
        .get("validity_ranges")
        .and_then(Node::as_seq)
        .unwrap()
        .iter()
        .map(|range| {
            range
                .as_map()
                .and_then(|r| r.get("dataset_ids"))
                .and_then(Node::as_seq)
                .unwrap()
                .iter()
                .filter_map(Node::scalar_text)
                .collect()
        })
        .collect()
}

#[test]
fn trims_to_one_detector_and_band() {
    let doc = ExportDocument::open(data("calibs.yaml")).unwrap();
    let trimmed = trim(&doc, "S1", Some("g"));

    let detectors = find(&trimmed, "dimension", "element", "detector");
    assert_eq!(column(detectors, "full_name"), ["S1"]);

    let filters = find(&trimmed, "dimension", "element", "physical_filter");
    assert_eq!(column(filters, "name"), [G]);

    let flats = find(&trimmed, "dataset", "dataset_type", "flat");
    assert_eq!(column(flats, "path"), ["DECam/calib/flat/flat_g_S1.fits"]);

    let biases = find(&trimmed, "dataset", "dataset_type", "bias");
    assert_eq!(column(biases, "path"), ["DECam/calib/bias/bias_S1.fits"]);

    assert_eq!(
        range_ids(&trimmed, "DECam/calib"),
        [
            vec!["1b2c7a5e-9f43-4d0e-8a55-0a1f5d2e0001".to_owned()],
            vec!["1b2c7a5e-9f43-4d0e-8a55-0a1f5d2e0005".to_owned()],
        ]
    );

    // Record kinds and their order survive.
    let kinds = |d: &ExportDocument| d.data.iter().map(|r| r.kind.clone()).collect::<Vec<_>>();
    assert_eq!(kinds(&trimmed), kinds(&doc));
}

#[test]
fn trimming_through_a_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let doc = ExportDocument::open(data("calibs.yaml")).unwrap();

    let once = trim(&doc, "25,N1", Some("g, i"));
    let path = dir.path().join("trimmed.yaml");
    write_to_path(&once, &path, false).unwrap();

    let reread = ExportDocument::open(&path).unwrap();
    let twice = trim(&reread, "25,N1", Some("g, i"));
    assert_eq!(to_yaml_string(&once), to_yaml_string(&twice));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("description: Butler Data Repository Export\nversion: 1.0.2\n"));
    assert!(text.contains("- !uuid '1b2c7a5e-9f43-4d0e-8a55-0a1f5d2e0001'\n"));
    assert!(text.contains("  - timespan: !lsst.daf.butler.Timespan\n"));
    assert!(!text.contains("flat_g_S2"));
}

#[test]
fn every_filter_by_default() {
    let doc = ExportDocument::open(data("calibs.yaml")).unwrap();
    let trimmed = trim(&doc, "35", None);

    let filters = find(&trimmed, "dimension", "element", "physical_filter");
    assert_eq!(column(filters, "name"), [I]);

    let flats = find(&trimmed, "dataset", "dataset_type", "flat");
    assert_eq!(column(flats, "path"), ["DECam/calib/flat/flat_i_N1.fits"]);
}

#[test]
fn unknown_detectors_select_nothing() {
    let doc = ExportDocument::open(data("calibs.yaml")).unwrap();
    let trimmed = trim(&doc, "S30", None);

    for rec in trimmed.records_of("dataset") {
        assert!(rec.rows().is_empty());
    }

    let detectors = find(&trimmed, "dimension", "element", "detector");
    assert!(detectors.rows().is_empty());
}

#[test]
fn gzipped_exports_read_the_same() {
    let dir = tempfile::tempdir().unwrap();
    let plain = std::fs::read(data("calibs.yaml")).unwrap();
    let gz_path = dir.path().join("calibs.yaml.gz");
    write(&gz_path, &gzip(&plain));

    let a = ExportDocument::open(data("calibs.yaml")).unwrap();
    let b = ExportDocument::open(&gz_path).unwrap();
    assert_eq!(to_yaml_string(&a), to_yaml_string(&b));
}

#[test]
fn refuses_to_clobber_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.yaml");
    write(&path, b"precious");

    let doc = ExportDocument::open(data("calibs.yaml")).unwrap();
    let trimmed = trim(&doc, "S1", None);
    assert!(matches!(
        write_to_path(&trimmed, &path, false),
        Err(Error::OutputExists(_))
    ));
    assert_eq!(std::fs::read(&path).unwrap(), b"precious");

    write_to_path(&trimmed, &path, true).unwrap();
    assert!(ExportDocument::open(&path).is_ok());
}

#[test]
fn refcat_exports_trim_to_shards() {
    let doc = ExportDocument::open(data("refcat.yaml")).unwrap();
    let shards: BTreeSet<u64> = [189584, 200000].into_iter().collect();
    let trimmed = trim_refcat_export(&doc, &shards, "htm7").unwrap();

    let rows = find(&trimmed, "dataset", "dataset_type", "ps1_pv3_3pi_20170110");
    assert_eq!(
        column(rows, "path"),
        [
            "refcats/ps1_pv3_3pi_20170110/189584.fits",
            "refcats/ps1_pv3_3pi_20170110/200000.fits"
        ]
    );

    let tagged = find(&trimmed, "associations", "collection", "refcats");
    let ids: Vec<String> = tagged
        .body
        .get("dataset_ids")
        .and_then(Node::as_seq)
        .unwrap()
        .iter()
        .filter_map(Node::scalar_text)
        .collect();
    assert_eq!(
        ids,
        [
            "7e0f5a4c-1111-4c2e-9d3b-000000189584",
            "7e0f5a4c-1111-4c2e-9d3b-000000200000"
        ]
    );

    assert_eq!(trimmed.records_of("collection").count(), 2);
    assert_eq!(trimmed.records_of("dataset_type").count(), 1);
}
