//! Trim a calibration export down to a few detectors and filters.

use clap::Parser;
use std::{collections::BTreeSet, path::PathBuf};
use tracing::info;

use testdata_tools::{
    export::{write_document, write_to_path},
    parse_detector_list, trim_export, DetectorSelection, DetectorTable, ExportDocument,
};

#[derive(Parser)]
#[command(name = "trim-export")]
#[command(about = "Trim a calibration export to selected detectors and filters")]
struct Cli {
    /// The export YAML (optionally gzipped)
    path: PathBuf,

    /// Detectors to keep (numbers or names, comma-separated)
    detectors: String,

    /// Physical filters or bands to keep, comma-separated (default: all)
    #[arg(long)]
    filters: Option<String>,

    /// Write here instead of to standard output
    #[arg(long, value_name = "FILE")]
    writeto: Option<PathBuf>,

    /// Replace `--writeto` if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Log more
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    testdata_tools::init_logging(cli.verbose);

    let doc = ExportDocument::open(&cli.path)?;

    let table = DetectorTable::from_export(&doc);
    let selection = DetectorSelection::from_refs(&parse_detector_list(&cli.detectors), &table);

    let filters: BTreeSet<String> = match cli.filters.as_deref() {
        Some(text) => doc.select_filters(text),
        None => doc.filter_names(),
    };

    info!(path = %cli.path.display(), ?filters, "trimming export");
    let trimmed = trim_export(&doc, &selection, &filters)?;

    match cli.writeto {
        Some(dest) => {
            write_to_path(&trimmed, &dest, cli.overwrite)?;
            info!(dest = %dest.display(), "wrote trimmed export");
        }

        None => write_document(&trimmed, std::io::stdout().lock())?,
    }

    Ok(())
}
