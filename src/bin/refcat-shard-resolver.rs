//! List (and optionally copy) the reference-catalog shards that a set of
//! images overlaps.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use testdata_tools::{
    config::{DEFAULT_PIXEL_MARGIN, DEFAULT_REFCAT},
    export::write_to_path,
    collect_input_files, parse_detector_list, trim_refcat_export, ExportDocument, IndexerConfig,
    ResolverConfig,
};

#[derive(Parser)]
#[command(name = "refcat-shard-resolver")]
#[command(about = "Find the reference-catalog shards overlapping some images")]
struct Cli {
    /// A FITS file, or a directory of them
    path: PathBuf,

    /// Name of the reference catalog
    #[arg(long, env = "TESTDATA_REFCAT", default_value = DEFAULT_REFCAT)]
    refcat: String,

    /// Directory holding the reference catalog's shard files
    #[arg(long, env = "TESTDATA_REFCAT_PATH")]
    refcat_path: Option<PathBuf>,

    /// Sky partitioning: HTM, HTM<depth>, GSC1, or GSC64
    #[arg(long, default_value = "HTM7")]
    indexer: IndexerConfig,

    /// Only use these detectors (numbers or names, comma-separated)
    #[arg(long)]
    detectors: Option<String>,

    /// Padding around each detector footprint, in pixels
    #[arg(long, default_value_t = DEFAULT_PIXEL_MARGIN)]
    margin: f64,

    /// Copy the shards here (default: ./<refcat>)
    #[arg(long, num_args = 0..=1, value_name = "DIR")]
    copy: Option<Option<PathBuf>>,

    /// Write an ECSV import manifest into this directory (default: .)
    #[arg(long, num_args = 0..=1, value_name = "DIR")]
    import_file: Option<Option<PathBuf>>,

    /// Trim this reference-catalog export down to the shards found
    #[arg(long, value_name = "YAML", requires = "writeto")]
    trim_export: Option<PathBuf>,

    /// Where to write the trimmed export
    #[arg(long, value_name = "FILE")]
    writeto: Option<PathBuf>,

    /// Print the listing as JSON
    #[arg(long)]
    json: bool,

    /// Log more
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    testdata_tools::init_logging(cli.verbose);

    let config = ResolverConfig {
        refcat: cli.refcat,
        refcat_root: cli.refcat_path,
        indexer: cli.indexer,
        pixel_margin: cli.margin,
    };

    let files = collect_input_files(&cli.path)?;
    info!(n = files.len(), indexer = %config.indexer, "resolving shards");

    let mut resolver = config.resolver()?;

    if let Some(detectors) = cli.detectors.as_deref() {
        resolver = resolver.with_detectors(parse_detector_list(detectors));
    }

    let shards = resolver.resolve_files(&files)?;
    let catalog = config.catalog();
    let listing = catalog.listing(&shards);

    if cli.json {
        serde_json::to_writer_pretty(std::io::stdout().lock(), &listing)?;
        println!();
    } else {
        print!("{}", listing.to_table());
    }

    if let Some(dest) = cli.copy {
        let dest = dest.unwrap_or_else(|| PathBuf::from(catalog.name()));
        catalog.copy_shards(&shards, &dest)?;
    }

    let dimension = resolver.indexer().dimension();

    if let Some(dir) = cli.import_file {
        let dir = dir.unwrap_or_else(|| PathBuf::from("."));
        catalog.write_import_file(&shards, &dimension, &dir)?;
    }

    if let (Some(src), Some(dest)) = (cli.trim_export, cli.writeto) {
        let doc = ExportDocument::open(&src)?;
        let trimmed = trim_refcat_export(&doc, &shards, &dimension)?;
        write_to_path(&trimmed, &dest, true)?;
        info!(dest = %dest.display(), "wrote trimmed export");
    }

    Ok(())
}
