//! Error handling for the shard resolver and the export trimmer.
//!
//! Every failure terminates the current invocation; operators fix their inputs
//! and rerun. So each variant carries enough context to name the offending
//! file, HDU, detector, or record.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("{source_name}: not a readable FITS file: {reason}")]
    FileFormat { source_name: String, reason: String },

    #[error("{source_name}: no detector matching `{detector}`")]
    InvalidDetector {
        source_name: String,
        detector: String,
    },

    #[error(
        "associations for collection `{collection}` matched {matches} records, expected exactly one"
    )]
    AmbiguousAssociation { collection: String, matches: usize },

    #[error(
        "unable to resolve shard file paths without a reference catalog directory; provide --refcat-path"
    )]
    MissingReferenceCatalogPath,

    #[error("malformed export document: {0}")]
    ExportFormat(String),

    #[error("unknown indexer scheme `{0}` (expected HTM, HTM<depth>, GSC1 or GSC64)")]
    UnknownIndexer(String),

    #[error("refusing to overwrite existing file {0}")]
    OutputExists(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a closure that attaches `path` to an I/O error, for use with
    /// `map_err`.
    pub fn io<P: AsRef<Path>>(path: P) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.as_ref().to_owned();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn file_format<S: Into<String>, R: Into<String>>(source_name: S, reason: R) -> Self {
        Error::FileFormat {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Prefix geometry failures with the file and HDU that produced them.
    pub(crate) fn in_hdu(self, source_name: &str, hdu: usize) -> Self {
        match self {
            Error::InvalidGeometry(msg) => {
                Error::InvalidGeometry(format!("{source_name}, HDU {hdu}: {msg}"))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_errors_gain_hdu_context() {
        let err = Error::InvalidGeometry("singular CD matrix".to_owned()).in_hdu("raw.fits", 3);
        assert_eq!(
            err.to_string(),
            "invalid geometry: raw.fits, HDU 3: singular CD matrix"
        );
    }

    #[test]
    fn other_errors_pass_through_context() {
        let err = Error::MissingReferenceCatalogPath.in_hdu("raw.fits", 3);
        assert!(matches!(err, Error::MissingReferenceCatalogPath));
    }

    #[test]
    fn io_errors_name_the_path() {
        let err = Error::io("/no/such/shard.fits")(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(err.to_string().contains("/no/such/shard.fits"));
    }
}
