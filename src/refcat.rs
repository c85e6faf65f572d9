//! Reference catalogs on disk.
//!
//! A sharded reference catalog is a directory of `<shard id>.fits` files. Once
//! we know which shards some images need, we can list them, copy them
//! somewhere, or write the ECSV manifest that registry ingestion reads.

use serde::Serialize;
use std::{
    collections::BTreeSet,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    index::ShardId,
};

/// Placeholder for the repository root in import manifests.
pub const ROOT_PLACEHOLDER: &str = "{ROOT}";

pub fn shard_filename(id: ShardId) -> String {
    format!("{id}.fits")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShardEntry {
    pub id: ShardId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShardListing {
    pub refcat: String,
    pub shards: Vec<ShardEntry>,
}

impl ShardListing {
    /// An aligned plain-text table with `ID`, `NAME`, and (if known) `PATH`
    /// columns.
    pub fn to_table(&self) -> String {
        let ids: Vec<String> = self.shards.iter().map(|s| s.id.to_string()).collect();
        let has_paths = self.shards.iter().any(|s| s.path.is_some());

        let id_width = ids.iter().map(String::len).fold("ID".len(), usize::max) + 1;
        let name_width = self
            .shards
            .iter()
            .map(|s| s.name.len())
            .fold("NAME".len(), usize::max)
            + 1;

        let mut out = String::new();
        let _ = write!(out, "{:<id_width$}{:<name_width$}", "ID", "NAME");

        if has_paths {
            out.push_str("PATH");
        }

        out = out.trim_end().to_owned();
        out.push('\n');

        for (i, shard) in self.shards.iter().enumerate() {
            let mut line = format!("{:<id_width$}{:<name_width$}", ids[i], shard.name);

            if let Some(p) = &shard.path {
                line.push_str(&p.display().to_string());
            }

            out.push_str(line.trim_end());
            out.push('\n');
        }

        out
    }
}

#[derive(Clone, Debug)]
pub struct ShardCatalog {
    name: String,
    root: Option<PathBuf>,
}

impl ShardCatalog {
    pub fn new<S: Into<String>>(name: S, root: Option<PathBuf>) -> Self {
        ShardCatalog {
            name: name.into(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Where a shard lives, if we know where the catalog is.
    pub fn shard_path(&self, id: ShardId) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join(shard_filename(id)))
    }

    pub fn listing(&self, shards: &BTreeSet<ShardId>) -> ShardListing {
        ShardListing {
            refcat: self.name.clone(),
            shards: shards
                .iter()
                .map(|&id| ShardEntry {
                    id,
                    name: shard_filename(id),
                    path: self.shard_path(id),
                })
                .collect(),
        }
    }

    /// Copy the shard files into `dest`, creating it if needed. Returns the
    /// paths of the copies.
    pub fn copy_shards(&self, shards: &BTreeSet<ShardId>, dest: &Path) -> Result<Vec<PathBuf>> {
        let root = self.root.as_ref().ok_or(Error::MissingReferenceCatalogPath)?;

        fs::create_dir_all(dest).map_err(Error::io(dest))?;
        let mut copied = Vec::with_capacity(shards.len());

        for &id in shards {
            let name = shard_filename(id);
            let src = root.join(&name);
            let dst = dest.join(&name);
            fs::copy(&src, &dst).map_err(Error::io(&src))?;
            debug!(src = %src.display(), dst = %dst.display(), "copied shard");
            copied.push(dst);
        }

        info!(n = copied.len(), dest = %dest.display(), "copied shards");
        Ok(copied)
    }

    /// The ECSV import manifest for `shards`: one row per shard with its
    /// repository-relative file name and its id under `dimension`.
    pub fn import_manifest(&self, shards: &BTreeSet<ShardId>, dimension: &str) -> String {
        let mut out = String::new();
        out.push_str("# %ECSV 1.0\n");
        out.push_str("# ---\n");
        out.push_str("# datatype:\n");
        out.push_str("# - {name: filename, datatype: string}\n");
        let _ = writeln!(out, "# - {{name: {dimension}, datatype: int64}}");
        out.push_str("# schema: astropy-2.0\n");
        let _ = writeln!(out, "filename {dimension}");

        for &id in shards {
            let filename = format!("{ROOT_PLACEHOLDER}/{}/{}", self.name, shard_filename(id));
            let _ = writeln!(out, "{} {id}", ecsv_string(&filename));
        }

        out
    }

    /// Write the import manifest to `<dir>/<catalog name>.ecsv`.
    pub fn write_import_file(
        &self,
        shards: &BTreeSet<ShardId>,
        dimension: &str,
        dir: &Path,
    ) -> Result<PathBuf> {
        let path = dir.join(format!("{}.ecsv", self.name));
        fs::write(&path, self.import_manifest(shards, dimension)).map_err(Error::io(&path))?;
        info!(path = %path.display(), n = shards.len(), "wrote import file");
        Ok(path)
    }
}

/// ECSV cells are space-delimited; quote any that would be split.
fn ecsv_string(s: &str) -> String {
    if s.contains([' ', '"']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}
