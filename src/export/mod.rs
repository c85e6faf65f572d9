//! Registry export documents: reading, trimming, and writing them back out.

pub mod document;
pub mod emit;
pub mod node;
pub mod trim;

pub use document::{ExportDocument, Record};
pub use emit::{to_yaml_string, write_document, write_to_path};
pub use node::{Mapping, Node};
pub use trim::{first_pass, second_pass, trim_export, trim_refcat_export, FirstPass};
