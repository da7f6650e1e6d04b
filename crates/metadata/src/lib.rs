//! File metadata as a flat, typed map of tag names to values.
//!
//! The [`Extractor`] and [`Writer`] traits are the seams the pipeline talks
//! to; [`Exiftool`] implements both by shelling out to `exiftool`. With the
//! `mock` feature, [`MockTool`] records writes.

pub mod error;
mod exiftool;
#[cfg(feature = "mock")]
mod mock;
mod value;

pub use crate::exiftool::Exiftool;
#[cfg(feature = "mock")]
pub use crate::mock::{MockTool, WrittenTag};
pub use crate::value::{Metadata, Value};
use std::path::Path;
use std::sync::Arc;

/// Reads every tag of a file in one go.
pub trait Extractor {
    fn extract(&self, path: &Path) -> error::Result<Metadata>;
}

/// Writes a single tag to a file, in place.
pub trait Writer {
    fn write_tag(&self, path: &Path, tag: &str, value: &str) -> error::Result<()>;
}

pub type WriterHandle = Arc<dyn Writer + Send + Sync>;
