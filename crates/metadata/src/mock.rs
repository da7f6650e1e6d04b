//! In-memory metadata tool for testing.

use crate::error::{ErrorKind, Result};
use crate::Writer;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// A recorded call to [`Writer::write_tag`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenTag {
    pub path: PathBuf,
    pub tag: String,
    pub value: String,
    /// File contents at the time of the write, so tests can check which
    /// working file the tag landed on.
    pub contents: Vec<u8>,
}

/// Records every tag write instead of touching files.
#[derive(Default)]
pub struct MockTool {
    writes: Mutex<Vec<WrittenTag>>,
    fail_writes: bool,
}
impl MockTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent [`Writer::write_tag`] call fail.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn writes(&self) -> Vec<WrittenTag> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Writer for MockTool {
    fn write_tag(&self, path: &Path, tag: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            exn::bail!(ErrorKind::Write(path.to_path_buf()));
        }
        let contents = std::fs::read(path).unwrap_or_default();
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).push(WrittenTag {
            path: path.to_path_buf(),
            tag: tag.to_string(),
            value: value.to_string(),
            contents,
        });
        Ok(())
    }
}
