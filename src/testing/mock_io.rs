//! Temporary batch files for I/O tests.

use super::fixtures::SALES_COLUMNS;
use crate::io::write_raw_records;
use crate::record::RawRecord;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory of batch files, deleted on drop.
pub struct TempBatchDir {
    dir: TempDir,
}

impl TempBatchDir {
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `records` under the standard sales header to `name` in this directory.
    ///
    /// A `.gz` or `.zst` name produces a compressed file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_batch(&self, name: &str, records: &[RawRecord]) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        write_raw_records(&path, &SALES_COLUMNS, records)?;
        Ok(path)
    }

    /// Write raw text as-is, for malformed-file tests.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_text(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Glob pattern matching `pattern` inside this directory.
    #[must_use]
    pub fn glob(&self, pattern: &str) -> String {
        format!("{}/{pattern}", self.dir.path().display())
    }
}
