//! Append-only destinations for quarantined records.
//!
//! The pipeline writes every [`Rejection`] here and never reads it back. Two sinks
//! ship with the crate: [`MemorySink`] for tests and embedding, and [`JsonlSink`]
//! which appends one JSON object per line to a file for operators.

use crate::validation::{RejectReason, Rejection};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only error sink.
pub trait ErrorSink {
    fn append(&mut self, rejection: &Rejection) -> io::Result<()>;

    /// Make appended records durable. Called once per batch.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink; keeps every rejection in arrival order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    rejections: Vec<Rejection>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rejections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rejections.is_empty()
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Number of rejections per reason code.
    pub fn counts_by_reason(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rejections {
            *counts.entry(r.reason.code()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, reason: RejectReason) -> usize {
        self.rejections.iter().filter(|r| r.reason == reason).count()
    }

    /// Export all rejections as a pretty JSON array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.rejections)
    }
}

impl ErrorSink for MemorySink {
    fn append(&mut self, rejection: &Rejection) -> io::Result<()> {
        self.rejections.push(rejection.clone());
        Ok(())
    }
}

impl fmt::Display for MemorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemorySink({} rejections)", self.len())
    }
}

/// Appends rejections to a JSON Lines file, creating parent directories as needed.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rejections appended through this handle.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl ErrorSink for JsonlSink {
    fn append(&mut self, rejection: &Rejection) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, rejection).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
