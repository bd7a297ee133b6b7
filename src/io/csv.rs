//! Delimited batch files.
//!
//! Rows are read untyped: every header becomes a column and every cell a string,
//! leaving typing to the validator. Readers are `flexible`, so a short row simply
//! lacks the trailing columns (a *missing* value) instead of failing the whole file.
//! A row with invalid UTF-8 or more cells than the header is kept, lossily decoded,
//! and marked [malformed](RawRecord::malformed) so it is quarantined rather than
//! loaded. Gzip and zstd input is decompressed transparently.

use crate::io::compression::{create_writer, decompressing_reader};
use crate::record::{Batch, RawRecord};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

/// Read every data row of a delimited stream with a header line.
///
/// Row numbers are 1-based and exclude the header. Header names and cells are trimmed.
///
/// # Errors
/// Returns an error when the header is not valid CSV or UTF-8, or the stream
/// cannot be read. Bad rows are marked, not raised.
pub fn read_raw_records<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().context("read CSV header")?.clone();

    let mut out = Vec::new();
    for (i, rec) in rdr.byte_records().enumerate() {
        let row = i as u64 + 1;
        let rec = rec.with_context(|| format!("parse CSV row {row}"))?;
        out.push(decode_row(row, &headers, &rec));
    }
    Ok(out)
}

fn decode_row(row: u64, headers: &csv::StringRecord, rec: &csv::ByteRecord) -> RawRecord {
    let mut defects = Vec::new();
    let mut fields = BTreeMap::new();
    for (idx, cell) in rec.iter().enumerate() {
        let value = match std::str::from_utf8(cell) {
            Ok(v) => v.to_string(),
            Err(_) => {
                let column = headers.get(idx).unwrap_or("?");
                defects.push(format!("invalid UTF-8 in column '{column}'"));
                String::from_utf8_lossy(cell).into_owned()
            }
        };
        if let Some(header) = headers.get(idx) {
            fields.insert(header.to_string(), value);
        }
    }
    if rec.len() > headers.len() {
        let extra: Vec<_> = rec
            .iter()
            .skip(headers.len())
            .map(String::from_utf8_lossy)
            .collect();
        defects.push(format!(
            "row has {} cells but the header has {}; extra: {}",
            rec.len(),
            headers.len(),
            extra.join(",")
        ));
    }

    if defects.is_empty() {
        RawRecord::new(row, fields)
    } else {
        RawRecord::malformed(row, fields, defects.join("; "))
    }
}

/// Read one batch file. The batch id is the file name without `.csv` and
/// compression extensions; the fingerprint is the SHA-256 of the file bytes.
///
/// # Errors
/// Returns an error if the file cannot be read, decompressed or parsed.
pub fn read_batch(path: impl AsRef<Path>) -> Result<Batch> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let fingerprint = format!("{:x}", Sha256::digest(&bytes));

    let reader = decompressing_reader(Cursor::new(bytes), path)
        .with_context(|| format!("decompress {}", path.display()))?;
    let records = read_raw_records(reader).with_context(|| format!("parse {}", path.display()))?;

    let mut batch = Batch::new(batch_id_for(path), records);
    batch.fingerprint = Some(fingerprint);
    debug!(
        batch = %batch.id,
        records = batch.len(),
        path = %path.display(),
        "read batch file"
    );
    Ok(batch)
}

/// File name with any compression suffix and the `.csv` extension removed.
pub fn batch_id_for(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".gz", ".gzip", ".zst", ".zstd", ".csv", ".tsv", ".txt"] {
        if name.to_ascii_lowercase().ends_with(suffix) {
            name.truncate(name.len() - suffix.len());
        }
    }
    name
}

/// Write records under `columns` as a header line. A column a record lacks is written empty.
///
/// Compresses when the extension asks for it. Returns the number of rows written.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_raw_records(
    path: impl AsRef<Path>,
    columns: &[&str],
    records: &[RawRecord],
) -> Result<usize> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_writer(create_writer(path)?);
    wtr.write_record(columns)
        .with_context(|| format!("write header to {}", path.display()))?;
    for rec in records {
        wtr.write_record(columns.iter().map(|c| rec.get(c).unwrap_or("")))
            .with_context(|| format!("write row {} to {}", rec.row, path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(records.len())
}

/// Distinct non-empty values of `column` in a delimited file, in first-seen order.
///
/// Used to seed dimension tables from reference extracts.
///
/// # Errors
/// Returns an error if the file cannot be read or has no such column.
pub fn read_column(path: impl AsRef<Path>, column: &str) -> Result<Vec<String>> {
    let path = path.as_ref();
    let reader = crate::io::compression::open_reader(path)?;
    let records = read_raw_records(reader).with_context(|| format!("parse {}", path.display()))?;
    if let Some(bad) = records.iter().find(|r| r.malformed.is_some()) {
        anyhow::bail!(
            "{} row {}: {}",
            path.display(),
            bad.row,
            bad.malformed.as_deref().unwrap_or_default()
        );
    }
    if let Some(first) = records.first()
        && first.get(column).is_none()
    {
        anyhow::bail!("{} has no column '{column}'", path.display());
    }
    let mut seen = std::collections::HashSet::new();
    Ok(records
        .iter()
        .filter_map(|r| r.get(column))
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_string()))
        .map(str::to_string)
        .collect())
}
