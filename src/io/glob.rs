//! Batch file discovery.
//!
//! A run usually picks up several daily extracts at once, e.g.
//! `incoming/sales_2024-03-*.csv.gz`. Matches are returned sorted so batches load
//! in a deterministic order (date-stamped names load oldest first).
//!
//! ```no_run
//! use salesflow::io::glob::expand_glob_required;
//!
//! for path in expand_glob_required("incoming/sales_*.csv*")? {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result, bail};
use glob::glob;
use std::path::PathBuf;

/// Expand `pattern` into the sorted list of regular files it matches.
///
/// Directories are skipped. No match is an empty vector, not an error.
///
/// # Errors
/// Returns an error for an invalid pattern or an unreadable directory entry.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("read glob entry for {pattern}"))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Like [`expand_glob`], but zero matches is an error.
///
/// # Errors
/// Everything [`expand_glob`] reports, plus an empty match set.
pub fn expand_glob_required(pattern: &str) -> Result<Vec<PathBuf>> {
    let files = expand_glob(pattern)?;
    if files.is_empty() {
        bail!("no batch files match {pattern}");
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn matches_are_sorted_files_only() -> Result<()> {
        let dir = tempdir()?;
        for name in ["sales_2024-03-02.csv", "sales_2024-03-01.csv", "notes.txt"] {
            fs::write(dir.path().join(name), "x")?;
        }
        fs::create_dir(dir.path().join("sales_archive.csv"))?;

        let pattern = format!("{}/sales_*.csv", dir.path().display());
        let names: Vec<_> = expand_glob(&pattern)?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, ["sales_2024-03-01.csv", "sales_2024-03-02.csv"]);
        Ok(())
    }

    #[test]
    fn required_rejects_empty_match() -> Result<()> {
        let dir = tempdir()?;
        let pattern = format!("{}/*.csv", dir.path().display());
        assert!(expand_glob(&pattern)?.is_empty());
        assert!(expand_glob_required(&pattern).is_err());
        Ok(())
    }
}
