//! File input: batch discovery, decompression and delimited parsing.

pub mod compression;
pub mod csv;
pub mod glob;

pub use self::csv::{read_batch, read_raw_records, write_raw_records};
pub use self::glob::{expand_glob, expand_glob_required};
