//! Error taxonomy for the sales ETL pipeline.
//!
//! Per-record problems never show up here: they are quarantined as
//! [`Rejection`](crate::validation::Rejection) values. The types in this module
//! classify failures that stop a whole batch (or, for segmentation, a whole step).

use crate::record::Dimension;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the pipeline stages.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failure raised by a [`Warehouse`](crate::warehouse::Warehouse) implementation.
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// A write or commit was attempted without an open transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// `begin_transaction` was called while another transaction is open.
    #[error("a transaction is already open")]
    TransactionOpen,

    /// A write would break a warehouse constraint (foreign key, check, uniqueness).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The connection to the warehouse was lost mid-operation.
    #[error("connection lost: {0}")]
    Connection(String),

    /// Failure injected by a test double.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Error reported by the `SQLite` driver.
    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Raised by the normalizer when de-duplication leaves nothing to load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("de-duplication left zero records ({duplicates} duplicates of {input} input records)")]
pub struct IntegrityError {
    pub input: usize,
    pub duplicates: usize,
}

/// A single failed post-condition found by the enricher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub row: u64,
    pub transaction_id: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    NegativeRevenue { revenue: f64 },
    DuplicateTransactionId,
    NonFiniteMargin,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::NegativeRevenue { revenue } => write!(
                f,
                "row {} ({}): negative revenue {revenue}",
                self.row, self.transaction_id
            ),
            ViolationKind::DuplicateTransactionId => write!(
                f,
                "row {} ({}): transaction_id is not unique",
                self.row, self.transaction_id
            ),
            ViolationKind::NonFiniteMargin => write!(
                f,
                "row {} ({}): profit_margin is not finite",
                self.row, self.transaction_id
            ),
        }
    }
}

/// Raised by the enricher when a post-condition does not hold. Always batch-fatal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} invariant violation(s), first: {}", .violations.len(), first_violation(.violations))]
pub struct InvariantViolation {
    pub violations: Vec<Violation>,
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Raised by the incremental loader. The batch transaction is always rolled back.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("record {transaction_id} references unknown {dimension} '{natural_key}'")]
    UnresolvedDimension {
        transaction_id: String,
        dimension: Dimension,
        natural_key: String,
    },

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

/// Raised by the segmentation engine. Never affects an already-committed load.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("customer {customer_key} appears in fact history but not in the customer dimension")]
    UnknownCustomer { customer_key: i64 },
}

/// Configuration problems, reported before any batch runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid identifier pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Batch-level failure classification.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Validation quarantined every record of the batch.
    #[error("schema error: no valid records ({rejected} rejected)")]
    Schema { rejected: usize },

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// The error sink could not accept a quarantined record.
    #[error("error sink: {0}")]
    Sink(#[from] std::io::Error),
}

/// Counts and sample failures attached to every batch failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchContext {
    pub batch_id: String,
    pub total: usize,
    pub rejected: usize,
    pub duplicates: usize,
    /// Human-readable descriptions of the first failing records.
    pub first_failures: Vec<String>,
}

impl fmt::Display for BatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch '{}': {} records, {} rejected, {} duplicates",
            self.batch_id, self.total, self.rejected, self.duplicates
        )?;
        if !self.first_failures.is_empty() {
            write!(f, "; first failures: {}", self.first_failures.join("; "))?;
        }
        Ok(())
    }
}

/// A batch that was halted, with the context an operator needs to rerun it.
#[derive(Error, Debug)]
#[error("{context}: {error}")]
pub struct BatchFailure {
    pub context: BatchContext,
    #[source]
    pub error: PipelineError,
}
