//! # salesflow
//!
//! A **batch ETL pipeline** for daily sales extracts. Delimited files are
//! validated against a schema, de-duplicated, enriched with profit metrics and
//! loaded incrementally into a star-schema warehouse, one atomic transaction
//! per batch. After every committed load, customers are rescored with RFM
//! (recency, frequency, monetary) segmentation.
//!
//! ## Key Features
//!
//! - **Quarantine, don't crash** - invalid rows and duplicate transaction ids go to an
//!   append-only error sink with a reason code; the rest of the batch proceeds
//! - **Atomic batches** - a batch commits in full or not at all
//! - **Incremental loads** - unchanged facts are skipped, changed ones updated in place
//! - **Deterministic segmentation** - quintile scoring with stable tie handling
//! - **Parallel chunks** - validation and normalization fan out on rayon without
//!   changing output order
//! - **Pluggable warehouse** - an in-memory warehouse for tests and an `SQLite` one
//!   (feature `sqlite`)
//!
//! ## Quick Start
//!
//! ```
//! use salesflow::*;
//! use salesflow::testing::{end_to_end_batch, seeded_warehouse};
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let mut warehouse = seeded_warehouse();
//! let mut sink = MemorySink::new();
//!
//! let report = pipeline.run_batch(&end_to_end_batch(), &mut warehouse, &mut sink)?;
//! assert_eq!(report.loaded(), 3);
//! assert_eq!(report.quarantined(), sink.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! 1. [`validation`] - per-record schema checks; failures become [`Rejection`]s
//! 2. [`normalize`] - first-wins de-duplication on `transaction_id` and null-filling
//! 3. [`enrich`] - `profit`, `profit_margin` and post-condition checks
//! 4. [`loader`] - incremental upsert into the [`Warehouse`] inside one transaction
//! 5. [`segmentation`] - RFM scores and segment labels on the customer dimension
//!
//! [`pipeline::Pipeline`] drives the stages; [`io`] reads batch files;
//! [`config`] holds every tunable and loads from TOML.
//!
//! ## Module Overview
//!
//! - [`record`] - record types from raw row to fact row
//! - [`schema`] - column types and value coercion
//! - [`error`] - failure taxonomy and batch context
//! - [`sink`] - error sinks for quarantined records
//! - [`warehouse`] - the warehouse trait and its implementations
//! - [`lock`] - exclusive run lock
//! - [`metrics`] - run counters and timing
//! - [`testing`] - fixtures and temporary batch files

pub mod config;
pub mod enrich;
pub mod error;
pub mod io;
pub mod loader;
pub mod lock;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod segmentation;
pub mod sink;
pub mod testing;
pub mod validation;
pub mod warehouse;

pub use config::{NegativeRevenuePolicy, PipelineConfig, SegmentRule, SegmentationConfig};
pub use error::{
    BatchContext, BatchFailure, ConfigError, IntegrityError, InvariantViolation, LoadError,
    PipelineError, SegmentationError, WarehouseError,
};
pub use loader::IncrementalLoader;
pub use lock::RunLock;
pub use metrics::MetricsCollector;
pub use normalize::Normalizer;
pub use pipeline::{BatchReport, Pipeline, RunSummary, SegmentationOutcome};
pub use record::{
    Batch, DimCustomer, Dimension, FactSalesRow, LoadResult, NormalizedRecord, RawRecord,
    TransformedRecord, ValidatedRecord,
};
pub use schema::Schema;
pub use segmentation::SegmentationEngine;
pub use sink::{ErrorSink, JsonlSink, MemorySink};
pub use validation::{RejectReason, Rejection, Validator};
pub use warehouse::{MemoryWarehouse, Warehouse};

#[cfg(feature = "sqlite")]
pub use warehouse::SqliteWarehouse;
