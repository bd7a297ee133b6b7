//! Test support for code built on the pipeline.
//!
//! - **Fixtures**: raw, validated, normalized and transformed records, the
//!   five-row end-to-end batch, and a [`MemoryWarehouse`](crate::warehouse::MemoryWarehouse)
//!   seeded with matching dimension rows.
//! - **Mock I/O**: [`TempBatchDir`] writes batch files (plain or compressed) into a
//!   throwaway directory.
//!
//! # Quick Start
//!
//! ```
//! use salesflow::testing::*;
//! use salesflow::{Pipeline, PipelineConfig, MemorySink};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! let mut warehouse = seeded_warehouse();
//! let mut sink = MemorySink::new();
//!
//! let report = pipeline
//!     .run_batch(&end_to_end_batch(), &mut warehouse, &mut sink)
//!     .unwrap();
//! assert_eq!(report.load.inserted, 3);
//! assert_eq!(sink.len(), 2);
//! ```

pub mod fixtures;
pub mod mock_io;

pub use fixtures::*;
pub use mock_io::*;
