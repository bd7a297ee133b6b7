//! Batch orchestration: validate → normalize → enrich → load → rescore.
//!
//! A [`Pipeline`] is built once from a [`PipelineConfig`] and then fed batches.
//! Each batch either commits in full or fails with a [`BatchFailure`]
//! carrying its context. Every record that does not reach the loader (schema
//! rejections and duplicate transaction ids) is appended to the error sink first,
//! so `sink rows + loaded rows == batch size` for every batch that gets past
//! validation.
//!
//! Segmentation runs only after a commit, in its own transaction. Its failure is
//! reported in the [`BatchReport`] and logged, never turned into a batch failure.

use crate::config::PipelineConfig;
use crate::enrich::enrich;
use crate::error::{BatchContext, BatchFailure, ConfigError, PipelineError};
use crate::io::read_batch;
use crate::loader::IncrementalLoader;
use crate::metrics::{self, MetricsCollector};
use crate::normalize::Normalizer;
use crate::record::{Batch, LoadResult};
use crate::segmentation::SegmentationEngine;
use crate::sink::ErrorSink;
use crate::validation::{RejectReason, Rejection, Validator};
use crate::warehouse::Warehouse;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Result of the segmentation step that follows a committed load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SegmentationOutcome {
    Rescored { customers: usize },
    /// The load stays committed; the next run rescores again.
    Failed { error: String },
}

/// Summary of one committed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub fingerprint: Option<String>,
    pub total: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub load: LoadResult,
    pub segmentation: SegmentationOutcome,
}

impl BatchReport {
    /// Records that reached the loader.
    pub const fn loaded(&self) -> usize {
        self.load.total()
    }

    /// Records appended to the error sink.
    pub const fn quarantined(&self) -> usize {
        self.rejected + self.duplicates
    }
}

/// A batch file that could not be read or failed in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of [`Pipeline::run_files`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub committed: Vec<BatchReport>,
    pub failed: Vec<FileFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    validator: Validator,
    normalizer: Normalizer,
    loader: IncrementalLoader,
    segmentation: SegmentationEngine,
    metrics: MetricsCollector,
}

impl Pipeline {
    /// Check the configuration and build every stage from it.
    ///
    /// # Errors
    /// [`ConfigError`] for an invalid configuration or identifier pattern.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.check()?;
        Ok(Self {
            validator: Validator::new(&config)?,
            normalizer: Normalizer::new(config.normalize_chunk_size, config.parallel),
            loader: IncrementalLoader::new(config.load_chunk_size),
            segmentation: SegmentationEngine::new(config.segmentation.clone()),
            metrics: MetricsCollector::new(),
            config,
        })
    }

    /// Share an existing collector instead of the pipeline's own.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn segmentation(&self) -> &SegmentationEngine {
        &self.segmentation
    }

    /// Run one batch end to end.
    ///
    /// # Errors
    /// [`BatchFailure`] when the batch halts before or during the load. Nothing of
    /// the batch is committed in that case, though its quarantined records may
    /// already be in the sink.
    pub fn run_batch<W, S>(
        &self,
        batch: &Batch,
        warehouse: &mut W,
        sink: &mut S,
    ) -> Result<BatchReport, BatchFailure>
    where
        W: Warehouse + ?Sized,
        S: ErrorSink + ?Sized,
    {
        self.metrics
            .increment_counter(metrics::RECORDS_READ, batch.len() as u64);
        match self.process(batch, warehouse, sink) {
            Ok(report) => {
                self.metrics.increment_counter(metrics::BATCHES_COMMITTED, 1);
                info!(
                    batch = %report.batch_id,
                    total = report.total,
                    rejected = report.rejected,
                    duplicates = report.duplicates,
                    inserted = report.load.inserted,
                    updated = report.load.updated,
                    skipped = report.load.skipped,
                    "batch complete"
                );
                Ok(report)
            }
            Err(failure) => {
                self.metrics.increment_counter(metrics::BATCHES_FAILED, 1);
                error!(error = %failure.error, context = %failure.context, "batch failed");
                Err(failure)
            }
        }
    }

    fn process<W, S>(
        &self,
        batch: &Batch,
        warehouse: &mut W,
        sink: &mut S,
    ) -> Result<BatchReport, BatchFailure>
    where
        W: Warehouse + ?Sized,
        S: ErrorSink + ?Sized,
    {
        let max_failures = self.config.max_reported_failures;
        let mut context = BatchContext {
            batch_id: batch.id.clone(),
            total: batch.len(),
            ..BatchContext::default()
        };
        let fail = |context: &BatchContext, error: PipelineError| BatchFailure {
            context: context.clone(),
            error,
        };

        // Validate
        let validated = self.validator.validate(batch);
        context.rejected = validated.rejected.len();
        context.first_failures = validated
            .rejected
            .iter()
            .take(max_failures)
            .map(ToString::to_string)
            .collect();
        if !validated.rejected.is_empty() {
            warn!(
                batch = %batch.id,
                rejected = validated.rejected.len(),
                first = %validated.rejected[0],
                "quarantined invalid records"
            );
        }
        self.metrics
            .increment_counter(metrics::RECORDS_REJECTED, validated.rejected.len() as u64);
        quarantine(sink, &validated.rejected).map_err(|e| fail(&context, e.into()))?;

        if validated.valid.is_empty() {
            sink.flush().map_err(|e| fail(&context, e.into()))?;
            return Err(fail(
                &context,
                PipelineError::Schema {
                    rejected: context.rejected,
                },
            ));
        }

        // Normalize
        let normalized = self
            .normalizer
            .normalize(validated.valid)
            .map_err(|e| fail(&context, e.into()))?;
        context.duplicates = normalized.duplicates.len();
        let duplicates: Vec<Rejection> = normalized
            .duplicates
            .into_iter()
            .map(|dup| {
                Rejection::new(
                    &batch.id,
                    RejectReason::DuplicateTransactionId,
                    Some(crate::schema::TRANSACTION_ID),
                    format!("transaction id {} already seen in this batch", dup.transaction_id),
                    dup.source,
                )
            })
            .collect();
        let room = max_failures.saturating_sub(context.first_failures.len());
        context
            .first_failures
            .extend(duplicates.iter().take(room).map(ToString::to_string));
        self.metrics
            .increment_counter(metrics::RECORDS_DUPLICATE, duplicates.len() as u64);
        quarantine(sink, &duplicates).map_err(|e| fail(&context, e.into()))?;
        sink.flush().map_err(|e| fail(&context, e.into()))?;

        // Enrich
        let transformed = enrich(normalized.records).map_err(|violation| {
            let mut context = context.clone();
            context.first_failures = violation
                .violations
                .iter()
                .take(max_failures)
                .map(ToString::to_string)
                .collect();
            fail(&context, violation.into())
        })?;

        // Load
        let load = self
            .loader
            .load(&transformed, warehouse)
            .map_err(|e| fail(&context, e.into()))?;
        self.metrics
            .increment_counter(metrics::FACTS_INSERTED, load.inserted as u64);
        self.metrics
            .increment_counter(metrics::FACTS_UPDATED, load.updated as u64);
        self.metrics
            .increment_counter(metrics::FACTS_SKIPPED, load.skipped as u64);

        let segmentation = self.rescore(warehouse);

        Ok(BatchReport {
            batch_id: batch.id.clone(),
            fingerprint: batch.fingerprint.clone(),
            total: context.total,
            rejected: context.rejected,
            duplicates: context.duplicates,
            load,
            segmentation,
        })
    }

    /// Rescore customers outside any batch. Failures are logged and returned, never raised.
    pub fn rescore<W: Warehouse + ?Sized>(&self, warehouse: &mut W) -> SegmentationOutcome {
        match self.segmentation.rescore_customers(warehouse) {
            Ok(customers) => {
                self.metrics
                    .increment_counter(metrics::CUSTOMERS_RESCORED, customers as u64);
                SegmentationOutcome::Rescored { customers }
            }
            Err(e) => {
                self.metrics
                    .increment_counter(metrics::SEGMENTATION_FAILURES, 1);
                warn!(error = %e, "segmentation failed; committed load is kept");
                SegmentationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Run every file as its own batch, in the given order.
    ///
    /// A file that cannot be read or whose batch fails is recorded in
    /// [`RunSummary::failed`] and the run moves on to the next file.
    pub fn run_files<W, S>(
        &self,
        paths: &[impl AsRef<Path>],
        warehouse: &mut W,
        sink: &mut S,
    ) -> RunSummary
    where
        W: Warehouse + ?Sized,
        S: ErrorSink + ?Sized,
    {
        self.metrics.record_start();
        let mut summary = RunSummary::default();
        for path in paths {
            let path = path.as_ref();
            let outcome = read_batch(path)
                .map_err(|e| format!("{e:#}"))
                .and_then(|batch| {
                    self.run_batch(&batch, warehouse, sink)
                        .map_err(|failure| failure.to_string())
                });
            match outcome {
                Ok(report) => summary.committed.push(report),
                Err(error) => {
                    error!(path = %path.display(), %error, "batch file not loaded");
                    summary.failed.push(FileFailure {
                        path: path.to_path_buf(),
                        error,
                    });
                }
            }
        }
        self.metrics.record_end();
        summary
    }
}

fn quarantine<S: ErrorSink + ?Sized>(sink: &mut S, rejections: &[Rejection]) -> std::io::Result<()> {
    rejections.iter().try_for_each(|r| sink.append(r))
}
