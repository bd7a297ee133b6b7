//! End-to-end batch runs against the in-memory warehouse.

use anyhow::Result;
use salesflow::testing::*;
use salesflow::*;

#[test]
fn three_valid_one_duplicate_one_negative() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();
    let batch = end_to_end_batch();

    let report = pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;

    assert_eq!(report.load, LoadResult { inserted: 3, updated: 0, skipped: 0 });
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(sink.count(RejectReason::DuplicateTransactionId), 1);
    assert_eq!(sink.count(RejectReason::RangeViolation), 1);

    let ids: Vec<_> = warehouse
        .committed_facts()
        .into_iter()
        .map(|f| f.transaction_id)
        .collect();
    assert_eq!(ids, ["T1", "T2", "T3"]);

    // The first T1 wins; the 999.00 repeat is the quarantined one.
    let t1 = warehouse.find_fact("T1")?.unwrap();
    assert_eq!(t1.revenue, 120.0);
    assert_eq!(t1.profit, 80.0);
    assert_eq!(t1.profit_margin, 66.67);
    let dup = &sink.rejections()[1];
    assert_eq!(dup.record.get("revenue"), Some("999.00"));
    Ok(())
}

#[test]
fn every_record_is_accounted_for() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();
    let mut batch = end_to_end_batch();
    let mut missing = sample_raw_record(6, "T5", "C5", "2024-03-02", "10");
    missing.fields.remove("quantity");
    batch.records.push(missing);
    batch
        .records
        .push(sample_raw_record(7, "T6", "", "2024-03-02", "10"));

    let report = pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;
    assert_eq!(sink.len() + report.loaded(), batch.len());
    assert_eq!(report.quarantined(), sink.len());
    assert_eq!(sink.count(RejectReason::MissingColumn), 1);
    assert_eq!(sink.count(RejectReason::NullViolation), 1);
    Ok(())
}

#[test]
fn rerun_of_same_batch_skips_everything() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();
    let batch = end_to_end_batch();

    pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;
    let second = pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;
    assert_eq!(second.load, LoadResult { inserted: 0, updated: 0, skipped: 3 });
    assert_eq!(warehouse.fact_count()?, 3);
    Ok(())
}

#[test]
fn reject_policy_halts_batch_on_negative_revenue() -> Result<()> {
    let config = PipelineConfig {
        negative_revenue: NegativeRevenuePolicy::Reject,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config)?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();

    let failure = pipeline
        .run_batch(&end_to_end_batch(), &mut warehouse, &mut sink)
        .unwrap_err();
    let PipelineError::InvariantViolation(violation) = &failure.error else {
        panic!("expected invariant violation, got {}", failure.error);
    };
    assert_eq!(violation.violations[0].transaction_id, "T4");
    assert!(failure.context.first_failures[0].contains("negative revenue"));
    assert_eq!(warehouse.fact_count()?, 0);
    Ok(())
}

#[test]
fn unknown_dimension_fails_the_whole_batch() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();
    let mut batch = end_to_end_batch();
    batch
        .records
        .push(sample_raw_record(6, "T9", "C99", "2024-03-01", "10"));

    let failure = pipeline
        .run_batch(&batch, &mut warehouse, &mut sink)
        .unwrap_err();
    assert!(matches!(
        failure.error,
        PipelineError::Load(LoadError::UnresolvedDimension {
            dimension: Dimension::Customer,
            ..
        })
    ));
    assert_eq!(failure.context.batch_id, batch.id);
    assert!(warehouse.committed_facts().is_empty());
    assert_eq!(warehouse.rollbacks(), 1);
    Ok(())
}

#[test]
fn committed_load_rescored_customers() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();

    let report = pipeline.run_batch(&end_to_end_batch(), &mut warehouse, &mut sink)?;
    assert_eq!(
        report.segmentation,
        SegmentationOutcome::Rescored { customers: 3 }
    );
    let scored: Vec<_> = warehouse
        .committed_customers()
        .into_iter()
        .filter(|c| c.segment.is_some())
        .map(|c| c.customer_id)
        .collect();
    assert_eq!(scored, ["C1", "C2", "C3"]);
    Ok(())
}

#[test]
fn failed_segmentation_is_caught_up_by_the_next_batch() -> Result<()> {
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();

    warehouse.faults.customer_update = true;
    let first = Batch::new(
        "sales_2024-03-01",
        vec![sample_raw_record(1, "T1", "C1", "2024-03-01", "10")],
    );
    let report = pipeline.run_batch(&first, &mut warehouse, &mut sink)?;
    assert!(matches!(report.segmentation, SegmentationOutcome::Failed { .. }));
    assert!(warehouse.committed_customers().iter().all(|c| c.segment.is_none()));

    warehouse.faults.customer_update = false;
    let second = Batch::new(
        "sales_2024-03-02",
        vec![sample_raw_record(1, "T2", "C2", "2024-03-02", "20")],
    );
    let report = pipeline.run_batch(&second, &mut warehouse, &mut sink)?;
    assert_eq!(report.segmentation, SegmentationOutcome::Rescored { customers: 2 });

    let c1 = warehouse
        .committed_customers()
        .into_iter()
        .find(|c| c.customer_id == "C1")
        .expect("C1 is seeded");
    assert!(c1.segment.is_some());
    assert_eq!(c1.lifetime_value, 10.0);
    assert_eq!(pipeline.metrics().counter(metrics::SEGMENTATION_FAILURES), 1);
    assert_eq!(pipeline.metrics().counter(metrics::CUSTOMERS_RESCORED), 2);
    Ok(())
}

#[test]
fn run_files_continues_after_a_bad_file() -> Result<()> {
    let dir = TempBatchDir::new()?;
    dir.write_batch(
        "sales_2024-03-01.csv",
        &[sample_raw_record(1, "T1", "C1", "2024-03-01", "10")],
    )?;
    dir.write_batch(
        "sales_2024-03-02.csv",
        &[sample_raw_record(1, "T2", "C1", "bad-date", "10")],
    )?;
    dir.write_batch(
        "sales_2024-03-03.csv.gz",
        &[sample_raw_record(1, "T3", "C2", "2024-03-03", "30")],
    )?;

    let files = salesflow::io::expand_glob_required(&dir.glob("sales_*"))?;
    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = seeded_warehouse();
    let mut sink = MemorySink::new();
    let summary = pipeline.run_files(&files, &mut warehouse, &mut sink);

    assert!(!summary.is_success());
    assert_eq!(summary.committed.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].path.ends_with("sales_2024-03-02.csv"));
    assert_eq!(summary.committed[1].batch_id, "sales_2024-03-03");
    assert!(summary.committed[1].fingerprint.is_some());
    assert_eq!(warehouse.fact_count()?, 2);
    assert_eq!(pipeline.metrics().counter(metrics::BATCHES_COMMITTED), 2);
    assert_eq!(pipeline.metrics().counter(metrics::BATCHES_FAILED), 1);
    Ok(())
}
