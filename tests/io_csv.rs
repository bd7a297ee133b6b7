use anyhow::Result;
use salesflow::io::{read_batch, read_raw_records, write_raw_records};
use salesflow::testing::{sample_raw_record, TempBatchDir, SALES_COLUMNS};
use salesflow::{MemorySink, Pipeline, PipelineConfig, RejectReason, Warehouse};

#[test]
fn batch_file_round_trips_fields() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let records = vec![
        sample_raw_record(1, "T1", "C1", "2024-03-01", "120.00"),
        sample_raw_record(2, "T2", "C2", "2024-03-02", ""),
    ];
    let path = dir.write_batch("sales_2024-03-01.csv", &records)?;

    let batch = read_batch(&path)?;
    assert_eq!(batch.id, "sales_2024-03-01");
    assert_eq!(batch.records, records);
    assert_eq!(batch.fingerprint.as_deref().map(str::len), Some(64));
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_batch_reads_like_plain() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let records = vec![sample_raw_record(1, "T1", "C1", "2024-03-01", "5")];
    let plain = read_batch(dir.write_batch("a.csv", &records)?)?;
    let gz = read_batch(dir.write_batch("a.csv.gz", &records)?)?;

    assert_eq!(plain.records, gz.records);
    assert_eq!(gz.id, "a");
    assert_ne!(plain.fingerprint, gz.fingerprint);
    Ok(())
}

#[cfg(feature = "compression-zstd")]
#[test]
fn zstd_batch_is_detected_by_extension() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let records = vec![sample_raw_record(1, "T1", "C1", "2024-03-01", "5")];
    let batch = read_batch(dir.write_batch("daily.csv.zst", &records)?)?;
    assert_eq!(batch.records, records);
    Ok(())
}

#[test]
fn identical_files_share_a_fingerprint() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let records = vec![sample_raw_record(1, "T1", "C1", "2024-03-01", "5")];
    let a = read_batch(dir.write_batch("a.csv", &records)?)?;
    let b = read_batch(dir.write_batch("b.csv", &records)?)?;
    assert_eq!(a.fingerprint, b.fingerprint);
    assert_ne!(a.id, b.id);
    Ok(())
}

#[test]
fn ragged_file_is_quarantined_not_fatal() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let header = SALES_COLUMNS.join(",");
    let path = dir.write_text(
        "ragged.csv",
        &format!(
            "{header}\n\
             T1,P1,C1,2024-03-01,R1,100,1,0,40\n\
             T2,P1,C2,2024-03-01,R1\n"
        ),
    )?;

    let batch = read_batch(&path)?;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.records[1].get("revenue"), None);

    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = salesflow::testing::seeded_warehouse();
    let mut sink = MemorySink::new();
    let report = pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;
    assert_eq!(report.load.inserted, 1);
    assert_eq!(sink.count(RejectReason::MissingColumn), 1);
    Ok(())
}

#[test]
fn undecodable_row_is_quarantined_and_the_rest_load() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let good = |txn: &str| format!("{txn},P1,C1,2024-03-01,R1,100,1,0,40\n");
    let mut bytes = format!("{}\n{}", SALES_COLUMNS.join(","), good("T1")).into_bytes();
    bytes.extend_from_slice(b"T2,P1,C2,2024-03-01,R1,");
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    bytes.extend_from_slice(b",1,0,40\n");
    bytes.extend_from_slice(good("T3").as_bytes());
    let path = dir.path().join("sales_bad.csv");
    std::fs::write(&path, bytes)?;

    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = salesflow::testing::seeded_warehouse();
    let mut sink = MemorySink::new();
    let summary = pipeline.run_files(&[path], &mut warehouse, &mut sink);

    assert!(summary.is_success(), "{:?}", summary.failed);
    assert_eq!(warehouse.fact_count()?, 2);
    assert_eq!(sink.len(), 1);
    let rejection = &sink.rejections()[0];
    assert_eq!(rejection.reason, RejectReason::MalformedRow);
    assert_eq!(rejection.record.get("transaction_id"), Some("T2"));
    assert!(rejection.message.contains("revenue"));
    Ok(())
}

#[test]
fn extra_cells_are_quarantined_not_dropped() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let header = SALES_COLUMNS.join(",");
    // An unquoted comma inside the product id shifts every later cell.
    let path = dir.write_text(
        "shifted.csv",
        &format!(
            "{header}\n\
             T1,P1,C1,2024-03-01,R1,100,1,0,40\n\
             T2,P1,X,C2,2024-03-01,R1,100,1,0,40\n"
        ),
    )?;

    let batch = read_batch(&path)?;
    assert!(batch.records[1].malformed.is_some());

    let pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut warehouse = salesflow::testing::seeded_warehouse();
    let mut sink = MemorySink::new();
    let report = pipeline.run_batch(&batch, &mut warehouse, &mut sink)?;
    assert_eq!(report.load.inserted, 1);
    assert_eq!(sink.count(RejectReason::MalformedRow), 1);
    assert!(warehouse.find_fact("T2")?.is_none());
    Ok(())
}

#[test]
fn missing_file_is_an_error_with_path() {
    let err = read_batch("/definitely/not/here.csv").unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.csv"));
}

#[test]
fn writer_leaves_absent_columns_blank() -> Result<()> {
    let dir = TempBatchDir::new()?;
    let mut record = sample_raw_record(1, "T1", "C1", "2024-03-01", "5");
    record.fields.remove("cost");
    let path = dir.path().join("out.csv");
    write_raw_records(&path, &SALES_COLUMNS, &[record])?;

    let back = read_raw_records(std::fs::File::open(&path)?)?;
    assert_eq!(back[0].get("cost"), Some(""));
    Ok(())
}
