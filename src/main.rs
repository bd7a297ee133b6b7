//! `salesflow` command-line interface.
//!
//! ```text
//! salesflow init-db --db warehouse.db --from 2024-01-01 --to 2024-12-31
//! salesflow seed --db warehouse.db --dimension product --file products.csv
//! salesflow run --db warehouse.db --input 'incoming/sales_*.csv*'
//! salesflow rescore --db warehouse.db --as-of 2024-03-31
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use salesflow::io::csv::read_column;
use salesflow::io::expand_glob_required;
use salesflow::{
    Dimension, JsonlSink, Pipeline, PipelineConfig, RunLock, SegmentationOutcome, SqliteWarehouse,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "salesflow", version, about = "Batch ETL for daily sales extracts")]
struct Cli {
    /// Run lock file shared by every command; defaults to the warehouse path with a `.lock` suffix
    #[arg(long, global = true)]
    lock: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every batch file matching a glob, one atomic batch per file
    Run {
        /// Glob of batch files, e.g. 'incoming/sales_*.csv.gz'
        #[arg(short, long)]
        input: String,

        /// SQLite warehouse file
        #[arg(long, env = "SALESFLOW_DB")]
        db: PathBuf,

        /// Pipeline configuration (TOML)
        #[arg(short, long, env = "SALESFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Error sink for quarantined records (JSON lines, appended)
        #[arg(long, default_value = "rejected.jsonl")]
        errors: PathBuf,

        /// Write run metrics as JSON to this file
        #[arg(long)]
        metrics: Option<PathBuf>,
    },

    /// Create the warehouse schema and the date dimension
    InitDb {
        #[arg(long, env = "SALESFLOW_DB")]
        db: PathBuf,

        /// First calendar date to seed
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last calendar date to seed
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Seed a dimension from a delimited reference file
    Seed {
        #[arg(long, env = "SALESFLOW_DB")]
        db: PathBuf,

        /// product, customer, region or date
        #[arg(short, long)]
        dimension: Dimension,

        #[arg(short, long)]
        file: PathBuf,

        /// Natural-key column; defaults to `<dimension>_id` (`date` for dates)
        #[arg(long)]
        column: Option<String>,
    },

    /// Recompute RFM scores and segments for every customer
    Rescore {
        #[arg(long, env = "SALESFLOW_DB")]
        db: PathBuf,

        #[arg(short, long, env = "SALESFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Reference date for recency; defaults to the latest fact date
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let lock = cli.lock.as_deref();
    match cli.command {
        Command::Run {
            input,
            db,
            config,
            errors,
            metrics,
        } => run(&input, &db, config.as_deref(), &errors, lock, metrics.as_deref()),
        Command::InitDb { db, from, to } => init_db(&db, lock, from, to),
        Command::Seed {
            db,
            dimension,
            file,
            column,
        } => seed(&db, lock, dimension, &file, column),
        Command::Rescore { db, config, as_of } => rescore(&db, lock, config.as_deref(), as_of),
    }
}

/// Every command that writes the warehouse holds the same run lock.
fn lock_warehouse(db: &Path, lock: Option<&Path>) -> Result<RunLock> {
    match lock {
        Some(path) => RunLock::acquire(path),
        None => RunLock::acquire(db.with_extension("lock")),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn open_warehouse(db: &Path) -> Result<SqliteWarehouse> {
    SqliteWarehouse::open(db).with_context(|| format!("open warehouse {}", db.display()))
}

fn run(
    input: &str,
    db: &Path,
    config: Option<&Path>,
    errors: &Path,
    lock: Option<&Path>,
    metrics: Option<&Path>,
) -> Result<ExitCode> {
    let config = load_config(config)?;
    let files = expand_glob_required(input)?;
    let _lock = lock_warehouse(db, lock)?;

    let pipeline = Pipeline::new(config).context("build pipeline")?;
    let mut warehouse = open_warehouse(db)?;
    let mut sink =
        JsonlSink::open(errors).with_context(|| format!("open error sink {}", errors.display()))?;

    info!(files = files.len(), warehouse = %db.display(), "starting run");
    let summary = pipeline.run_files(&files, &mut warehouse, &mut sink);

    for report in &summary.committed {
        println!(
            "{}: {} records, {} inserted, {} updated, {} skipped, {} rejected, {} duplicates",
            report.batch_id,
            report.total,
            report.load.inserted,
            report.load.updated,
            report.load.skipped,
            report.rejected,
            report.duplicates
        );
        if let SegmentationOutcome::Failed { error } = &report.segmentation {
            warn!(batch = %report.batch_id, %error, "segmentation will be retried next run");
        }
    }
    for failure in &summary.failed {
        eprintln!("FAILED {}: {}", failure.path.display(), failure.error);
    }

    pipeline.metrics().print();
    if let Some(path) = metrics {
        pipeline.metrics().save_to_file(path)?;
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_db(
    db: &Path,
    lock: Option<&Path>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<ExitCode> {
    let _lock = lock_warehouse(db, lock)?;
    let mut warehouse = open_warehouse(db)?;
    info!(warehouse = %db.display(), "schema ready");
    match (from, to) {
        (Some(from), Some(to)) => {
            anyhow::ensure!(from <= to, "--from {from} is after --to {to}");
            let days = warehouse.insert_date_range(from, to)?;
            println!("seeded {days} dates");
        }
        (None, None) => {}
        _ => anyhow::bail!("--from and --to must be given together"),
    }
    Ok(ExitCode::SUCCESS)
}

fn seed(
    db: &Path,
    lock: Option<&Path>,
    dimension: Dimension,
    file: &Path,
    column: Option<String>,
) -> Result<ExitCode> {
    let column = column.unwrap_or_else(|| match dimension {
        Dimension::Date => "date".to_string(),
        other => format!("{other}_id"),
    });
    let keys = read_column(file, &column)?;
    let _lock = lock_warehouse(db, lock)?;
    let mut warehouse = open_warehouse(db)?;
    for key in &keys {
        warehouse
            .insert_dimension(dimension, key)
            .with_context(|| format!("seed {dimension} '{key}'"))?;
    }
    println!("seeded {} {dimension} rows from {}", keys.len(), file.display());
    Ok(ExitCode::SUCCESS)
}

fn rescore(
    db: &Path,
    lock: Option<&Path>,
    config: Option<&Path>,
    as_of: Option<NaiveDate>,
) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    if as_of.is_some() {
        config.segmentation.as_of = as_of;
    }
    let pipeline = Pipeline::new(config).context("build pipeline")?;
    let _lock = lock_warehouse(db, lock)?;
    let mut warehouse = open_warehouse(db)?;
    match pipeline.rescore(&mut warehouse) {
        SegmentationOutcome::Rescored { customers } => {
            println!("rescored {customers} customers");
            Ok(ExitCode::SUCCESS)
        }
        SegmentationOutcome::Failed { error } => {
            eprintln!("segmentation failed: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_commands_respect_the_run_lock() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("warehouse.db");
        let products = dir.path().join("products.csv");
        std::fs::write(&products, "product_id\nP1\n")?;

        let held = lock_warehouse(&db, None)?;
        assert_eq!(held.path(), dir.path().join("warehouse.lock"));

        assert!(init_db(&db, None, None, None).is_err());
        assert!(seed(&db, None, Dimension::Product, &products, None).is_err());
        assert!(rescore(&db, None, None, None).is_err());
        assert!(!db.exists(), "warehouse opened while another run held the lock");

        drop(held);
        init_db(&db, None, None, None)?;
        assert!(db.exists());
        Ok(())
    }
}
