//! Schema validation and record quarantine.
//!
//! The [`Validator`] checks every [`RawRecord`] of a batch against the configured
//! [`Schema`]. A record that fails is never an error for the batch: it becomes a
//! [`Rejection`] carrying a [`RejectReason`] code and the original row, which the
//! pipeline appends to an [`ErrorSink`](crate::sink::ErrorSink) for operators.
//!
//! # Example
//!
//! ```
//! use salesflow::validation::{Validator, RejectReason};
//! use salesflow::{PipelineConfig, RawRecord, Batch};
//!
//! let validator = Validator::new(&PipelineConfig::default()).unwrap();
//! let batch = Batch::new("demo", vec![RawRecord::from_pairs(1, [("transaction_id", "T1")])]);
//! let outcome = validator.validate(&batch);
//! assert!(outcome.valid.is_empty());
//! assert_eq!(outcome.rejected[0].reason, RejectReason::MissingColumn);
//! ```

use crate::config::{NegativeRevenuePolicy, PipelineConfig};
use crate::error::ConfigError;
use crate::record::{Batch, RawRecord, ValidatedRecord};
use crate::schema::{self, coerce, Schema, Value};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Classification code attached to every quarantined record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A required column is absent from the row.
    MissingColumn,
    /// A value cannot be coerced to its declared type.
    TypeMismatch,
    /// A non-nullable column is blank.
    NullViolation,
    /// A value is well-typed but outside its allowed range (negative revenue).
    RangeViolation,
    /// A later occurrence of an already-seen `transaction_id`.
    DuplicateTransactionId,
    /// The row could not be read faithfully: bad encoding or more cells than the header.
    MalformedRow,
}

impl RejectReason {
    pub const fn code(self) -> &'static str {
        match self {
            RejectReason::MissingColumn => "missing_column",
            RejectReason::TypeMismatch => "type_mismatch",
            RejectReason::NullViolation => "null_violation",
            RejectReason::RangeViolation => "range_violation",
            RejectReason::DuplicateTransactionId => "duplicate_transaction_id",
            RejectReason::MalformedRow => "malformed_row",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A quarantined record with its reason and the original row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub batch_id: String,
    pub reason: RejectReason,
    /// The offending column, when one can be named.
    pub column: Option<String>,
    pub message: String,
    pub record: RawRecord,
}

impl Rejection {
    pub fn new(
        batch_id: &str,
        reason: RejectReason,
        column: Option<&str>,
        message: impl Into<String>,
        record: RawRecord,
    ) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            reason,
            column: column.map(str::to_string),
            message: message.into(),
            record,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.record.row, self.reason)?;
        if let Some(ref column) = self.column {
            write!(f, " [{column}]")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Valid records in input order, plus everything quarantined.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: Vec<ValidatedRecord>,
    pub rejected: Vec<Rejection>,
}

/// Schema validator with its identifier pattern compiled once.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Schema,
    identifier_pattern: Option<Regex>,
    negative_revenue: NegativeRevenuePolicy,
    chunk_size: usize,
    parallel: bool,
}

impl Validator {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            identifier_pattern: config.schema.compiled_identifier_pattern()?,
            schema: config.schema.clone(),
            negative_revenue: config.negative_revenue,
            chunk_size: config.validate_chunk_size.max(1),
            parallel: config.parallel,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Split a batch into valid records and rejections, preserving input order.
    pub fn validate(&self, batch: &Batch) -> ValidationOutcome {
        let per_chunk = |chunk: &[RawRecord]| -> ValidationOutcome {
            let mut out = ValidationOutcome::default();
            for raw in chunk {
                match self.validate_record(&batch.id, raw) {
                    Ok(record) => out.valid.push(record),
                    Err(rejection) => out.rejected.push(rejection),
                }
            }
            out
        };

        let chunks: Vec<ValidationOutcome> = if self.parallel {
            batch.records.par_chunks(self.chunk_size).map(per_chunk).collect()
        } else {
            batch.records.chunks(self.chunk_size).map(per_chunk).collect()
        };

        let mut outcome = ValidationOutcome::default();
        for (idx, mut chunk) in chunks.into_iter().enumerate() {
            debug!(
                batch = %batch.id,
                chunk = idx,
                valid = chunk.valid.len(),
                rejected = chunk.rejected.len(),
                "validated chunk"
            );
            outcome.valid.append(&mut chunk.valid);
            outcome.rejected.append(&mut chunk.rejected);
        }
        outcome
    }

    /// Validate a single row.
    pub fn validate_record(
        &self,
        batch_id: &str,
        raw: &RawRecord,
    ) -> Result<ValidatedRecord, Rejection> {
        if let Some(ref defect) = raw.malformed {
            return Err(Rejection::new(
                batch_id,
                RejectReason::MalformedRow,
                None,
                defect.clone(),
                raw.clone(),
            ));
        }
        let reject = |reason, column: &str, message: String| {
            Rejection::new(batch_id, reason, Some(column), message, raw.clone())
        };

        let mut typed: HashMap<&str, Value> = HashMap::with_capacity(self.schema.columns.len());
        for spec in &self.schema.columns {
            let Some(value) = raw.get(&spec.name) else {
                return Err(reject(
                    RejectReason::MissingColumn,
                    &spec.name,
                    "required column is absent".into(),
                ));
            };
            if value.trim().is_empty() {
                if spec.nullable {
                    typed.insert(spec.name.as_str(), Value::Null);
                    continue;
                }
                return Err(reject(
                    RejectReason::NullViolation,
                    &spec.name,
                    "value is null".into(),
                ));
            }
            let coerced = coerce(
                value,
                spec.ty,
                &self.schema.date_format,
                self.identifier_pattern.as_ref(),
            )
            .map_err(|e| reject(RejectReason::TypeMismatch, &spec.name, e.0))?;
            typed.insert(spec.name.as_str(), coerced);
        }

        let record = build_record(&typed, raw).map_err(|(reason, column, message)| {
            reject(reason, column, message)
        })?;

        if self.negative_revenue == NegativeRevenuePolicy::Quarantine
            && let Some(revenue) = record.revenue
            && revenue < 0.0
        {
            return Err(reject(
                RejectReason::RangeViolation,
                schema::REVENUE,
                format!("revenue {revenue} is negative"),
            ));
        }
        Ok(record)
    }
}

type BuildFailure = (RejectReason, &'static str, String);

/// Assemble the typed sales record from coerced values.
///
/// The configured schema may omit or retype a sales column; such rows are
/// rejected here rather than reaching later stages.
fn build_record(typed: &HashMap<&str, Value>, raw: &RawRecord) -> Result<ValidatedRecord, BuildFailure> {
    Ok(ValidatedRecord {
        row: raw.row,
        transaction_id: identifier(typed, schema::TRANSACTION_ID)?,
        product_id: identifier(typed, schema::PRODUCT_ID)?,
        customer_id: identifier(typed, schema::CUSTOMER_ID)?,
        date: match typed.get(schema::DATE) {
            Some(Value::Date(d)) => *d,
            other => return Err(unexpected(schema::DATE, other)),
        },
        region_id: identifier(typed, schema::REGION_ID)?,
        revenue: amount(typed, schema::REVENUE)?,
        quantity: match typed.get(schema::QUANTITY) {
            Some(Value::Integer(q)) => *q,
            other => return Err(unexpected(schema::QUANTITY, other)),
        },
        discount_amount: amount(typed, schema::DISCOUNT_AMOUNT)?,
        cost: amount(typed, schema::COST)?,
        source: raw.clone(),
    })
}

fn identifier(typed: &HashMap<&str, Value>, column: &'static str) -> Result<String, BuildFailure> {
    match typed.get(column) {
        Some(Value::Identifier(s)) => Ok(s.clone()),
        other => Err(unexpected(column, other)),
    }
}

/// Nullable amount; a column the schema does not declare counts as null.
fn amount(typed: &HashMap<&str, Value>, column: &'static str) -> Result<Option<f64>, BuildFailure> {
    match typed.get(column) {
        Some(Value::Numeric(v)) => Ok(Some(*v)),
        #[allow(clippy::cast_precision_loss)]
        Some(Value::Integer(v)) => Ok(Some(*v as f64)),
        Some(Value::Null) | None => Ok(None),
        other => Err(unexpected(column, other)),
    }
}

fn unexpected(column: &'static str, value: Option<&Value>) -> BuildFailure {
    match value {
        None => (
            RejectReason::MissingColumn,
            column,
            "column is not declared by the schema".into(),
        ),
        Some(Value::Null) => (RejectReason::NullViolation, column, "value is null".into()),
        Some(v) => (
            RejectReason::TypeMismatch,
            column,
            format!("schema type does not fit the sales record: {v:?}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_raw_record;

    fn validator() -> Validator {
        Validator::new(&PipelineConfig::default()).unwrap()
    }

    #[test]
    fn valid_row_is_typed() {
        let raw = sample_raw_record(1, "T1", "C1", "2024-01-05", "100.0");
        let rec = validator().validate_record("b", &raw).unwrap();
        assert_eq!(rec.transaction_id, "T1");
        assert_eq!(rec.revenue, Some(100.0));
        assert_eq!(rec.quantity, 2);
    }

    #[test]
    fn blank_nullable_amounts_pass_as_none() {
        let mut raw = sample_raw_record(1, "T1", "C1", "2024-01-05", "");
        raw.fields.insert("cost".into(), "  ".into());
        let rec = validator().validate_record("b", &raw).unwrap();
        assert_eq!(rec.revenue, None);
        assert_eq!(rec.cost, None);
    }

    #[test]
    fn reason_codes() {
        let v = validator();

        let mut missing = sample_raw_record(1, "T1", "C1", "2024-01-05", "1");
        missing.fields.remove("region_id");
        let r = v.validate_record("b", &missing).unwrap_err();
        assert_eq!(r.reason, RejectReason::MissingColumn);
        assert_eq!(r.column.as_deref(), Some("region_id"));

        let mut null_id = sample_raw_record(2, "T2", "C1", "2024-01-05", "1");
        null_id.fields.insert("customer_id".into(), String::new());
        assert_eq!(
            v.validate_record("b", &null_id).unwrap_err().reason,
            RejectReason::NullViolation
        );

        let bad_amount = sample_raw_record(3, "T3", "C1", "2024-01-05", "lots");
        assert_eq!(
            v.validate_record("b", &bad_amount).unwrap_err().reason,
            RejectReason::TypeMismatch
        );

        let negative = sample_raw_record(4, "T4", "C1", "2024-01-05", "-3");
        assert_eq!(
            v.validate_record("b", &negative).unwrap_err().reason,
            RejectReason::RangeViolation
        );
    }

    #[test]
    fn malformed_rows_are_quarantined_whole() {
        let mut raw = sample_raw_record(5, "T5", "C1", "2024-01-05", "10");
        raw.malformed = Some("row has 10 cells but the header has 9".into());
        let r = validator().validate_record("b", &raw).unwrap_err();
        assert_eq!(r.reason, RejectReason::MalformedRow);
        assert_eq!(r.column, None);
        assert_eq!(r.record, raw);
        assert!(r.to_string().starts_with("row 5: malformed_row "));
    }

    #[test]
    fn reject_policy_lets_negative_revenue_through() {
        let config = PipelineConfig {
            negative_revenue: NegativeRevenuePolicy::Reject,
            ..PipelineConfig::default()
        };
        let v = Validator::new(&config).unwrap();
        let negative = sample_raw_record(4, "T4", "C1", "2024-01-05", "-3");
        assert_eq!(v.validate_record("b", &negative).unwrap().revenue, Some(-3.0));
    }

    #[test]
    fn parallel_and_sequential_agree_on_order() {
        let records: Vec<RawRecord> = (1..=57)
            .map(|i| {
                let revenue = if i % 7 == 0 { "x".to_string() } else { i.to_string() };
                sample_raw_record(i, &format!("T{i}"), "C1", "2024-01-05", &revenue)
            })
            .collect();
        let batch = Batch::new("b", records);

        let mut config = PipelineConfig {
            validate_chunk_size: 5,
            ..PipelineConfig::default()
        };
        let par = Validator::new(&config).unwrap().validate(&batch);
        config.parallel = false;
        let seq = Validator::new(&config).unwrap().validate(&batch);

        assert_eq!(par.valid, seq.valid);
        assert_eq!(par.rejected, seq.rejected);
        assert_eq!(par.valid.len() + par.rejected.len(), 57);
        assert_eq!(par.rejected.len(), 8);
    }
}
