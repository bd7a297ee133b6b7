//! De-duplication and null-filling.
//!
//! De-duplication keys on `transaction_id` across the whole batch: the first
//! occurrence wins and later ones are returned as duplicates so the pipeline can
//! quarantine them. Null-filling then runs over fixed-size chunks, optionally on
//! the rayon pool; chunking never changes the output order.

use crate::error::IntegrityError;
use crate::record::{NormalizedRecord, ValidatedRecord};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub records: Vec<NormalizedRecord>,
    /// Later occurrences of an already-seen `transaction_id`, in input order.
    pub duplicates: Vec<ValidatedRecord>,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    chunk_size: usize,
    parallel: bool,
}

impl Normalizer {
    pub fn new(chunk_size: usize, parallel: bool) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            parallel,
        }
    }

    /// De-duplicate and fill nulls.
    ///
    /// # Errors
    /// [`IntegrityError`] when de-duplication leaves zero records.
    pub fn normalize(&self, records: Vec<ValidatedRecord>) -> Result<Normalized, IntegrityError> {
        let input = records.len();
        let (kept, duplicates) = dedup_first_wins(records);

        if !duplicates.is_empty() {
            warn!(
                duplicates = duplicates.len(),
                first = %duplicates[0].transaction_id,
                "dropped duplicate transaction ids"
            );
        }
        if kept.is_empty() {
            return Err(IntegrityError {
                input,
                duplicates: duplicates.len(),
            });
        }

        let fill_chunk = |(idx, chunk): (usize, &[ValidatedRecord])| {
            debug!(chunk = idx, records = chunk.len(), "null-filling chunk");
            chunk.iter().map(fill_nulls).collect::<Vec<_>>()
        };
        let records: Vec<NormalizedRecord> = if self.parallel {
            kept.par_chunks(self.chunk_size)
                .enumerate()
                .flat_map_iter(fill_chunk)
                .collect()
        } else {
            kept.chunks(self.chunk_size)
                .enumerate()
                .flat_map(fill_chunk)
                .collect()
        };

        Ok(Normalized {
            records,
            duplicates,
        })
    }
}

fn dedup_first_wins(records: Vec<ValidatedRecord>) -> (Vec<ValidatedRecord>, Vec<ValidatedRecord>) {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut duplicates = Vec::new();
    for record in records {
        if seen.insert(record.transaction_id.clone()) {
            kept.push(record);
        } else {
            duplicates.push(record);
        }
    }
    (kept, duplicates)
}

/// Missing amounts are treated as zero: no revenue, no discount, no cost.
fn fill_nulls(record: &ValidatedRecord) -> NormalizedRecord {
    NormalizedRecord {
        row: record.row,
        transaction_id: record.transaction_id.clone(),
        product_id: record.product_id.clone(),
        customer_id: record.customer_id.clone(),
        date: record.date,
        region_id: record.region_id.clone(),
        revenue: record.revenue.unwrap_or(0.0),
        quantity: record.quantity,
        discount_amount: record.discount_amount.unwrap_or(0.0),
        cost: record.cost.unwrap_or(0.0),
    }
}
