//! Incremental, atomic load of a transformed batch into the warehouse.
//!
//! A batch is one transaction. Dimension keys are resolved for the whole batch
//! before the first write, so an unresolved reference fails the batch without
//! touching the fact table. Writes are issued in chunks of `chunk_size`; the
//! rollback scope is still the whole batch.

use crate::config::DEFAULT_LOAD_CHUNK_SIZE;
use crate::error::{LoadError, WarehouseError};
use crate::record::{Dimension, DimensionKeys, FactSalesRow, LoadResult, TransformedRecord};
use crate::warehouse::Warehouse;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct IncrementalLoader {
    chunk_size: usize,
}

impl Default for IncrementalLoader {
    fn default() -> Self {
        Self::new(DEFAULT_LOAD_CHUNK_SIZE)
    }
}

/// What the loader will do with one record.
enum Action {
    Insert(FactSalesRow),
    Update(FactSalesRow),
    Skip,
}

impl IncrementalLoader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Insert new facts, update changed ones and skip unchanged ones in one transaction.
    ///
    /// # Errors
    /// [`LoadError::UnresolvedDimension`] when a natural key has no dimension row,
    /// [`LoadError::Warehouse`] for anything the warehouse refuses. In both cases
    /// the transaction is rolled back and no row of the batch is visible.
    pub fn load<W: Warehouse + ?Sized>(
        &self,
        records: &[TransformedRecord],
        warehouse: &mut W,
    ) -> Result<LoadResult, LoadError> {
        let loaded_at = Utc::now();
        warehouse.begin_transaction()?;

        let outcome = self
            .stage(records, warehouse, loaded_at)
            .and_then(|result| warehouse.commit().map(|()| result).map_err(LoadError::from));

        match outcome {
            Ok(result) => {
                info!(
                    inserted = result.inserted,
                    updated = result.updated,
                    skipped = result.skipped,
                    "batch committed"
                );
                Ok(result)
            }
            Err(e) => {
                if warehouse.in_transaction()
                    && let Err(rollback_err) = warehouse.rollback()
                {
                    error!(error = %rollback_err, "rollback failed");
                }
                error!(error = %e, records = records.len(), "batch rolled back");
                Err(e)
            }
        }
    }

    fn stage<W: Warehouse + ?Sized>(
        &self,
        records: &[TransformedRecord],
        warehouse: &mut W,
        loaded_at: DateTime<Utc>,
    ) -> Result<LoadResult, LoadError> {
        let keys = resolve_keys(records, &*warehouse)?;
        let mut result = LoadResult::default();

        for (idx, chunk) in records.chunks(self.chunk_size).enumerate() {
            let offset = idx * self.chunk_size;
            let mut writes = 0usize;
            for (record, keys) in chunk.iter().zip(&keys[offset..]) {
                match plan(record, *keys, &*warehouse, loaded_at)? {
                    Action::Insert(row) => {
                        warehouse.upsert_fact(&row)?;
                        result.inserted += 1;
                        writes += 1;
                    }
                    Action::Update(row) => {
                        warehouse.upsert_fact(&row)?;
                        result.updated += 1;
                        writes += 1;
                    }
                    Action::Skip => result.skipped += 1,
                }
            }
            debug!(chunk = idx, records = chunk.len(), writes, "wrote chunk");
        }
        Ok(result)
    }
}

fn plan<W: Warehouse + ?Sized>(
    record: &TransformedRecord,
    keys: DimensionKeys,
    warehouse: &W,
    loaded_at: DateTime<Utc>,
) -> Result<Action, WarehouseError> {
    let candidate = FactSalesRow::from_transformed(record, keys, loaded_at);
    Ok(match warehouse.find_fact(&candidate.transaction_id)? {
        None => Action::Insert(candidate),
        Some(existing) if existing.differs_from(&candidate) => Action::Update(candidate),
        Some(_) => Action::Skip,
    })
}

/// Resolve the four surrogate keys of every record, caching lookups per batch.
fn resolve_keys<W: Warehouse + ?Sized>(
    records: &[TransformedRecord],
    warehouse: &W,
) -> Result<Vec<DimensionKeys>, LoadError> {
    let mut cache: HashMap<(Dimension, String), i64> = HashMap::new();
    let mut resolve = |dimension: Dimension, record: &TransformedRecord| -> Result<i64, LoadError> {
        let natural_key = dimension.natural_key(&record.sale);
        if let Some(key) = cache.get(&(dimension, natural_key.clone())) {
            return Ok(*key);
        }
        let key = warehouse
            .resolve_dimension_key(dimension, &natural_key)?
            .ok_or_else(|| LoadError::UnresolvedDimension {
                transaction_id: record.sale.transaction_id.clone(),
                dimension,
                natural_key: natural_key.clone(),
            })?;
        cache.insert((dimension, natural_key), key);
        Ok(key)
    };

    records
        .iter()
        .map(|record| {
            Ok(DimensionKeys {
                product_key: resolve(Dimension::Product, record)?,
                customer_key: resolve(Dimension::Customer, record)?,
                date_key: resolve(Dimension::Date, record)?,
                region_key: resolve(Dimension::Region, record)?,
            })
        })
        .collect()
}
