//! In-process warehouse with snapshot transactions and failure injection.

use super::Warehouse;
use crate::error::WarehouseError;
use crate::record::{date_natural_key, DimCustomer, Dimension, FactHistoryRow, FactSalesRow};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
struct State {
    facts: BTreeMap<String, FactSalesRow>,
    customers: BTreeMap<i64, DimCustomer>,
}

/// Faults a test can arm; each fires on every matching call until cleared.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail `upsert_fact` for this transaction id.
    pub upsert_on: Option<String>,
    pub commit: bool,
    pub fact_history: bool,
    pub customer_update: bool,
}

/// A [`Warehouse`] held entirely in memory.
///
/// `begin_transaction` snapshots the committed state; writes go to the snapshot,
/// `commit` publishes it and `rollback` discards it. Dimension rows are seeded
/// with [`insert_dimension`](Self::insert_dimension) outside any transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    dimensions: HashMap<Dimension, BTreeMap<String, i64>>,
    committed: State,
    staged: Option<State>,
    next_key: i64,
    commits: usize,
    rollbacks: usize,
    pub faults: Faults,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension row and return its surrogate key; existing rows keep theirs.
    ///
    /// Date rows use the `yyyymmdd` integer as key when the natural key is an ISO date.
    pub fn insert_dimension(&mut self, dimension: Dimension, natural_key: &str) -> i64 {
        if let Some(key) = self
            .dimensions
            .get(&dimension)
            .and_then(|rows| rows.get(natural_key))
        {
            return *key;
        }
        let key = match dimension {
            Dimension::Date => NaiveDate::parse_from_str(natural_key, "%Y-%m-%d")
                .map(date_key)
                .unwrap_or_else(|_| self.allocate_key()),
            _ => self.allocate_key(),
        };
        self.dimensions
            .entry(dimension)
            .or_default()
            .insert(natural_key.to_string(), key);
        if dimension == Dimension::Customer {
            self.committed
                .customers
                .insert(key, DimCustomer::unscored(key, natural_key));
        }
        key
    }

    pub fn insert_date(&mut self, date: NaiveDate) -> i64 {
        self.insert_dimension(Dimension::Date, &date_natural_key(date))
    }

    /// Committed fact rows, ordered by transaction id.
    pub fn committed_facts(&self) -> Vec<FactSalesRow> {
        self.committed.facts.values().cloned().collect()
    }

    /// Committed customer rows, ordered by surrogate key.
    pub fn committed_customers(&self) -> Vec<DimCustomer> {
        self.committed.customers.values().cloned().collect()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks
    }

    fn allocate_key(&mut self) -> i64 {
        self.next_key += 1;
        self.next_key
    }

    /// State visible to reads: the open transaction's snapshot, else committed.
    fn visible(&self) -> &State {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn staged_mut(&mut self) -> Result<&mut State, WarehouseError> {
        self.staged.as_mut().ok_or(WarehouseError::NoTransaction)
    }

    fn has_dimension_key(&self, dimension: Dimension, key: i64) -> bool {
        self.dimensions
            .get(&dimension)
            .is_some_and(|rows| rows.values().any(|k| *k == key))
    }
}

/// `yyyymmdd` surrogate key for a calendar date.
pub fn date_key(date: NaiveDate) -> i64 {
    use chrono::Datelike;
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

impl Warehouse for MemoryWarehouse {
    fn begin_transaction(&mut self) -> Result<(), WarehouseError> {
        if self.staged.is_some() {
            return Err(WarehouseError::TransactionOpen);
        }
        self.staged = Some(self.committed.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), WarehouseError> {
        if self.staged.is_none() {
            return Err(WarehouseError::NoTransaction);
        }
        if self.faults.commit {
            return Err(WarehouseError::Connection("commit interrupted".into()));
        }
        if let Some(state) = self.staged.take() {
            self.committed = state;
        }
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), WarehouseError> {
        if self.staged.take().is_none() {
            return Err(WarehouseError::NoTransaction);
        }
        self.rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    fn resolve_dimension_key(
        &self,
        dimension: Dimension,
        natural_key: &str,
    ) -> Result<Option<i64>, WarehouseError> {
        Ok(self
            .dimensions
            .get(&dimension)
            .and_then(|rows| rows.get(natural_key))
            .copied())
    }

    fn find_fact(&self, transaction_id: &str) -> Result<Option<FactSalesRow>, WarehouseError> {
        Ok(self.visible().facts.get(transaction_id).cloned())
    }

    fn upsert_fact(&mut self, row: &FactSalesRow) -> Result<(), WarehouseError> {
        if self.faults.upsert_on.as_deref() == Some(row.transaction_id.as_str()) {
            return Err(WarehouseError::Injected(format!(
                "upsert of {}",
                row.transaction_id
            )));
        }
        for (dimension, key) in [
            (Dimension::Product, row.keys.product_key),
            (Dimension::Customer, row.keys.customer_key),
            (Dimension::Date, row.keys.date_key),
            (Dimension::Region, row.keys.region_key),
        ] {
            if !self.has_dimension_key(dimension, key) {
                return Err(WarehouseError::Constraint(format!(
                    "fact {} references missing {dimension} key {key}",
                    row.transaction_id
                )));
            }
        }
        if row.revenue < 0.0 {
            return Err(WarehouseError::Constraint(format!(
                "fact {} has negative revenue",
                row.transaction_id
            )));
        }
        self.staged_mut()?
            .facts
            .insert(row.transaction_id.clone(), row.clone());
        Ok(())
    }

    fn fact_history(&self) -> Result<Vec<FactHistoryRow>, WarehouseError> {
        if self.faults.fact_history {
            return Err(WarehouseError::Connection("fact history read failed".into()));
        }
        if self.in_transaction() {
            return Err(WarehouseError::TransactionOpen);
        }
        let dates: HashMap<i64, &str> = self
            .dimensions
            .get(&Dimension::Date)
            .map(|rows| rows.iter().map(|(n, k)| (*k, n.as_str())).collect())
            .unwrap_or_default();
        let state = &self.committed;
        state
            .facts
            .values()
            .map(|f| {
                let customer = state.customers.get(&f.keys.customer_key).ok_or_else(|| {
                    WarehouseError::Constraint(format!(
                        "fact {} references missing customer {}",
                        f.transaction_id, f.keys.customer_key
                    ))
                })?;
                let date = dates
                    .get(&f.keys.date_key)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .ok_or_else(|| {
                        WarehouseError::Constraint(format!(
                            "fact {} references unknown date key {}",
                            f.transaction_id, f.keys.date_key
                        ))
                    })?;
                Ok(FactHistoryRow {
                    customer_key: customer.customer_key,
                    customer_id: customer.customer_id.clone(),
                    transaction_id: f.transaction_id.clone(),
                    date,
                    revenue: f.revenue,
                })
            })
            .collect()
    }

    fn update_customer_dimension(&mut self, customer: &DimCustomer) -> Result<(), WarehouseError> {
        if self.faults.customer_update {
            return Err(WarehouseError::Injected(format!(
                "update of customer {}",
                customer.customer_id
            )));
        }
        let state = self.staged_mut()?;
        let Some(row) = state.customers.get_mut(&customer.customer_key) else {
            return Err(WarehouseError::Constraint(format!(
                "customer key {} does not exist",
                customer.customer_key
            )));
        };
        *row = customer.clone();
        Ok(())
    }

    fn customer(&self, customer_key: i64) -> Result<Option<DimCustomer>, WarehouseError> {
        Ok(self.visible().customers.get(&customer_key).cloned())
    }

    fn fact_count(&self) -> Result<usize, WarehouseError> {
        Ok(self.visible().facts.len())
    }
}
