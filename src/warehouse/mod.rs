//! The warehouse write interface and its implementations.
//!
//! The loader and the segmentation engine depend only on the [`Warehouse`] trait.
//! [`MemoryWarehouse`] keeps everything in process and supports failure injection;
//! [`SqliteWarehouse`] (feature `sqlite`) persists a star schema with `rusqlite`.
//!
//! Transactions are explicit: writes (`upsert_fact`, `update_customer_dimension`)
//! require an open transaction, and point reads made inside a transaction observe
//! its uncommitted writes. [`Warehouse::fact_history`] only reads committed data and
//! refuses to run while a transaction is open.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::error::WarehouseError;
use crate::record::{DimCustomer, Dimension, FactHistoryRow, FactSalesRow};

pub use memory::MemoryWarehouse;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteWarehouse;

pub trait Warehouse {
    /// Open the single write transaction.
    fn begin_transaction(&mut self) -> Result<(), WarehouseError>;

    fn commit(&mut self) -> Result<(), WarehouseError>;

    fn rollback(&mut self) -> Result<(), WarehouseError>;

    fn in_transaction(&self) -> bool;

    /// Surrogate key of an existing dimension row, or `None` if it does not exist.
    fn resolve_dimension_key(
        &self,
        dimension: Dimension,
        natural_key: &str,
    ) -> Result<Option<i64>, WarehouseError>;

    fn find_fact(&self, transaction_id: &str) -> Result<Option<FactSalesRow>, WarehouseError>;

    /// Insert the row, or replace the row with the same `transaction_id`.
    fn upsert_fact(&mut self, row: &FactSalesRow) -> Result<(), WarehouseError>;

    /// Every committed fact row with its customer and calendar date.
    ///
    /// Fails with [`WarehouseError::TransactionOpen`] inside a transaction, so no
    /// implementation can leak staged writes into the history.
    fn fact_history(&self) -> Result<Vec<FactHistoryRow>, WarehouseError>;

    fn update_customer_dimension(&mut self, customer: &DimCustomer) -> Result<(), WarehouseError>;

    fn customer(&self, customer_key: i64) -> Result<Option<DimCustomer>, WarehouseError>;

    fn fact_count(&self) -> Result<usize, WarehouseError>;
}
