//! `SQLite` star-schema warehouse.
//!
//! Tables: `dim_product`, `dim_customer`, `dim_date`, `dim_region` and
//! `fact_sales`. Foreign keys are enforced, `fact_sales.transaction_id` is unique,
//! and `revenue` carries a non-negative check, so the database itself rejects the
//! rows the pipeline must never persist.

use super::memory::date_key;
use super::Warehouse;
use crate::error::WarehouseError;
use crate::record::{
    date_natural_key, DimCustomer, Dimension, DimensionKeys, FactHistoryRow, FactSalesRow,
};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS dim_product (
    product_key   INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id    TEXT NOT NULL UNIQUE,
    product_name  TEXT,
    category      TEXT
);

CREATE TABLE IF NOT EXISTS dim_customer (
    customer_key    INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id     TEXT NOT NULL UNIQUE,
    customer_name   TEXT,
    segment         TEXT,
    lifetime_value  REAL NOT NULL DEFAULT 0,
    recency_score   INTEGER CHECK (recency_score BETWEEN 1 AND 5),
    frequency_score INTEGER CHECK (frequency_score BETWEEN 1 AND 5),
    monetary_score  INTEGER CHECK (monetary_score BETWEEN 1 AND 5)
);

CREATE TABLE IF NOT EXISTS dim_date (
    date_key     INTEGER PRIMARY KEY,
    full_date    TEXT NOT NULL UNIQUE,
    year         INTEGER NOT NULL,
    quarter      INTEGER NOT NULL,
    month        INTEGER NOT NULL,
    day          INTEGER NOT NULL,
    day_of_week  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_region (
    region_key   INTEGER PRIMARY KEY AUTOINCREMENT,
    region_id    TEXT NOT NULL UNIQUE,
    region_name  TEXT,
    country      TEXT
);

CREATE TABLE IF NOT EXISTS fact_sales (
    sales_key        INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id   TEXT NOT NULL UNIQUE,
    product_key      INTEGER NOT NULL REFERENCES dim_product(product_key),
    customer_key     INTEGER NOT NULL REFERENCES dim_customer(customer_key),
    date_key         INTEGER NOT NULL REFERENCES dim_date(date_key),
    region_key       INTEGER NOT NULL REFERENCES dim_region(region_key),
    revenue          REAL NOT NULL CHECK (revenue >= 0),
    quantity         INTEGER NOT NULL,
    discount_amount  REAL NOT NULL DEFAULT 0,
    cost             REAL NOT NULL DEFAULT 0,
    profit           REAL NOT NULL,
    profit_margin    REAL NOT NULL,
    loaded_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fact_sales_customer ON fact_sales(customer_key);
CREATE INDEX IF NOT EXISTS idx_fact_sales_date ON fact_sales(date_key);
";

/// Table and natural-key column of a dimension.
const fn dimension_table(dimension: Dimension) -> (&'static str, &'static str, &'static str) {
    match dimension {
        Dimension::Product => ("dim_product", "product_key", "product_id"),
        Dimension::Customer => ("dim_customer", "customer_key", "customer_id"),
        Dimension::Date => ("dim_date", "date_key", "full_date"),
        Dimension::Region => ("dim_region", "region_key", "region_id"),
    }
}

pub struct SqliteWarehouse {
    conn: Connection,
    in_tx: bool,
}

impl SqliteWarehouse {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WarehouseError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, WarehouseError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn, in_tx: false })
    }

    /// Insert a dimension row if absent and return its surrogate key.
    ///
    /// Date natural keys must be ISO dates; their key is `yyyymmdd`.
    pub fn insert_dimension(
        &mut self,
        dimension: Dimension,
        natural_key: &str,
    ) -> Result<i64, WarehouseError> {
        if dimension == Dimension::Date {
            let date = NaiveDate::parse_from_str(natural_key, "%Y-%m-%d").map_err(|e| {
                WarehouseError::Constraint(format!("date key '{natural_key}': {e}"))
            })?;
            return self.insert_date(date);
        }
        let (table, key_col, natural_col) = dimension_table(dimension);
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {table} ({natural_col}) VALUES (?1)"),
            params![natural_key],
        )?;
        let key = self.conn.query_row(
            &format!("SELECT {key_col} FROM {table} WHERE {natural_col} = ?1"),
            params![natural_key],
            |row| row.get(0),
        )?;
        Ok(key)
    }

    /// Add a calendar row with its derived attributes.
    pub fn insert_date(&mut self, date: NaiveDate) -> Result<i64, WarehouseError> {
        let key = date_key(date);
        self.conn.execute(
            "INSERT OR IGNORE INTO dim_date
                 (date_key, full_date, year, quarter, month, day, day_of_week)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key,
                date_natural_key(date),
                date.year(),
                (date.month() - 1) / 3 + 1,
                date.month(),
                date.day(),
                date.weekday().number_from_monday(),
            ],
        )?;
        Ok(key)
    }

    /// Populate the date dimension for every day in `start..=end` in one transaction.
    pub fn insert_date_range(&mut self, start: NaiveDate, end: NaiveDate) -> Result<usize, WarehouseError> {
        let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
        self.conn.execute_batch("BEGIN")?;
        for day in &days {
            if let Err(e) = self.insert_date(*day) {
                self.conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
        }
        self.conn.execute_batch("COMMIT")?;
        debug!(days = days.len(), %start, %end, "seeded date dimension");
        Ok(days.len())
    }
}

fn fact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FactSalesRow> {
    Ok(FactSalesRow {
        transaction_id: row.get(0)?,
        keys: DimensionKeys {
            product_key: row.get(1)?,
            customer_key: row.get(2)?,
            date_key: row.get(3)?,
            region_key: row.get(4)?,
        },
        revenue: row.get(5)?,
        quantity: row.get(6)?,
        discount_amount: row.get(7)?,
        cost: row.get(8)?,
        profit: row.get(9)?,
        profit_margin: row.get(10)?,
        loaded_at: row.get(11)?,
    })
}

fn customer_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DimCustomer> {
    Ok(DimCustomer {
        customer_key: row.get(0)?,
        customer_id: row.get(1)?,
        segment: row.get(2)?,
        lifetime_value: row.get(3)?,
        recency_score: row.get(4)?,
        frequency_score: row.get(5)?,
        monetary_score: row.get(6)?,
    })
}

/// Map driver constraint failures onto the warehouse taxonomy.
fn classify(e: rusqlite::Error) -> WarehouseError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, ref msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            WarehouseError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()))
        }
        other => WarehouseError::Sqlite(other),
    }
}

impl Warehouse for SqliteWarehouse {
    fn begin_transaction(&mut self) -> Result<(), WarehouseError> {
        if self.in_tx {
            return Err(WarehouseError::TransactionOpen);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), WarehouseError> {
        if !self.in_tx {
            return Err(WarehouseError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), WarehouseError> {
        if !self.in_tx {
            return Err(WarehouseError::NoTransaction);
        }
        self.in_tx = false;
        if self.conn.is_autocommit() {
            // SQLite already rolled back on its own (e.g. after a failed COMMIT).
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }

    fn resolve_dimension_key(
        &self,
        dimension: Dimension,
        natural_key: &str,
    ) -> Result<Option<i64>, WarehouseError> {
        let (table, key_col, natural_col) = dimension_table(dimension);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {key_col} FROM {table} WHERE {natural_col} = ?1"
        ))?;
        Ok(stmt
            .query_row(params![natural_key], |row| row.get(0))
            .optional()?)
    }

    fn find_fact(&self, transaction_id: &str) -> Result<Option<FactSalesRow>, WarehouseError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT transaction_id, product_key, customer_key, date_key, region_key,
                    revenue, quantity, discount_amount, cost, profit, profit_margin, loaded_at
             FROM fact_sales WHERE transaction_id = ?1",
        )?;
        Ok(stmt.query_row(params![transaction_id], fact_from_row).optional()?)
    }

    fn upsert_fact(&mut self, row: &FactSalesRow) -> Result<(), WarehouseError> {
        if !self.in_tx {
            return Err(WarehouseError::NoTransaction);
        }
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO fact_sales
                 (transaction_id, product_key, customer_key, date_key, region_key,
                  revenue, quantity, discount_amount, cost, profit, profit_margin, loaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(transaction_id) DO UPDATE SET
                 product_key = excluded.product_key,
                 customer_key = excluded.customer_key,
                 date_key = excluded.date_key,
                 region_key = excluded.region_key,
                 revenue = excluded.revenue,
                 quantity = excluded.quantity,
                 discount_amount = excluded.discount_amount,
                 cost = excluded.cost,
                 profit = excluded.profit,
                 profit_margin = excluded.profit_margin,
                 loaded_at = excluded.loaded_at",
        )?;
        stmt.execute(params![
            row.transaction_id,
            row.keys.product_key,
            row.keys.customer_key,
            row.keys.date_key,
            row.keys.region_key,
            row.revenue,
            row.quantity,
            row.discount_amount,
            row.cost,
            row.profit,
            row.profit_margin,
            row.loaded_at,
        ])
        .map_err(classify)?;
        Ok(())
    }

    fn fact_history(&self) -> Result<Vec<FactHistoryRow>, WarehouseError> {
        if self.in_tx {
            return Err(WarehouseError::TransactionOpen);
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT c.customer_key, c.customer_id, f.transaction_id, d.full_date, f.revenue
             FROM fact_sales f
             JOIN dim_customer c ON c.customer_key = f.customer_key
             JOIN dim_date d ON d.date_key = f.date_key
             ORDER BY f.transaction_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FactHistoryRow {
                customer_key: row.get(0)?,
                customer_id: row.get(1)?,
                transaction_id: row.get(2)?,
                date: row.get(3)?,
                revenue: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn update_customer_dimension(&mut self, customer: &DimCustomer) -> Result<(), WarehouseError> {
        if !self.in_tx {
            return Err(WarehouseError::NoTransaction);
        }
        let changed = self
            .conn
            .prepare_cached(
                "UPDATE dim_customer
                 SET segment = ?2, lifetime_value = ?3,
                     recency_score = ?4, frequency_score = ?5, monetary_score = ?6
                 WHERE customer_key = ?1",
            )?
            .execute(params![
                customer.customer_key,
                customer.segment,
                customer.lifetime_value,
                customer.recency_score,
                customer.frequency_score,
                customer.monetary_score,
            ])
            .map_err(classify)?;
        if changed == 0 {
            return Err(WarehouseError::Constraint(format!(
                "customer key {} does not exist",
                customer.customer_key
            )));
        }
        Ok(())
    }

    fn customer(&self, customer_key: i64) -> Result<Option<DimCustomer>, WarehouseError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT customer_key, customer_id, segment, lifetime_value,
                    recency_score, frequency_score, monetary_score
             FROM dim_customer WHERE customer_key = ?1",
        )?;
        Ok(stmt
            .query_row(params![customer_key], customer_from_row)
            .optional()?)
    }

    fn fact_count(&self) -> Result<usize, WarehouseError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fact_sales", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seeded() -> (SqliteWarehouse, DimensionKeys) {
        let mut wh = SqliteWarehouse::open_in_memory().unwrap();
        let keys = DimensionKeys {
            product_key: wh.insert_dimension(Dimension::Product, "P1").unwrap(),
            customer_key: wh.insert_dimension(Dimension::Customer, "C1").unwrap(),
            date_key: wh.insert_dimension(Dimension::Date, "2024-03-01").unwrap(),
            region_key: wh.insert_dimension(Dimension::Region, "R1").unwrap(),
        };
        (wh, keys)
    }

    fn fact(id: &str, keys: DimensionKeys, revenue: f64) -> FactSalesRow {
        FactSalesRow {
            transaction_id: id.into(),
            keys,
            revenue,
            quantity: 2,
            discount_amount: 1.5,
            cost: 3.0,
            profit: revenue - 3.0,
            profit_margin: 0.0,
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn insert_dimension_is_idempotent() {
        let (mut wh, keys) = seeded();
        assert_eq!(
            wh.insert_dimension(Dimension::Product, "P1").unwrap(),
            keys.product_key
        );
        assert_eq!(keys.date_key, 20240301);
        assert_eq!(
            wh.resolve_dimension_key(Dimension::Region, "R1").unwrap(),
            Some(keys.region_key)
        );
        assert_eq!(wh.resolve_dimension_key(Dimension::Region, "R9").unwrap(), None);
    }

    #[test]
    fn upsert_round_trips_and_replaces() {
        let (mut wh, keys) = seeded();
        wh.begin_transaction().unwrap();
        wh.upsert_fact(&fact("T1", keys, 10.0)).unwrap();
        wh.upsert_fact(&fact("T1", keys, 12.0)).unwrap();
        wh.commit().unwrap();

        let stored = wh.find_fact("T1").unwrap().unwrap();
        assert_eq!(stored.revenue, 12.0);
        assert_eq!(stored.discount_amount, 1.5);
        assert_eq!(wh.fact_count().unwrap(), 1);

        let history = wh.fact_history().unwrap();
        assert_eq!(history[0].customer_id, "C1");
        assert_eq!(history[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn history_ignores_staged_writes() {
        let (mut wh, keys) = seeded();
        wh.begin_transaction().unwrap();
        wh.upsert_fact(&fact("T1", keys, 10.0)).unwrap();
        assert!(matches!(wh.fact_history(), Err(WarehouseError::TransactionOpen)));
        wh.rollback().unwrap();
        assert!(wh.fact_history().unwrap().is_empty());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let (mut wh, mut keys) = seeded();
        keys.product_key = 4242;
        wh.begin_transaction().unwrap();
        let err = wh.upsert_fact(&fact("T1", keys, 10.0)).unwrap_err();
        assert!(matches!(err, WarehouseError::Constraint(_)), "{err:?}");
        wh.rollback().unwrap();
        assert_eq!(wh.fact_count().unwrap(), 0);
    }

    #[test]
    fn rollback_discards_writes() {
        let (mut wh, keys) = seeded();
        wh.begin_transaction().unwrap();
        wh.upsert_fact(&fact("T1", keys, 10.0)).unwrap();
        wh.rollback().unwrap();
        assert!(wh.find_fact("T1").unwrap().is_none());
    }

    #[test]
    fn customer_scores_are_updated() {
        let (mut wh, keys) = seeded();
        let mut customer = wh.customer(keys.customer_key).unwrap().unwrap();
        assert_eq!(customer.segment, None);
        customer.segment = Some("Champions".into());
        customer.recency_score = Some(5);
        customer.frequency_score = Some(4);
        customer.monetary_score = Some(4);
        customer.lifetime_value = 99.5;

        wh.begin_transaction().unwrap();
        wh.update_customer_dimension(&customer).unwrap();
        wh.commit().unwrap();
        assert_eq!(wh.customer(keys.customer_key).unwrap().unwrap(), customer);
    }

    #[test]
    fn date_range_seeding_counts_days() {
        let mut wh = SqliteWarehouse::open_in_memory().unwrap();
        let start = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(wh.insert_date_range(start, end).unwrap(), 5);
        assert_eq!(
            wh.resolve_dimension_key(Dimension::Date, "2024-02-29").unwrap(),
            Some(20240229)
        );
    }
}
