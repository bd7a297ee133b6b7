//! Pre-built records, batches and warehouses for tests.
//!
//! Every fixture draws from the same small reference data: products `P1`/`P2`,
//! customers `C1`..`C5`, regions `R1`/`R2`, and every date of Q1 2024.

use crate::enrich::profit_margin;
use crate::record::{
    Batch, Dimension, NormalizedRecord, RawRecord, TransformedRecord, ValidatedRecord,
};
use crate::schema;
use crate::warehouse::MemoryWarehouse;
use chrono::NaiveDate;

/// Input columns in file order.
pub const SALES_COLUMNS: [&str; 9] = [
    schema::TRANSACTION_ID,
    schema::PRODUCT_ID,
    schema::CUSTOMER_ID,
    schema::DATE,
    schema::REGION_ID,
    schema::REVENUE,
    schema::QUANTITY,
    schema::DISCOUNT_AMOUNT,
    schema::COST,
];

pub const PRODUCTS: [&str; 2] = ["P1", "P2"];
pub const CUSTOMERS: [&str; 5] = ["C1", "C2", "C3", "C4", "C5"];
pub const REGIONS: [&str; 2] = ["R1", "R2"];

/// First and last seeded calendar dates.
#[must_use]
pub fn seeded_date_range() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap_or_default(),
    )
}

fn fixture_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default()
}

/// A complete raw row for product `P1` in region `R1`, quantity 2, no discount, cost 40.
///
/// ```
/// use salesflow::testing::sample_raw_record;
///
/// let raw = sample_raw_record(1, "T1", "C1", "2024-03-01", "120.00");
/// assert_eq!(raw.get("cost"), Some("40"));
/// ```
#[must_use]
pub fn sample_raw_record(
    row: u64,
    transaction_id: &str,
    customer_id: &str,
    date: &str,
    revenue: &str,
) -> RawRecord {
    RawRecord::from_pairs(
        row,
        [
            (schema::TRANSACTION_ID, transaction_id),
            (schema::PRODUCT_ID, "P1"),
            (schema::CUSTOMER_ID, customer_id),
            (schema::DATE, date),
            (schema::REGION_ID, "R1"),
            (schema::REVENUE, revenue),
            (schema::QUANTITY, "2"),
            (schema::DISCOUNT_AMOUNT, "0"),
            (schema::COST, "40"),
        ],
    )
}

/// The typed counterpart of [`sample_raw_record`] for customer `C1` on 2024-03-01.
#[must_use]
pub fn validated_record(row: u64, transaction_id: &str, revenue: Option<f64>) -> ValidatedRecord {
    let revenue_text = revenue.map(|r| r.to_string()).unwrap_or_default();
    ValidatedRecord {
        row,
        transaction_id: transaction_id.to_string(),
        product_id: "P1".into(),
        customer_id: "C1".into(),
        date: fixture_date(),
        region_id: "R1".into(),
        revenue,
        quantity: 2,
        discount_amount: Some(0.0),
        cost: Some(40.0),
        source: sample_raw_record(row, transaction_id, "C1", "2024-03-01", &revenue_text),
    }
}

#[must_use]
pub fn normalized_record(transaction_id: &str, revenue: f64, cost: f64) -> NormalizedRecord {
    NormalizedRecord {
        row: 1,
        transaction_id: transaction_id.to_string(),
        product_id: "P1".into(),
        customer_id: "C1".into(),
        date: fixture_date(),
        region_id: "R1".into(),
        revenue,
        quantity: 1,
        discount_amount: 0.0,
        cost,
    }
}

/// A load-ready record whose cost is half its revenue.
#[must_use]
pub fn transformed_record(transaction_id: &str, revenue: f64) -> TransformedRecord {
    let sale = normalized_record(transaction_id, revenue, revenue / 2.0);
    let profit = sale.revenue - sale.cost;
    TransformedRecord {
        profit_margin: profit_margin(profit, sale.revenue),
        profit,
        sale,
    }
}

/// Three valid rows, one repeat of `T1` and one negative revenue (`T4`).
///
/// Under the default configuration this loads three facts, quarantines one
/// duplicate and rejects one record.
#[must_use]
pub fn end_to_end_batch() -> Batch {
    Batch::new(
        "sales_2024-03-01",
        vec![
            sample_raw_record(1, "T1", "C1", "2024-03-01", "120.00"),
            sample_raw_record(2, "T2", "C2", "2024-03-01", "80.50"),
            sample_raw_record(3, "T3", "C3", "2024-02-15", "0"),
            sample_raw_record(4, "T1", "C1", "2024-03-01", "999.00"),
            sample_raw_record(5, "T4", "C4", "2024-03-01", "-50"),
        ],
    )
}

/// A [`MemoryWarehouse`] holding the fixture reference data.
#[must_use]
pub fn seeded_warehouse() -> MemoryWarehouse {
    let mut wh = MemoryWarehouse::new();
    for p in PRODUCTS {
        wh.insert_dimension(Dimension::Product, p);
    }
    for c in CUSTOMERS {
        wh.insert_dimension(Dimension::Customer, c);
    }
    for r in REGIONS {
        wh.insert_dimension(Dimension::Region, r);
    }
    let (start, end) = seeded_date_range();
    for day in start.iter_days().take_while(|d| *d <= end) {
        wh.insert_date(day);
    }
    wh
}
