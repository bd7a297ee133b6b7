//! Record types for every stage of the pipeline, from raw rows to warehouse rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One source row as untyped column → value text.
///
/// A column absent from `fields` is *missing*; a present column whose value is
/// blank is *null*. A row the reader could only partly decode keeps what it could
/// read and says why in `malformed`; the validator quarantines such rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based data row number in the source (header excluded).
    pub row: u64,
    pub fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<String>,
}

impl RawRecord {
    pub fn new(row: u64, fields: BTreeMap<String, String>) -> Self {
        Self {
            row,
            fields,
            malformed: None,
        }
    }

    /// A row that cannot be trusted as read, with the reason.
    pub fn malformed(row: u64, fields: BTreeMap<String, String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            fields,
            malformed: Some(reason.into()),
        }
    }

    /// Build a record from `(column, value)` pairs.
    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        row: u64,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self::new(
            row,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// An ordered set of raw records from one extraction run. Unit of atomicity for the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub id: String,
    pub records: Vec<RawRecord>,
    /// SHA-256 of the source file, when the batch came from a file.
    pub fingerprint: Option<String>,
}

impl Batch {
    pub fn new(id: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            id: id.into(),
            records,
            fingerprint: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A row that passed schema validation: identifiers present, amounts numeric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    pub row: u64,
    pub transaction_id: String,
    pub product_id: String,
    pub customer_id: String,
    pub date: NaiveDate,
    pub region_id: String,
    pub revenue: Option<f64>,
    pub quantity: i64,
    pub discount_amount: Option<f64>,
    pub cost: Option<f64>,
    /// The source row, kept so quarantined duplicates reach the sink verbatim.
    #[serde(skip)]
    pub source: RawRecord,
}

/// A validated row with nullable amounts filled by policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub row: u64,
    pub transaction_id: String,
    pub product_id: String,
    pub customer_id: String,
    pub date: NaiveDate,
    pub region_id: String,
    pub revenue: f64,
    pub quantity: i64,
    pub discount_amount: f64,
    pub cost: f64,
}

/// A normalized row plus derived metrics, ready for the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedRecord {
    #[serde(flatten)]
    pub sale: NormalizedRecord,
    pub profit: f64,
    /// Percentage rounded to two decimals; `0.0` when revenue is zero.
    pub profit_margin: f64,
}

/// The four dimensions a fact row references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Product,
    Customer,
    Date,
    Region,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Product,
        Dimension::Customer,
        Dimension::Date,
        Dimension::Region,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Dimension::Product => "product",
            Dimension::Customer => "customer",
            Dimension::Date => "date",
            Dimension::Region => "region",
        }
    }

    /// The natural key a normalized record carries for this dimension.
    pub fn natural_key(self, record: &NormalizedRecord) -> String {
        match self {
            Dimension::Product => record.product_id.clone(),
            Dimension::Customer => record.customer_id.clone(),
            Dimension::Date => date_natural_key(record.date),
            Dimension::Region => record.region_id.clone(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "product" => Ok(Dimension::Product),
            "customer" => Ok(Dimension::Customer),
            "date" => Ok(Dimension::Date),
            "region" => Ok(Dimension::Region),
            other => Err(format!("unknown dimension '{other}'")),
        }
    }
}

/// Natural key of the date dimension (ISO 8601 calendar date).
pub fn date_natural_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Surrogate keys of the four dimension rows a fact references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionKeys {
    pub product_key: i64,
    pub customer_key: i64,
    pub date_key: i64,
    pub region_key: i64,
}

/// A persisted row of the sales fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactSalesRow {
    pub transaction_id: String,
    #[serde(flatten)]
    pub keys: DimensionKeys,
    pub revenue: f64,
    pub quantity: i64,
    pub discount_amount: f64,
    pub cost: f64,
    pub profit: f64,
    pub profit_margin: f64,
    /// Audit timestamp, refreshed whenever the incremental update path rewrites the row.
    pub loaded_at: DateTime<Utc>,
}

impl FactSalesRow {
    pub fn from_transformed(
        record: &TransformedRecord,
        keys: DimensionKeys,
        loaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: record.sale.transaction_id.clone(),
            keys,
            revenue: record.sale.revenue,
            quantity: record.sale.quantity,
            discount_amount: record.sale.discount_amount,
            cost: record.sale.cost,
            profit: record.profit,
            profit_margin: record.profit_margin,
            loaded_at,
        }
    }

    /// Whether `other` carries a change the incremental loader must write.
    ///
    /// Compared: revenue, quantity, discount_amount, cost and the four dimension
    /// keys. Derived profit fields follow from those; `loaded_at` is audit only.
    pub fn differs_from(&self, other: &FactSalesRow) -> bool {
        self.keys != other.keys
            || self.quantity != other.quantity
            || amount_differs(self.revenue, other.revenue)
            || amount_differs(self.discount_amount, other.discount_amount)
            || amount_differs(self.cost, other.cost)
    }
}

const AMOUNT_EPSILON: f64 = 1e-9;

fn amount_differs(a: f64, b: f64) -> bool {
    (a - b).abs() > AMOUNT_EPSILON
}

/// One fact row as seen by the segmentation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactHistoryRow {
    pub customer_key: i64,
    pub customer_id: String,
    pub transaction_id: String,
    pub date: NaiveDate,
    pub revenue: f64,
}

/// Customer dimension row with its RFM-derived attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimCustomer {
    pub customer_key: i64,
    pub customer_id: String,
    pub segment: Option<String>,
    pub lifetime_value: f64,
    pub recency_score: Option<u8>,
    pub frequency_score: Option<u8>,
    pub monetary_score: Option<u8>,
}

impl DimCustomer {
    /// A freshly seeded customer with no scores yet.
    pub fn unscored(customer_key: i64, customer_id: impl Into<String>) -> Self {
        Self {
            customer_key,
            customer_id: customer_id.into(),
            segment: None,
            lifetime_value: 0.0,
            recency_score: None,
            frequency_score: None,
            monetary_score: None,
        }
    }
}

/// Outcome counts of one incremental load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl LoadResult {
    pub const fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}
