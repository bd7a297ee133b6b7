//! Column schema for incoming sales batches.
//!
//! A [`Schema`] lists the columns a raw record must carry, their declared
//! [`ColumnType`], and whether a blank value is acceptable. The default schema is
//! the daily sales extract:
//!
//! | column            | type       | nullable |
//! |-------------------|------------|----------|
//! | `transaction_id`  | identifier | no       |
//! | `product_id`      | identifier | no       |
//! | `customer_id`     | identifier | no       |
//! | `date`            | date       | no       |
//! | `region_id`       | identifier | no       |
//! | `revenue`         | numeric    | yes      |
//! | `quantity`        | integer    | no       |
//! | `discount_amount` | numeric    | yes      |
//! | `cost`            | numeric    | yes      |

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const TRANSACTION_ID: &str = "transaction_id";
pub const PRODUCT_ID: &str = "product_id";
pub const CUSTOMER_ID: &str = "customer_id";
pub const DATE: &str = "date";
pub const REGION_ID: &str = "region_id";
pub const REVENUE: &str = "revenue";
pub const QUANTITY: &str = "quantity";
pub const DISCOUNT_AMOUNT: &str = "discount_amount";
pub const COST: &str = "cost";

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Identifier,
    Integer,
    Numeric,
    Date,
}

/// A coerced column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Identifier(String),
    Integer(i64),
    Numeric(f64),
    Date(NaiveDate),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn required(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
    /// `chrono` format string for date columns.
    pub date_format: String,
    /// Optional regular expression every identifier must match in full.
    pub identifier_pattern: Option<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::sales()
    }
}

impl Schema {
    /// The daily sales extract schema.
    pub fn sales() -> Self {
        use ColumnType::{Date, Identifier, Integer, Numeric};
        Self {
            columns: vec![
                ColumnSpec::required(TRANSACTION_ID, Identifier),
                ColumnSpec::required(PRODUCT_ID, Identifier),
                ColumnSpec::required(CUSTOMER_ID, Identifier),
                ColumnSpec::required(DATE, Date),
                ColumnSpec::required(REGION_ID, Identifier),
                ColumnSpec::nullable(REVENUE, Numeric),
                ColumnSpec::required(QUANTITY, Integer),
                ColumnSpec::nullable(DISCOUNT_AMOUNT, Numeric),
                ColumnSpec::nullable(COST, Numeric),
            ],
            date_format: "%Y-%m-%d".to_string(),
            identifier_pattern: None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Compile the identifier pattern, anchored to match whole values.
    pub(crate) fn compiled_identifier_pattern(&self) -> Result<Option<Regex>, regex::Error> {
        self.identifier_pattern
            .as_deref()
            .map(|p| Regex::new(&format!("^(?:{p})$")))
            .transpose()
    }
}

/// Why a single value could not be coerced to its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CoercionFailure(pub String);

/// Coerce one raw value. Blank input must be handled by the caller as null.
pub(crate) fn coerce(
    raw: &str,
    ty: ColumnType,
    date_format: &str,
    identifier_pattern: Option<&Regex>,
) -> Result<Value, CoercionFailure> {
    let s = raw.trim();
    match ty {
        ColumnType::Identifier => match identifier_pattern {
            Some(re) if !re.is_match(s) => Err(CoercionFailure(format!(
                "'{s}' does not match identifier pattern {}",
                re.as_str()
            ))),
            _ => Ok(Value::Identifier(s.to_string())),
        },
        ColumnType::Integer => s
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| CoercionFailure(format!("'{s}' is not an integer"))),
        ColumnType::Numeric => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Value::Numeric(v)),
            _ => Err(CoercionFailure(format!("'{s}' is not a finite number"))),
        },
        ColumnType::Date => NaiveDate::parse_from_str(s, date_format)
            .map(Value::Date)
            .map_err(|_| CoercionFailure(format!("'{s}' is not a date in format {date_format}"))),
    }
}
