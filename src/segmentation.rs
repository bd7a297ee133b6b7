//! RFM customer segmentation.
//!
//! Reads the committed fact history, scores every customer that has at least one
//! fact row on recency, frequency and monetary value, and writes the scores,
//! segment label and lifetime value back to the customer dimension in its own
//! transaction.
//!
//! # Scoring
//!
//! - Reference date: the configured `as_of`, else the latest fact date.
//! - Recency: days from the customer's latest transaction to the reference date.
//! - Frequency: distinct transactions dated in `(reference - window_days, reference]`.
//! - Monetary: revenue in the same window.
//!
//! Each measure is bucketed into quintiles over the sorted population. Equal
//! values share the bucket of their first sorted position, so scoring never
//! depends on input order. Recency is inverted: the most recent buyers score 5.

use crate::config::SegmentationConfig;
use crate::error::SegmentationError;
use crate::record::{DimCustomer, FactHistoryRow};
use crate::warehouse::Warehouse;
use chrono::{Duration, NaiveDate};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info};

const BUCKETS: usize = 5;

/// Aggregated history of one customer.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerActivity {
    pub customer_key: i64,
    pub customer_id: String,
    pub recency_days: i64,
    pub frequency: usize,
    pub monetary: f64,
    pub lifetime_value: f64,
}

/// R, F and M scores in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfmScores {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentationEngine {
    config: SegmentationConfig,
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Recompute scores for every customer with fact history and return how many were updated.
    ///
    /// # Errors
    /// [`SegmentationError`] when history cannot be read or a customer row cannot be
    /// written. Writes already staged are rolled back; committed fact data is untouched.
    pub fn rescore_customers<W: Warehouse + ?Sized>(
        &self,
        warehouse: &mut W,
    ) -> Result<usize, SegmentationError> {
        let history = warehouse.fact_history()?;
        let Some(reference) = self.reference_date(&history) else {
            debug!("no fact history, nothing to score");
            return Ok(0);
        };
        let activity = aggregate(&history, reference, self.config.window_days);
        let scores = score_population(&activity);

        warehouse.begin_transaction()?;
        let outcome = self
            .write_scores(&activity, &scores, warehouse)
            .and_then(|n| warehouse.commit().map(|()| n).map_err(SegmentationError::from));

        match outcome {
            Ok(updated) => {
                info!(customers = updated, %reference, "customers rescored");
                Ok(updated)
            }
            Err(e) => {
                if warehouse.in_transaction()
                    && let Err(rollback_err) = warehouse.rollback()
                {
                    error!(error = %rollback_err, "segmentation rollback failed");
                }
                Err(e)
            }
        }
    }

    fn reference_date(&self, history: &[FactHistoryRow]) -> Option<NaiveDate> {
        let latest = history.iter().map(|f| f.date).max()?;
        Some(self.config.as_of.unwrap_or(latest))
    }

    fn write_scores<W: Warehouse + ?Sized>(
        &self,
        activity: &[CustomerActivity],
        scores: &[RfmScores],
        warehouse: &mut W,
    ) -> Result<usize, SegmentationError> {
        for (customer, rfm) in activity.iter().zip(scores) {
            let mut row: DimCustomer = warehouse.customer(customer.customer_key)?.ok_or(
                SegmentationError::UnknownCustomer {
                    customer_key: customer.customer_key,
                },
            )?;
            row.recency_score = Some(rfm.recency);
            row.frequency_score = Some(rfm.frequency);
            row.monetary_score = Some(rfm.monetary);
            row.lifetime_value = customer.lifetime_value;
            row.segment = Some(
                self.config
                    .label(rfm.recency, rfm.frequency, rfm.monetary)
                    .to_string(),
            );
            warehouse.update_customer_dimension(&row)?;
        }
        Ok(activity.len())
    }
}

/// Fold fact history into one [`CustomerActivity`] per customer, ordered by key.
pub fn aggregate(
    history: &[FactHistoryRow],
    reference: NaiveDate,
    window_days: u32,
) -> Vec<CustomerActivity> {
    let window_start = reference - Duration::days(i64::from(window_days));

    struct Acc<'a> {
        customer_id: &'a str,
        latest: NaiveDate,
        in_window: BTreeSet<&'a str>,
        monetary: f64,
        lifetime_value: f64,
    }

    let mut by_customer: BTreeMap<i64, Acc<'_>> = BTreeMap::new();
    for fact in history {
        let acc = by_customer.entry(fact.customer_key).or_insert_with(|| Acc {
            customer_id: &fact.customer_id,
            latest: fact.date,
            in_window: BTreeSet::new(),
            monetary: 0.0,
            lifetime_value: 0.0,
        });
        acc.latest = acc.latest.max(fact.date);
        acc.lifetime_value += fact.revenue;
        if fact.date > window_start && fact.date <= reference {
            acc.in_window.insert(&fact.transaction_id);
            acc.monetary += fact.revenue;
        }
    }

    by_customer
        .into_iter()
        .map(|(customer_key, acc)| CustomerActivity {
            customer_key,
            customer_id: acc.customer_id.to_string(),
            recency_days: (reference - acc.latest).num_days().max(0),
            frequency: acc.in_window.len(),
            monetary: acc.monetary,
            lifetime_value: acc.lifetime_value,
        })
        .collect()
}

/// Score every customer against the whole population.
pub fn score_population(activity: &[CustomerActivity]) -> Vec<RfmScores> {
    let recency = quantile_buckets(activity.iter().map(|a| a.recency_days as f64));
    let frequency = quantile_buckets(activity.iter().map(|a| a.frequency as f64));
    let monetary = quantile_buckets(activity.iter().map(|a| a.monetary));

    recency
        .into_iter()
        .zip(frequency)
        .zip(monetary)
        .map(|((r, f), m)| RfmScores {
            recency: (BUCKETS - r) as u8,
            frequency: (f + 1) as u8,
            monetary: (m + 1) as u8,
        })
        .collect()
}

/// Zero-based quintile of each value; ties take the bucket of their first sorted position.
fn quantile_buckets(values: impl Iterator<Item = f64>) -> Vec<usize> {
    let values: Vec<OrderedFloat<f64>> = values.map(OrderedFloat).collect();
    let n = values.len();
    let mut sorted = values.clone();
    sorted.sort_unstable();
    values
        .iter()
        .map(|v| {
            let first = sorted.partition_point(|s| s < v);
            (first * BUCKETS / n).min(BUCKETS - 1)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(customer_key: i64, txn: &str, date: &str, revenue: f64) -> FactHistoryRow {
        FactHistoryRow {
            customer_key,
            customer_id: format!("C{customer_key}"),
            transaction_id: txn.into(),
            date: date.parse().unwrap(),
            revenue,
        }
    }

    #[test]
    fn buckets_share_ties() {
        let buckets = quantile_buckets([5.0, 1.0, 5.0, 3.0, 9.0].into_iter());
        // sorted: 1 3 5 5 9 -> positions 0 1 2 2 4
        assert_eq!(buckets, vec![2, 0, 2, 1, 4]);
    }

    #[test]
    fn single_customer_scores() {
        let activity = aggregate(
            &[fact(1, "T1", "2024-03-01", 10.0)],
            "2024-03-01".parse().unwrap(),
            365,
        );
        let scores = score_population(&activity);
        assert_eq!(
            scores,
            vec![RfmScores {
                recency: 5,
                frequency: 1,
                monetary: 1
            }]
        );
    }

    #[test]
    fn window_limits_frequency_but_not_lifetime_value() {
        let history = [
            fact(1, "T1", "2022-01-01", 100.0),
            fact(1, "T2", "2024-02-01", 10.0),
            fact(1, "T3", "2024-03-01", 5.0),
        ];
        let activity = aggregate(&history, "2024-03-10".parse().unwrap(), 365);
        assert_eq!(activity[0].frequency, 2);
        assert_eq!(activity[0].monetary, 15.0);
        assert_eq!(activity[0].lifetime_value, 115.0);
        assert_eq!(activity[0].recency_days, 9);
    }

    #[test]
    fn most_recent_buyer_gets_top_recency() {
        let history: Vec<_> = (1..=5)
            .map(|k| fact(k, &format!("T{k}"), &format!("2024-03-0{k}"), 10.0 * k as f64))
            .collect();
        let activity = aggregate(&history, "2024-03-05".parse().unwrap(), 365);
        let scores = score_population(&activity);
        assert_eq!(scores[4].recency, 5);
        assert_eq!(scores[0].recency, 1);
        assert_eq!(scores[4].monetary, 5);
        assert_eq!(scores[0].monetary, 1);
        // every customer bought once
        assert!(scores.iter().all(|s| s.frequency == 1));
    }
}
