//! Derived metrics and post-condition checks.
//!
//! `profit = revenue - cost`, and `profit_margin` is the profit as a percentage of
//! revenue rounded to two decimals. Zero revenue yields a margin of exactly `0.0`
//! rather than a division by zero.

use crate::error::{InvariantViolation, Violation, ViolationKind};
use crate::record::{NormalizedRecord, TransformedRecord};
use std::collections::HashSet;

/// Compute derived fields for every record, then assert the post-conditions.
///
/// # Errors
/// [`InvariantViolation`] listing every record with negative revenue, a repeated
/// `transaction_id`, or a non-finite margin. Nothing is returned partially.
pub fn enrich(records: Vec<NormalizedRecord>) -> Result<Vec<TransformedRecord>, InvariantViolation> {
    let transformed: Vec<TransformedRecord> = records.into_iter().map(derive_metrics).collect();
    let violations = check_postconditions(&transformed);
    if violations.is_empty() {
        Ok(transformed)
    } else {
        Err(InvariantViolation { violations })
    }
}

fn derive_metrics(sale: NormalizedRecord) -> TransformedRecord {
    let profit = sale.revenue - sale.cost;
    let profit_margin = profit_margin(profit, sale.revenue);
    TransformedRecord {
        sale,
        profit,
        profit_margin,
    }
}

/// Margin in percent, rounded to two decimals; `0.0` unless revenue is positive.
pub fn profit_margin(profit: f64, revenue: f64) -> f64 {
    if revenue > 0.0 {
        (profit / revenue * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    }
}

fn check_postconditions(records: &[TransformedRecord]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        let violation = |kind| Violation {
            row: r.sale.row,
            transaction_id: r.sale.transaction_id.clone(),
            kind,
        };
        if r.sale.revenue < 0.0 {
            violations.push(violation(ViolationKind::NegativeRevenue {
                revenue: r.sale.revenue,
            }));
        }
        if !seen.insert(r.sale.transaction_id.as_str()) {
            violations.push(violation(ViolationKind::DuplicateTransactionId));
        }
        if !r.profit_margin.is_finite() {
            violations.push(violation(ViolationKind::NonFiniteMargin));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::normalized_record;

    #[test]
    fn profit_and_rounded_margin() {
        let out = enrich(vec![normalized_record("T1", 300.0, 200.0)]).unwrap();
        assert_eq!(out[0].profit, 100.0);
        assert_eq!(out[0].profit_margin, 33.33);
    }

    #[test]
    fn zero_revenue_margin_is_zero() {
        let out = enrich(vec![normalized_record("T1", 0.0, 12.0)]).unwrap();
        assert_eq!(out[0].profit, -12.0);
        assert_eq!(out[0].profit_margin, 0.0);
        assert!(out[0].profit_margin.is_finite());
    }

    #[test]
    fn loss_gives_negative_margin() {
        assert_eq!(profit_margin(-50.0, 200.0), -25.0);
    }

    #[test]
    fn negative_revenue_is_a_hard_stop() {
        let err = enrich(vec![
            normalized_record("T1", 10.0, 1.0),
            normalized_record("T2", -5.0, 1.0),
        ])
        .unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].transaction_id, "T2");
        assert!(matches!(
            err.violations[0].kind,
            ViolationKind::NegativeRevenue { .. }
        ));
    }

    #[test]
    fn duplicate_ids_are_rechecked() {
        let err = enrich(vec![
            normalized_record("T1", 10.0, 1.0),
            normalized_record("T1", 12.0, 1.0),
        ])
        .unwrap_err();
        assert_eq!(err.violations[0].kind, ViolationKind::DuplicateTransactionId);
        assert!(err.to_string().contains("not unique"));
    }
}
