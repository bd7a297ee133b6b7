//! Pipeline configuration.
//!
//! Every stage receives its settings explicitly from a [`PipelineConfig`];
//! nothing is read from process-global state. Configuration can be built in code
//! or loaded from TOML, where every key is optional:
//!
//! ```toml
//! validate_chunk_size = 10000
//! normalize_chunk_size = 10000
//! load_chunk_size = 1000
//! parallel = true
//! negative_revenue = "quarantine"
//! max_reported_failures = 5
//!
//! [segmentation]
//! window_days = 365
//! as_of = "2024-12-31"
//! fallback_segment = "Needs Attention"
//!
//! [[segmentation.rules]]
//! name = "Champions"
//! recency = { min = 4 }
//! frequency = { min = 4 }
//! monetary = { min = 4 }
//! ```

use crate::error::ConfigError;
use crate::schema::Schema;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_NORMALIZE_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_LOAD_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_MAX_REPORTED_FAILURES: usize = 5;
pub const DEFAULT_WINDOW_DAYS: u32 = 365;

/// Where a negative `revenue` is caught.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeRevenuePolicy {
    /// The validator quarantines the row with reason `range_violation`.
    #[default]
    Quarantine,
    /// The row passes validation and the enricher halts the batch.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub schema: Schema,
    pub validate_chunk_size: usize,
    pub normalize_chunk_size: usize,
    pub load_chunk_size: usize,
    /// Run chunked validation and null-filling on the rayon pool.
    pub parallel: bool,
    pub negative_revenue: NegativeRevenuePolicy,
    /// How many failing records a batch failure reports.
    pub max_reported_failures: usize,
    pub segmentation: SegmentationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: Schema::sales(),
            validate_chunk_size: DEFAULT_NORMALIZE_CHUNK_SIZE,
            normalize_chunk_size: DEFAULT_NORMALIZE_CHUNK_SIZE,
            load_chunk_size: DEFAULT_LOAD_CHUNK_SIZE,
            parallel: true,
            negative_revenue: NegativeRevenuePolicy::default(),
            max_reported_failures: DEFAULT_MAX_REPORTED_FAILURES,
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and check a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    /// Read, parse and check a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject settings no stage can run with.
    pub fn check(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("validate_chunk_size", self.validate_chunk_size),
            ("normalize_chunk_size", self.normalize_chunk_size),
            ("load_chunk_size", self.load_chunk_size),
        ] {
            if size == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.schema.columns.is_empty() {
            return Err(ConfigError::Invalid("schema has no columns".into()));
        }
        self.schema.compiled_identifier_pattern()?;
        self.segmentation.check()
    }
}

/// Inclusive bounds on a 1–5 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreRange {
    pub min: u8,
    pub max: u8,
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: 1, max: 5 }
    }
}

impl ScoreRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub const fn at_least(min: u8) -> Self {
        Self { min, max: 5 }
    }

    pub const fn at_most(max: u8) -> Self {
        Self { min: 1, max }
    }

    pub const fn contains(&self, score: u8) -> bool {
        score >= self.min && score <= self.max
    }
}

/// One ordered segment rule; the first rule whose three ranges all match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRule {
    pub name: String,
    #[serde(default)]
    pub recency: ScoreRange,
    #[serde(default)]
    pub frequency: ScoreRange,
    #[serde(default)]
    pub monetary: ScoreRange,
}

impl SegmentRule {
    pub fn new(name: &str, recency: ScoreRange, frequency: ScoreRange, monetary: ScoreRange) -> Self {
        Self {
            name: name.to_string(),
            recency,
            frequency,
            monetary,
        }
    }

    pub const fn matches(&self, recency: u8, frequency: u8, monetary: u8) -> bool {
        self.recency.contains(recency)
            && self.frequency.contains(frequency)
            && self.monetary.contains(monetary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Length of the trailing window for frequency and monetary, in days.
    pub window_days: u32,
    /// Reference date for recency; defaults to the latest transaction date on record.
    pub as_of: Option<NaiveDate>,
    pub rules: Vec<SegmentRule>,
    /// Label for customers no rule matches.
    pub fallback_segment: String,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        let any = ScoreRange::default();
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            as_of: None,
            rules: vec![
                SegmentRule::new(
                    "Champions",
                    ScoreRange::at_least(4),
                    ScoreRange::at_least(4),
                    ScoreRange::at_least(4),
                ),
                SegmentRule::new("Loyal", ScoreRange::at_least(3), ScoreRange::at_least(3), any),
                SegmentRule::new(
                    "Potential Loyalist",
                    ScoreRange::at_least(4),
                    ScoreRange::at_most(2),
                    any,
                ),
                SegmentRule::new("At Risk", ScoreRange::at_most(2), ScoreRange::at_least(3), any),
                SegmentRule::new("Lost", ScoreRange::new(1, 1), any, any),
            ],
            fallback_segment: "Needs Attention".to_string(),
        }
    }
}

impl SegmentationConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.window_days == 0 {
            return Err(ConfigError::Invalid("segmentation.window_days must be at least 1".into()));
        }
        for rule in &self.rules {
            for (axis, range) in [
                ("recency", rule.recency),
                ("frequency", rule.frequency),
                ("monetary", rule.monetary),
            ] {
                if range.min < 1 || range.max > 5 || range.min > range.max {
                    return Err(ConfigError::Invalid(format!(
                        "segment rule '{}': {axis} range {}..={} is not within 1..=5",
                        rule.name, range.min, range.max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Label for a score triple: first matching rule, else the fallback.
    pub fn label(&self, recency: u8, frequency: u8, monetary: u8) -> &str {
        self.rules
            .iter()
            .find(|r| r.matches(recency, frequency, monetary))
            .map_or(self.fallback_segment.as_str(), |r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.load_chunk_size, 1_000);
        assert_eq!(config.normalize_chunk_size, 10_000);
    }

    #[test]
    fn toml_overrides_and_rules() {
        let config = PipelineConfig::from_toml_str(
            r#"
            load_chunk_size = 50
            negative_revenue = "reject"

            [segmentation]
            window_days = 90
            as_of = "2024-06-30"
            fallback_segment = "Other"

            [[segmentation.rules]]
            name = "Best"
            recency = { min = 5 }
            "#,
        )
        .unwrap();
        assert_eq!(config.load_chunk_size, 50);
        assert_eq!(config.negative_revenue, NegativeRevenuePolicy::Reject);
        assert_eq!(config.segmentation.rules.len(), 1);
        assert_eq!(config.segmentation.rules[0].frequency, ScoreRange::default());
        assert_eq!(config.segmentation.label(5, 1, 1), "Best");
        assert_eq!(config.segmentation.label(4, 5, 5), "Other");
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = PipelineConfig::from_toml_str("load_chunk_size = 0").unwrap_err();
        assert!(err.to_string().contains("load_chunk_size"));
    }

    #[test]
    fn out_of_range_rule_is_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [[segmentation.rules]]
            name = "Broken"
            monetary = { min = 4, max = 7 }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Broken"));
    }

    #[test]
    fn default_rules_are_ordered_first_match() {
        let seg = SegmentationConfig::default();
        assert_eq!(seg.label(5, 5, 5), "Champions");
        assert_eq!(seg.label(5, 5, 1), "Loyal");
        assert_eq!(seg.label(5, 1, 1), "Potential Loyalist");
        assert_eq!(seg.label(2, 4, 4), "At Risk");
        assert_eq!(seg.label(1, 1, 1), "Lost");
        assert_eq!(seg.label(3, 2, 2), "Needs Attention");
    }
}
