//! KPI and anomaly records produced by the analysis stages.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// KPI RECORDS
// ============================================================================

/// How a column is aggregated over a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Mean,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
        }
    }
}

/// Period-over-period change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PercentChange {
    /// (current - prior) / |prior| * 100
    #[serde(rename = "percent")]
    Percent(f64),
    /// Prior aggregate is zero or the prior window is unavailable
    Unknown,
}

impl PercentChange {
    /// Compute the change against an optional prior aggregate.
    pub fn between(current: f64, prior: Option<f64>) -> Self {
        match prior {
            Some(prior) if prior != 0.0 && prior.is_finite() && current.is_finite() => {
                Self::Percent((current - prior) / prior.abs() * 100.0)
            }
            _ => Self::Unknown,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Percent(pct) => Some(*pct),
            Self::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Where a KPI value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiKind {
    /// Aggregate of a single numeric column
    Column,
    /// Ratio of two column sums
    Derived {
        numerator: String,
        denominator: String,
    },
}

/// A computed KPI with its prior-period baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    /// Metric name (column name or derived KPI name)
    pub metric: String,
    pub kind: KpiKind,
    pub aggregation: Aggregation,
    /// Current-period aggregate
    pub value: f64,
    /// Prior-period aggregate over an equal-length window
    pub baseline: Option<f64>,
    pub change: PercentChange,
    /// Points in the current window
    pub current_points: usize,
    /// Points in the prior window
    pub prior_points: usize,
}

/// Pearson correlation between two numeric columns in the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRecord {
    pub left: String,
    pub right: String,
    pub coefficient: f64,
    pub points: usize,
}

/// Bounds of a comparison window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBounds {
    pub start: Timestamp,
    pub end: Timestamp,
    pub rows: usize,
}

/// Output of the KPI calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReport {
    pub current_period: Option<PeriodBounds>,
    pub prior_period: Option<PeriodBounds>,
    /// Column records in declaration order, then derived records
    pub records: Vec<KpiRecord>,
    pub correlations: Vec<CorrelationRecord>,
}

impl KpiReport {
    /// Look up a record by metric name.
    pub fn record(&self, metric: &str) -> Option<&KpiRecord> {
        self.records.iter().find(|r| r.metric == metric)
    }
}

// ============================================================================
// ANOMALY RECORDS
// ============================================================================

/// A metric that pushed a row over the anomaly threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDriver {
    pub metric: String,
    /// Value on the anomalous row
    pub value: f64,
    /// Median of the metric across scored rows
    pub median: f64,
    /// value / median, when the median is non-zero
    pub ratio: Option<f64>,
    /// |value - median| / (1.4826 * MAD)
    pub robust_z: f64,
}

/// Anomaly score for one dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Index into `Dataset::rows`
    pub row_index: usize,
    /// 1-based position of the row ("day 15")
    pub position: usize,
    pub timestamp: Timestamp,
    /// Isolation score in (0, 1]; higher is more anomalous
    pub score: f64,
    /// Score is at or above the contamination-derived threshold
    pub flagged: bool,
    /// Metrics that drove the flag (empty for unflagged rows)
    pub drivers: Vec<AnomalyDriver>,
    /// Dimension values of the referenced row
    pub dimensions: BTreeMap<String, String>,
}

/// Output of the anomaly detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// One record per scored row, score descending
    pub records: Vec<AnomalyRecord>,
    pub threshold: f64,
    pub contamination: f64,
    pub seed: u64,
    /// Metrics used as features
    pub features: Vec<String>,
    /// Metrics dropped for zero variance
    pub excluded_columns: Vec<String>,
}

impl AnomalyReport {
    /// Flagged records, most anomalous first.
    pub fn flagged(&self) -> impl Iterator<Item = &AnomalyRecord> {
        self.records.iter().filter(|r| r.flagged)
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged().count()
    }

    /// Row indices of flagged records, sorted ascending.
    pub fn flagged_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.flagged().map(|r| r.row_index).collect();
        rows.sort_unstable();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_change_zero_prior_is_unknown() {
        assert_eq!(PercentChange::between(10.0, Some(0.0)), PercentChange::Unknown);
        assert_eq!(PercentChange::between(10.0, None), PercentChange::Unknown);
    }

    #[test]
    fn test_percent_change_negative_prior_uses_magnitude() {
        let change = PercentChange::between(-5.0, Some(-10.0));
        assert_eq!(change, PercentChange::Percent(50.0));
    }

    #[test]
    fn test_percent_change_serializes_unknown_as_string() {
        let json = serde_json::to_string(&PercentChange::Unknown).unwrap();
        assert_eq!(json, "\"Unknown\"");
        let json = serde_json::to_string(&PercentChange::Percent(12.5)).unwrap();
        assert_eq!(json, "{\"percent\":12.5}");
    }

    #[test]
    fn test_flagged_rows_sorted() {
        let record = |row_index: usize, score: f64, flagged: bool| AnomalyRecord {
            row_index,
            position: row_index + 1,
            timestamp: chrono::Utc::now(),
            score,
            flagged,
            drivers: vec![],
            dimensions: BTreeMap::new(),
        };
        let report = AnomalyReport {
            records: vec![record(9, 0.8, true), record(2, 0.7, true), record(4, 0.4, false)],
            threshold: 0.7,
            contamination: 0.1,
            seed: 7,
            features: vec!["revenue".into()],
            excluded_columns: vec![],
        };
        assert_eq!(report.flagged_count(), 2);
        assert_eq!(report.flagged_rows(), vec![2, 9]);
    }
}
