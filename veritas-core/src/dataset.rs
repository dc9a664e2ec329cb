//! Normalized dataset types.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// CELLS AND ROWS
// ============================================================================

/// Inferred kind of a source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// At least the configured share of non-null values parse as numbers
    Numeric,
    /// Categorical attribute (region, store, campaign, ...)
    Dimension,
}

/// A single numeric cell after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    /// Value parsed from a source
    Observed(f64),
    /// Gap filled with the trailing mean of earlier observations
    Imputed(f64),
    /// No value and nothing to impute from
    Missing,
}

impl MetricValue {
    /// Numeric value, if any (observed or imputed).
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Observed(v) | Self::Imputed(v) => Some(*v),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Observed(_))
    }

    pub fn is_imputed(&self) -> bool {
        matches!(self, Self::Imputed(_))
    }
}

/// Whether a row can take part in KPI and anomaly computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Every metric has a value (observed or imputed)
    Complete,
    /// At least one metric is missing with no prior value to impute from.
    /// Kept for audit, excluded from computation.
    Incomplete,
}

/// One observation in the canonical row format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Parsed timestamp key (never null)
    pub timestamp: Timestamp,
    /// Named numeric metrics
    pub metrics: BTreeMap<String, MetricValue>,
    /// Named dimensional attributes
    pub dimensions: BTreeMap<String, String>,
    /// Completeness after imputation
    pub status: RowStatus,
    /// Names of the sources that contributed to this row
    pub sources: Vec<String>,
}

impl Row {
    /// Create a complete row with no metrics or dimensions.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            metrics: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            status: RowStatus::Complete,
            sources: Vec::new(),
        }
    }

    /// Add an observed metric value.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), MetricValue::Observed(value));
        self
    }

    /// Add a dimension value.
    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    /// Numeric value of a metric, if present.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::value)
    }

    /// Cell for a metric; absent metrics read as `Missing`.
    pub fn metric_value(&self, name: &str) -> MetricValue {
        self.metrics.get(name).copied().unwrap_or(MetricValue::Missing)
    }

    pub fn is_complete(&self) -> bool {
        self.status == RowStatus::Complete
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Column layout shared by all rows of a dataset. Fixed after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Name of the timestamp key column
    pub timestamp_column: String,
    /// Numeric columns in declaration order
    pub metrics: Vec<String>,
    /// Dimension columns in declaration order
    pub dimensions: Vec<String>,
}

impl Schema {
    pub fn new(timestamp_column: impl Into<String>) -> Self {
        Self {
            timestamp_column: timestamp_column.into(),
            metrics: Vec::new(),
            dimensions: Vec::new(),
        }
    }

    pub fn with_metrics<S: Into<String>>(mut self, metrics: impl IntoIterator<Item = S>) -> Self {
        self.metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dimensions<S: Into<String>>(
        mut self,
        dimensions: impl IntoIterator<Item = S>,
    ) -> Self {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    /// Kind of a column, if the schema knows it.
    pub fn kind_of(&self, column: &str) -> Option<ColumnKind> {
        if self.metrics.iter().any(|m| m == column) {
            Some(ColumnKind::Numeric)
        } else if self.dimensions.iter().any(|d| d == column) {
            Some(ColumnKind::Dimension)
        } else {
            None
        }
    }

    pub fn has_metric(&self, column: &str) -> bool {
        self.metrics.iter().any(|m| m == column)
    }
}

// ============================================================================
// DATASET SUMMARY
// ============================================================================

/// Fingerprint of one raw source, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFingerprint {
    /// Source name (file name or caller-supplied label)
    pub name: String,
    /// Hex SHA-256 of the raw bytes
    pub fingerprint: String,
    /// Rows accepted from this source
    pub rows: usize,
}

/// Bookkeeping collected while parsing sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Rows dropped because the timestamp was null or unparseable
    pub dropped_rows: usize,
    /// Exact duplicate rows removed within a source
    pub duplicate_rows: usize,
    /// Lines skipped because their field count did not match the header
    pub malformed_lines: usize,
    /// Per-source fingerprints in declaration order
    pub sources: Vec<SourceFingerprint>,
}

/// Dataset summary handed downstream with every report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub complete_rows: usize,
    pub incomplete_rows: usize,
    pub dropped_rows: usize,
    pub duplicate_rows: usize,
    pub malformed_lines: usize,
    pub imputed_cells: usize,
    /// Share of metric cells with an observed value, in percent
    pub completeness_pct: f64,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub sources: Vec<SourceFingerprint>,
}

// ============================================================================
// DATASET
// ============================================================================

/// Ordered rows sharing one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub schema: Schema,
    pub rows: Vec<Row>,
    pub summary: DatasetSummary,
}

impl Dataset {
    /// Build a dataset and compute its summary.
    ///
    /// Rows are expected to be ordered by timestamp and to carry exactly the
    /// schema's metrics; the normalizer guarantees both.
    pub fn new(schema: Schema, rows: Vec<Row>, stats: IngestStats) -> Self {
        let summary = summarize(&schema, &rows, stats);
        Self {
            schema,
            rows,
            summary,
        }
    }

    /// Build a dataset from rows that did not come from parsed sources.
    pub fn from_rows(schema: Schema, rows: Vec<Row>) -> Self {
        Self::new(schema, rows, IngestStats::default())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Complete rows with their index in `rows`.
    pub fn complete_rows(&self) -> impl Iterator<Item = (usize, &Row)> {
        self.rows.iter().enumerate().filter(|(_, row)| row.is_complete())
    }

    pub fn complete_count(&self) -> usize {
        self.rows.iter().filter(|row| row.is_complete()).count()
    }

    /// 1-based position of a row, as a reader would count days or rows.
    pub fn position_of(&self, index: usize) -> usize {
        index + 1
    }

    /// Values of one metric across complete rows, in row order.
    pub fn complete_column(&self, metric: &str) -> Vec<f64> {
        self.complete_rows()
            .filter_map(|(_, row)| row.metric(metric))
            .collect()
    }

    /// Distinct values of a dimension, sorted.
    pub fn dimension_values(&self, dimension: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.dimensions.get(dimension).cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn summarize(schema: &Schema, rows: &[Row], stats: IngestStats) -> DatasetSummary {
    let complete_rows = rows.iter().filter(|r| r.is_complete()).count();
    let mut observed = 0usize;
    let mut imputed = 0usize;
    for row in rows {
        for metric in &schema.metrics {
            match row.metric_value(metric) {
                MetricValue::Observed(_) => observed += 1,
                MetricValue::Imputed(_) => imputed += 1,
                MetricValue::Missing => {}
            }
        }
    }
    let total_cells = rows.len() * schema.metrics.len();
    let completeness_pct = if total_cells > 0 {
        observed as f64 / total_cells as f64 * 100.0
    } else {
        0.0
    };

    DatasetSummary {
        row_count: rows.len(),
        complete_rows,
        incomplete_rows: rows.len() - complete_rows,
        dropped_rows: stats.dropped_rows,
        duplicate_rows: stats.duplicate_rows,
        malformed_lines: stats.malformed_lines,
        imputed_cells: imputed,
        completeness_pct,
        start: rows.iter().map(|r| r.timestamp).min(),
        end: rows.iter().map(|r| r.timestamp).max(),
        metrics: schema.metrics.clone(),
        dimensions: schema.dimensions.clone(),
        sources: stats.sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(day: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_metric_value_accessors() {
        assert_eq!(MetricValue::Observed(2.0).value(), Some(2.0));
        assert_eq!(MetricValue::Imputed(3.0).value(), Some(3.0));
        assert_eq!(MetricValue::Missing.value(), None);
        assert!(MetricValue::Missing.is_missing());
        assert!(MetricValue::Imputed(1.0).is_imputed());
    }

    #[test]
    fn test_absent_metric_reads_missing() {
        let row = Row::new(ts(1)).with_metric("revenue", 10.0);
        assert_eq!(row.metric_value("orders"), MetricValue::Missing);
        assert_eq!(row.metric("revenue"), Some(10.0));
    }

    #[test]
    fn test_schema_kind_of() {
        let schema = Schema::new("date")
            .with_metrics(["revenue"])
            .with_dimensions(["region"]);
        assert_eq!(schema.kind_of("revenue"), Some(ColumnKind::Numeric));
        assert_eq!(schema.kind_of("region"), Some(ColumnKind::Dimension));
        assert_eq!(schema.kind_of("date"), None);
    }

    #[test]
    fn test_summary_counts_and_completeness() {
        let schema = Schema::new("date").with_metrics(["revenue", "orders"]);
        let mut incomplete = Row::new(ts(1)).with_metric("revenue", 5.0);
        incomplete.metrics.insert("orders".into(), MetricValue::Missing);
        incomplete.status = RowStatus::Incomplete;
        let mut imputed = Row::new(ts(2)).with_metric("revenue", 6.0);
        imputed.metrics.insert("orders".into(), MetricValue::Imputed(3.0));
        let full = Row::new(ts(3))
            .with_metric("revenue", 7.0)
            .with_metric("orders", 4.0);

        let dataset = Dataset::from_rows(schema, vec![incomplete, imputed, full]);
        let summary = &dataset.summary;
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.complete_rows, 2);
        assert_eq!(summary.incomplete_rows, 1);
        assert_eq!(summary.imputed_cells, 1);
        // 4 observed of 6 cells
        assert!((summary.completeness_pct - 66.666_666).abs() < 1e-3);
        assert_eq!(summary.start, Some(ts(1)));
        assert_eq!(summary.end, Some(ts(3)));
    }

    #[test]
    fn test_complete_column_skips_incomplete_rows() {
        let schema = Schema::new("date").with_metrics(["revenue"]);
        let mut gap = Row::new(ts(1));
        gap.metrics.insert("revenue".into(), MetricValue::Missing);
        gap.status = RowStatus::Incomplete;
        let rows = vec![gap, Row::new(ts(2)).with_metric("revenue", 9.0)];
        let dataset = Dataset::from_rows(schema, rows);
        assert_eq!(dataset.complete_column("revenue"), vec![9.0]);
        assert_eq!(dataset.complete_count(), 1);
    }

    #[test]
    fn test_dimension_values_sorted_and_distinct() {
        let schema = Schema::new("date").with_dimensions(["region"]);
        let rows = vec![
            Row::new(ts(1)).with_dimension("region", "west"),
            Row::new(ts(2)).with_dimension("region", "east"),
            Row::new(ts(3)).with_dimension("region", "west"),
        ];
        let dataset = Dataset::from_rows(schema, rows);
        assert_eq!(dataset.dimension_values("region"), vec!["east", "west"]);
    }
}
