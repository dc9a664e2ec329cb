//! Veritas KPI - Period-over-period KPI calculator
//!
//! Aggregates every numeric column over a current window and the
//! equal-length window immediately before it, derives business ratios and
//! correlates column pairs. Only complete rows take part.

pub mod derived;
pub mod stats;
pub mod window;

pub use derived::{derived_records, DerivedRule, DERIVED_RULES};
pub use stats::{aggregate, pearson};
pub use window::{resolve_windows, Windows};

use std::collections::BTreeMap;
use veritas_core::{
    Aggregation, CorrelationRecord, Dataset, KpiConfig, KpiKind, KpiRecord, KpiReport,
    PercentChange, Row,
};

/// Name fragments that select mean aggregation.
pub const MEAN_HINTS: [&str; 13] = [
    "rate",
    "ratio",
    "pct",
    "percent",
    "conversion",
    "avg",
    "average",
    "mean",
    "margin",
    "score",
    "temp",
    "dwell",
    "basket",
];

/// Aggregation policy for a column: explicit override, else name-based.
pub fn aggregation_for(metric: &str, overrides: &BTreeMap<String, Aggregation>) -> Aggregation {
    if let Some(aggregation) = overrides.get(metric) {
        return *aggregation;
    }
    let lower = metric.to_ascii_lowercase();
    if MEAN_HINTS.iter().any(|hint| lower.contains(hint)) {
        Aggregation::Mean
    } else {
        Aggregation::Sum
    }
}

/// Computes KPI reports for a dataset.
#[derive(Debug, Clone, Default)]
pub struct KpiCalculator {
    config: KpiConfig,
}

impl KpiCalculator {
    pub fn new(config: KpiConfig) -> Self {
        Self { config }
    }

    /// Compute records and correlations. Deterministic for a fixed dataset and period.
    pub fn compute(&self, dataset: &Dataset) -> KpiReport {
        let complete: Vec<&Row> = dataset.complete_rows().map(|(_, row)| row).collect();
        let windows = resolve_windows(&complete, &self.config.period);

        let mut records = Vec::with_capacity(dataset.schema.metrics.len());
        for metric in &dataset.schema.metrics {
            let aggregation = aggregation_for(metric, &self.config.aggregation_overrides);
            let current = column(&windows.current, metric);
            let Some(value) = aggregate(&current, aggregation) else {
                continue;
            };
            let prior = windows
                .prior
                .as_ref()
                .map(|rows| column(rows, metric))
                .unwrap_or_default();
            let baseline = aggregate(&prior, aggregation);
            records.push(KpiRecord {
                metric: metric.clone(),
                kind: KpiKind::Column,
                aggregation,
                value,
                baseline,
                change: PercentChange::between(value, baseline),
                current_points: current.len(),
                prior_points: prior.len(),
            });
        }

        if self.config.derived_metrics {
            records.extend(derived_records(&dataset.schema.metrics, &windows));
        }

        let correlations = self.correlations(&dataset.schema.metrics, &windows.current);

        tracing::debug!(
            records = records.len(),
            correlations = correlations.len(),
            current_rows = windows.current.len(),
            prior_rows = windows.prior.as_ref().map_or(0, Vec::len),
            "computed KPIs"
        );

        KpiReport {
            current_period: windows.current_bounds(),
            prior_period: windows.prior_bounds(),
            records,
            correlations,
        }
    }

    fn correlations(&self, metrics: &[String], rows: &[&Row]) -> Vec<CorrelationRecord> {
        let mut out = Vec::new();
        for (i, left) in metrics.iter().enumerate() {
            for right in &metrics[i + 1..] {
                let (xs, ys): (Vec<f64>, Vec<f64>) = rows
                    .iter()
                    .filter_map(|row| Some((row.metric(left)?, row.metric(right)?)))
                    .unzip();
                if xs.len() < self.config.min_correlation_points {
                    continue;
                }
                if let Some(coefficient) = pearson(&xs, &ys) {
                    out.push(CorrelationRecord {
                        left: left.clone(),
                        right: right.clone(),
                        coefficient,
                        points: xs.len(),
                    });
                }
            }
        }
        out
    }
}

fn column(rows: &[&Row], metric: &str) -> Vec<f64> {
    rows.iter().filter_map(|row| row.metric(metric)).collect()
}
