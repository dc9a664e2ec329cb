//! Trailing-mean imputation of numeric gaps.

use std::collections::{HashMap, VecDeque};
use veritas_core::{MetricValue, Row, RowStatus};

use crate::merge::ColumnCoverage;

/// Fill `Missing` cells with the mean of the last `window` observed values of
/// the same metric in the same secondary-key group, then set each row's status.
///
/// Imputed values never feed later imputations. A gap with no earlier
/// observation stays `Missing` and marks the row `Incomplete`, as does a
/// metric none of the row's sources supplies.
///
/// # Returns
/// Number of imputed cells.
pub fn impute_trailing_mean(
    rows: &mut [Row],
    metrics: &[String],
    keys: &[String],
    window: usize,
    coverage: &ColumnCoverage,
) -> usize {
    let window = window.max(1);
    let mut history: HashMap<(Vec<String>, &str), VecDeque<f64>> = HashMap::new();
    let mut imputed = 0usize;

    for row in rows.iter_mut() {
        let group: Vec<String> = keys
            .iter()
            .map(|k| row.dimensions.get(k).cloned().unwrap_or_default())
            .collect();

        for metric in metrics {
            let covered = coverage.covers(row, metric);
            let trail = history.entry((group.clone(), metric.as_str())).or_default();
            let cell = row
                .metrics
                .entry(metric.clone())
                .or_insert(MetricValue::Missing);
            match *cell {
                MetricValue::Observed(value) => {
                    trail.push_back(value);
                    if trail.len() > window {
                        trail.pop_front();
                    }
                }
                MetricValue::Missing if covered && !trail.is_empty() => {
                    let mean = trail.iter().sum::<f64>() / trail.len() as f64;
                    *cell = MetricValue::Imputed(mean);
                    imputed += 1;
                }
                _ => {}
            }
        }

        row.status = if row.metrics.values().any(MetricValue::is_missing) {
            RowStatus::Incomplete
        } else {
            RowStatus::Complete
        };
    }

    imputed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::TypedTable;
    use chrono::{TimeZone, Utc};
    use veritas_core::ColumnKind;

    fn none() -> ColumnCoverage {
        ColumnCoverage::default()
    }

    fn row(day: u32, revenue: Option<f64>) -> Row {
        let mut row = Row::new(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
        row.metrics.insert(
            "revenue".into(),
            revenue.map_or(MetricValue::Missing, MetricValue::Observed),
        );
        row
    }

    #[test]
    fn test_leading_gap_is_incomplete() {
        let mut rows = vec![row(1, None), row(2, Some(4.0))];
        let imputed = impute_trailing_mean(&mut rows, &["revenue".into()], &[], 3, &none());
        assert_eq!(imputed, 0);
        assert_eq!(rows[0].status, RowStatus::Incomplete);
        assert_eq!(rows[1].status, RowStatus::Complete);
    }

    #[test]
    fn test_gap_uses_trailing_window() {
        let mut rows = vec![
            row(1, Some(100.0)),
            row(2, Some(2.0)),
            row(3, Some(4.0)),
            row(4, None),
            row(5, None),
        ];
        let imputed = impute_trailing_mean(&mut rows, &["revenue".into()], &[], 2, &none());
        assert_eq!(imputed, 2);
        assert_eq!(rows[3].metric_value("revenue"), MetricValue::Imputed(3.0));
        // imputed values do not extend the window
        assert_eq!(rows[4].metric_value("revenue"), MetricValue::Imputed(3.0));
        assert!(rows.iter().all(Row::is_complete));
    }

    fn table(name: &str, metric: &str) -> TypedTable {
        TypedTable {
            source_name: name.into(),
            timestamp_column: "date".into(),
            columns: vec![(metric.into(), ColumnKind::Numeric)],
            rows: Vec::new(),
            dropped_rows: 0,
        }
    }

    #[test]
    fn test_join_gap_stays_missing() {
        let coverage =
            ColumnCoverage::of(&[table("sales.csv", "revenue"), table("ads.csv", "clicks")]);
        let mut rows = vec![row(1, Some(10.0)), row(2, None), row(3, None)];
        rows[0].sources.push("sales.csv".into());
        rows[1].sources.push("sales.csv".into());
        rows[2].sources.push("ads.csv".into());

        let imputed = impute_trailing_mean(&mut rows, &["revenue".into()], &[], 3, &coverage);
        assert_eq!(imputed, 1);
        assert_eq!(rows[1].metric_value("revenue"), MetricValue::Imputed(10.0));
        assert_eq!(rows[2].metric_value("revenue"), MetricValue::Missing);
        assert_eq!(rows[2].status, RowStatus::Incomplete);
    }

    #[test]
    fn test_groups_do_not_share_history() {
        let mut west = row(1, Some(10.0));
        west.dimensions.insert("region".into(), "west".into());
        let mut east = row(2, None);
        east.dimensions.insert("region".into(), "east".into());
        let mut rows = vec![west, east];
        impute_trailing_mean(&mut rows, &["revenue".into()], &["region".into()], 7, &none());
        assert_eq!(rows[1].metric_value("revenue"), MetricValue::Missing);
        assert_eq!(rows[1].status, RowStatus::Incomplete);
    }
}
