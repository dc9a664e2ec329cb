//! Feature matrix construction and driver attribution.

use veritas_core::{AnomalyDriver, Dataset};

/// Scale factor turning a median absolute deviation into a standard deviation estimate.
const MAD_SCALE: f64 = 1.4826;

/// Scale factor for the mean absolute deviation fallback.
const MEAN_AD_SCALE: f64 = 1.2533;

/// Numeric matrix over complete rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Dataset row index of each matrix row
    pub row_indices: Vec<usize>,
    /// Metrics used as features, in schema order
    pub features: Vec<String>,
    /// Metrics dropped for zero variance
    pub excluded: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Build the matrix from complete rows, excluding zero-variance columns.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let complete: Vec<usize> = dataset.complete_rows().map(|(i, _)| i).collect();
        let mut features = Vec::new();
        let mut excluded = Vec::new();
        for metric in &dataset.schema.metrics {
            let column: Vec<f64> = complete
                .iter()
                .filter_map(|&i| dataset.rows[i].metric(metric))
                .collect();
            if variance(&column) > 0.0 {
                features.push(metric.clone());
            } else {
                excluded.push(metric.clone());
            }
        }

        let data = complete
            .iter()
            .map(|&i| {
                features
                    .iter()
                    .map(|metric| dataset.rows[i].metric(metric).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self {
            row_indices: complete,
            features,
            excluded,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.row_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_indices.is_empty()
    }

    /// Values of one feature column.
    pub fn column(&self, feature: usize) -> Vec<f64> {
        self.data.iter().map(|row| row[feature]).collect()
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Median of a slice. `0.0` for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Robust location and scale of one feature column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustStats {
    pub median: f64,
    /// 1.4826 * MAD, falling back to 1.2533 * mean absolute deviation when the MAD is zero
    pub scale: f64,
}

impl RobustStats {
    pub fn of(values: &[f64]) -> Self {
        let med = median(values);
        let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
        let mut scale = MAD_SCALE * median(&deviations);
        if scale <= 0.0 && !deviations.is_empty() {
            scale = MEAN_AD_SCALE * deviations.iter().sum::<f64>() / deviations.len() as f64;
        }
        Self { median: med, scale }
    }

    pub fn robust_z(&self, value: f64) -> f64 {
        if self.scale > 0.0 {
            (value - self.median).abs() / self.scale
        } else {
            0.0
        }
    }
}

/// Metrics that drove a flagged row, strongest first.
///
/// Every feature at or above `z_threshold` is reported; if none is, the
/// single strongest feature is.
pub fn drivers_for(
    matrix: &FeatureMatrix,
    stats: &[RobustStats],
    row: usize,
    z_threshold: f64,
) -> Vec<AnomalyDriver> {
    let mut candidates: Vec<AnomalyDriver> = matrix
        .features
        .iter()
        .enumerate()
        .map(|(feature, metric)| {
            let value = matrix.data[row][feature];
            let stat = stats[feature];
            AnomalyDriver {
                metric: metric.clone(),
                value,
                median: stat.median,
                ratio: (stat.median != 0.0).then(|| value / stat.median),
                robust_z: stat.robust_z(value),
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.robust_z.total_cmp(&a.robust_z));

    let strong = candidates
        .iter()
        .take_while(|d| d.robust_z >= z_threshold)
        .count();
    candidates.truncate(strong.max(1));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use veritas_core::{Row, Schema};

    fn dataset(rows: &[(f64, f64)]) -> Dataset {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rows = rows
            .iter()
            .enumerate()
            .map(|(i, (a, b))| {
                Row::new(start + Duration::days(i as i64))
                    .with_metric("revenue", *a)
                    .with_metric("flat", *b)
            })
            .collect();
        Dataset::from_rows(Schema::new("date").with_metrics(["revenue", "flat"]), rows)
    }

    #[test]
    fn test_zero_variance_column_excluded() {
        let matrix = FeatureMatrix::from_dataset(&dataset(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]));
        assert_eq!(matrix.features, vec!["revenue"]);
        assert_eq!(matrix.excluded, vec!["flat"]);
        assert_eq!(matrix.data, vec![vec![1.0], vec![2.0], vec![3.0]]);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_robust_stats_fallback_when_mad_zero() {
        let stats = RobustStats::of(&[10.0, 10.0, 10.0, 10.0, 100.0]);
        assert_eq!(stats.median, 10.0);
        assert!(stats.scale > 0.0);
        assert!(stats.robust_z(100.0) > 3.0);
    }

    #[test]
    fn test_drivers_keep_strongest_when_none_pass() {
        let matrix = FeatureMatrix::from_dataset(&dataset(&[(1.0, 5.0), (2.0, 5.0), (3.0, 5.0)]));
        let stats: Vec<RobustStats> = (0..matrix.features.len())
            .map(|f| RobustStats::of(&matrix.column(f)))
            .collect();
        let drivers = drivers_for(&matrix, &stats, 2, 3.0);
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].metric, "revenue");
        assert_eq!(drivers[0].ratio, Some(1.5));
    }
}
