//! Veritas Anomaly - Isolation-based outlier detection
//!
//! Fits a seeded isolation forest on the numeric feature matrix of the
//! complete dataset rows, scores every row and flags the top
//! `ceil(contamination * n)` rows.

pub mod features;
pub mod forest;

pub use features::{drivers_for, median, FeatureMatrix, RobustStats};
pub use forest::{average_path_length, IsolationForest, IsolationTree};

use rand::rngs::StdRng;
use rand::SeedableRng;
use veritas_core::{AnomalyConfig, AnomalyError, AnomalyRecord, AnomalyReport, Dataset};

/// Scores and flags anomalous rows.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Number of rows flagged out of `n` scored rows.
    pub fn flag_count(&self, n: usize) -> usize {
        ((self.config.contamination * n as f64).ceil() as usize).min(n)
    }

    /// Score every complete row of the dataset.
    ///
    /// # Errors
    /// `InsufficientData` when fewer than `min_rows` complete rows exist.
    ///
    /// # Returns
    /// One record per complete row, score descending (ties in row order),
    /// with the flagged subset marked. When every column has zero variance
    /// the rows are scored but none is flagged.
    pub fn detect(&self, dataset: &Dataset) -> Result<AnomalyReport, AnomalyError> {
        let matrix = FeatureMatrix::from_dataset(dataset);
        if matrix.len() < self.config.min_rows {
            return Err(AnomalyError::InsufficientData {
                rows: matrix.len(),
                required: self.config.min_rows,
            });
        }
        if !matrix.excluded.is_empty() {
            tracing::debug!(excluded = ?matrix.excluded, "excluded zero-variance columns");
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let forest = IsolationForest::fit(
            &matrix.data,
            self.config.n_trees,
            self.config.sample_size,
            &mut rng,
        );
        let scores: Vec<f64> = matrix.data.iter().map(|point| forest.score(point)).collect();

        let mut order: Vec<usize> = (0..matrix.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let flag_count = if matrix.features.is_empty() {
            0
        } else {
            self.flag_count(matrix.len())
        };
        let threshold = match flag_count {
            0 => 1.0,
            k => scores[order[k - 1]],
        };

        let stats: Vec<RobustStats> = (0..matrix.features.len())
            .map(|feature| RobustStats::of(&matrix.column(feature)))
            .collect();

        let records = order
            .iter()
            .enumerate()
            .map(|(rank, &m)| {
                let row_index = matrix.row_indices[m];
                let row = &dataset.rows[row_index];
                let flagged = rank < flag_count;
                AnomalyRecord {
                    row_index,
                    position: dataset.position_of(row_index),
                    timestamp: row.timestamp,
                    score: scores[m],
                    flagged,
                    drivers: if flagged {
                        drivers_for(&matrix, &stats, m, self.config.driver_z_threshold)
                    } else {
                        Vec::new()
                    },
                    dimensions: row.dimensions.clone(),
                }
            })
            .collect();

        tracing::info!(
            rows = matrix.len(),
            features = matrix.features.len(),
            flagged = flag_count,
            threshold,
            seed = self.config.seed,
            "scored anomalies"
        );

        Ok(AnomalyReport {
            records,
            threshold,
            contamination: self.config.contamination,
            seed: self.config.seed,
            features: matrix.features,
            excluded_columns: matrix.excluded,
        })
    }
}
