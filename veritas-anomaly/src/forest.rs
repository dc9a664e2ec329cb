//! Seeded isolation forest.
//!
//! Trees are stored as flat node arenas. All randomness comes from the
//! caller's `StdRng`, so a fixed seed reproduces identical trees.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

/// Euler-Mascheroni constant used in the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Average path length of an unsuccessful binary search tree lookup over `n`
/// points: `c(n) = 2H(n-1) - 2(n-1)/n`.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One isolation tree.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over the rows of `data` selected by `sample`.
    pub fn grow(data: &[Vec<f64>], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(data, sample, 0, height_limit, rng);
        tree
    }

    fn build(
        &mut self,
        data: &[Vec<f64>],
        rows: Vec<usize>,
        depth: usize,
        height_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });
        if depth >= height_limit || rows.len() <= 1 {
            return id;
        }

        // Features with spread in this node, with their (min, max).
        let features = data.first().map_or(0, Vec::len);
        let spread: Vec<(usize, f64, f64)> = (0..features)
            .filter_map(|feature| {
                let (min, max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    let v = data[r][feature];
                    (lo.min(v), hi.max(v))
                });
                (max > min && min.is_finite() && max.is_finite()).then_some((feature, min, max))
            })
            .collect();
        if spread.is_empty() {
            return id;
        }

        let (feature, min, max) = spread[rng.random_range(0..spread.len())];
        let threshold = split_point(min, max, rng.random::<f64>());
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[r][feature] <= threshold);

        let left = self.build(data, left_rows, depth + 1, height_limit, rng);
        let right = self.build(data, right_rows, depth + 1, height_limit, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Path length of `point`, with the `c(size)` adjustment at the leaf.
    pub fn path_length(&self, point: &[f64]) -> f64 {
        let mut id = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if point[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// `min + u * (max - min)` over halved operands, finite even when the
/// span itself overflows.
fn split_point(min: f64, max: f64, u: f64) -> f64 {
    let half = max / 2.0 - min / 2.0;
    (min + u * half + u * half).clamp(min, max)
}

/// Ensemble of isolation trees fitted on one feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit `n_trees` trees, each on `min(sample_size, n)` rows drawn without
    /// replacement, with height limit `ceil(log2(subsample))`.
    pub fn fit(data: &[Vec<f64>], n_trees: usize, sample_size: usize, rng: &mut StdRng) -> Self {
        let psi = sample_size.min(data.len()).max(1);
        let height_limit = (psi as f64).log2().ceil() as usize;
        let trees = (0..n_trees)
            .map(|_| {
                let sample = index::sample(rng, data.len(), psi).into_vec();
                IsolationTree::grow(data, sample, height_limit, rng)
            })
            .collect();
        Self {
            trees,
            sample_size: psi,
        }
    }

    /// Anomaly score `2^(-E[h(x)] / c(psi))` in (0, 1]; higher is more anomalous.
    pub fn score(&self, point: &[f64]) -> f64 {
        let normalizer = average_path_length(self.sample_size);
        if self.trees.is_empty() || normalizer <= 0.0 {
            return 0.5;
        }
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / normalizer)
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..50)
            .map(|i| vec![100.0 + (i % 7) as f64, 20.0 + (i % 5) as f64])
            .collect();
        data.push(vec![1000.0, 21.0]);
        data
    }

    #[test]
    fn test_average_path_length_known_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.244).abs() < 0.01);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier();
        let mut rng = StdRng::seed_from_u64(42);
        let forest = IsolationForest::fit(&data, 100, 256, &mut rng);
        let outlier = forest.score(&data[50]);
        let typical = forest.score(&data[3]);
        assert!(outlier > typical, "outlier {outlier} vs typical {typical}");
        assert!(outlier > 0.6);
        assert!(outlier <= 1.0);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 20, 32, &mut StdRng::seed_from_u64(7));
        let b = IsolationForest::fit(&data, 20, 32, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_height_limit_bounds_depth() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 10, 16, &mut StdRng::seed_from_u64(1));
        assert_eq!(forest.sample_size(), 16);
        // depth <= ceil(log2 16) = 4, so at most 2^5 - 1 nodes
        assert!(forest.trees().iter().all(|t| t.node_count() <= 31));
    }

    #[test]
    fn test_split_point_survives_overflowing_span() {
        let (min, max): (f64, f64) = (-1.5e308, 1.5e308);
        assert!((max - min).is_infinite());
        for u in [0.0, 0.25, 0.5, 0.999_999] {
            let t = split_point(min, max, u);
            assert!(t.is_finite() && (min..=max).contains(&t), "{u} -> {t}");
        }
        assert_eq!(split_point(10.0, 20.0, 0.5), 15.0);
    }

    #[test]
    fn test_extreme_magnitudes_fit_and_score() {
        let data: Vec<Vec<f64>> = (0..12)
            .map(|i| match i {
                3 => vec![1.5e308],
                7 => vec![-1.5e308],
                _ => vec![i as f64],
            })
            .collect();
        let forest = IsolationForest::fit(&data, 50, 256, &mut StdRng::seed_from_u64(5));
        for point in &data {
            let score = forest.score(point);
            assert!(score > 0.0 && score <= 1.0, "{score}");
        }
    }

    #[test]
    fn test_constant_data_scores_neutral() {
        let data = vec![vec![5.0]; 12];
        let forest = IsolationForest::fit(&data, 10, 256, &mut StdRng::seed_from_u64(3));
        let score = forest.score(&data[0]);
        assert!((score - 0.5).abs() < 1e-12);
    }
}
