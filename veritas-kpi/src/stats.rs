//! Aggregates and correlation.

use veritas_core::Aggregation;

/// Aggregate a window. `None` for an empty window.
pub fn aggregate(values: &[f64], aggregation: Aggregation) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(match aggregation {
        Aggregation::Sum => sum,
        Aggregation::Mean => sum / values.len() as f64,
    })
}

/// Pearson correlation coefficient.
///
/// `None` when the slices differ in length, hold fewer than two points, or
/// either side has no variance relative to its own magnitude.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if flat(var_x, xs) || flat(var_y, ys) {
        return None;
    }
    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Spread indistinguishable from rounding noise at the series' scale.
fn flat(variance: f64, values: &[f64]) -> bool {
    let magnitude: f64 = values.iter().map(|v| v * v).sum();
    !variance.is_finite() || variance <= f64::EPSILON * magnitude
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        assert_eq!(aggregate(&[1.0, 2.0, 3.0], Aggregation::Sum), Some(6.0));
        assert_eq!(aggregate(&[1.0, 2.0, 3.0], Aggregation::Mean), Some(2.0));
        assert_eq!(aggregate(&[], Aggregation::Sum), None);
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&xs, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_degenerate() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0], &[1.0]), None);
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), None);
        assert_eq!(pearson(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.5e308, -1.5e308, 1.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_pearson_small_scale_series() {
        let rates = [1e-9, 2e-9, 3e-9, 4e-9];
        let doubled = [2e-9, 4e-9, 6e-9, 8e-9];
        assert!((pearson(&rates, &doubled).unwrap() - 1.0).abs() < 1e-9);

        let conversion = [0.0010, 0.0012, 0.0011, 0.0013];
        let inverse = [0.0013, 0.0011, 0.0012, 0.0010];
        assert!((pearson(&conversion, &inverse).unwrap() + 1.0).abs() < 1e-9);
    }
}
