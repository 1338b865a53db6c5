//! Baseline statistics helpers.

/// Population mean and standard deviation of a sample.
///
/// Returns `None` for an empty slice. Uses the population variance (divide
/// by `n`), matching how the baseline buckets are treated as the full
/// reference window rather than a sample of one.
pub fn mean_stddev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Standard-deviations distance of `current` above `mean`, clamped to zero.
/// Negative deviations are not anomalies for any monitored metric.
pub fn z_score(current: f64, mean: f64, stddev: f64) -> f64 {
    debug_assert!(stddev > 0.0, "caller must discard zero-stddev baselines");
    ((current - mean) / stddev).max(0.0)
}

/// Round to two decimal places for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
