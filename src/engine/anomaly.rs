// Anomaly analysis over recorded history
//
// A pure function over the history slice fetched from the metric store:
// the measurement is the modified z-score of the most recent value against
// the median absolute deviation of the whole series. MAD-based scoring is
// robust to outliers already present in the history.

/// Minimum number of historical observations before analysis is
/// meaningful; shorter series are reported as "insufficient history".
pub const MIN_HISTORY: usize = 5;

/// Modified z-score of the last element of `history` (ordered by run time
/// ascending).
///
/// Returns None when the series is shorter than [`MIN_HISTORY`]. A zero
/// MAD (constant series) yields `z = 0`.
pub fn modified_z_score(history: &[f64]) -> Option<f64> {
    if history.len() < MIN_HISTORY {
        return None;
    }

    let m = median(history);
    let deviations: Vec<f64> = history.iter().map(|x| (x - m).abs()).collect();
    let mad = median(&deviations);

    let last = history[history.len() - 1];
    if mad > 0.0 {
        Some(0.6745 * (last - m) / mad)
    } else {
        Some(0.0)
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history() {
        assert!(modified_z_score(&[1.0, 2.0, 3.0, 4.0]).is_none());
        assert!(modified_z_score(&[]).is_none());
    }

    #[test]
    fn test_constant_series_scores_zero() {
        let history = vec![100.0; 10];
        assert_eq!(modified_z_score(&history), Some(0.0));
    }

    #[test]
    fn test_outlier_scores_far_outside_band() {
        let mut history = vec![100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.0, 101.0, 99.0, 100.0];
        history.push(10_000.0);
        let z = modified_z_score(&history).unwrap();
        assert!(z > 3.5, "expected |z| >> 3.5, got {}", z);
    }

    #[test]
    fn test_in_band_recent_value() {
        let history = vec![100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 100.5];
        let z = modified_z_score(&history).unwrap();
        assert!(z.abs() <= 3.5, "expected in-band z, got {}", z);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_score_matches_hand_computation() {
        // history: [1, 2, 3, 4, 10]; median = 3; deviations [2,1,0,1,7];
        // MAD = 1; z = 0.6745 * (10 - 3) / 1 = 4.7215
        let z = modified_z_score(&[1.0, 2.0, 3.0, 4.0, 10.0]).unwrap();
        assert!((z - 4.7215).abs() < 1e-9);
    }
}
