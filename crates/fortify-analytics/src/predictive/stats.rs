/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Standard deviation as a percentage of |mean|; 0 when the mean is below `epsilon`.
pub fn coefficient_of_variation(values: &[f64], epsilon: f64) -> f64 {
    let m = mean(values);
    if m.abs() < epsilon {
        return 0.0;
    }
    std_dev(values) / m.abs() * 100.0
}

/// Percentage change from `early` to `recent`, or None when `early` is too
/// close to zero to divide by.
pub fn drift_pct(early: f64, recent: f64, epsilon: f64) -> Option<f64> {
    if early.abs() < epsilon {
        return None;
    }
    Some((recent - early) / early.abs() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_std_dev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&values), 5.0);
        assert!((std_dev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cv_of_constant_series_is_zero() {
        assert_eq!(coefficient_of_variation(&[3.0; 12], 1e-9), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0; 12], 1e-9), 0.0);
    }

    #[test]
    fn drift_sign_follows_direction() {
        assert_eq!(drift_pct(100.0, 120.0, 1e-9), Some(20.0));
        assert_eq!(drift_pct(-100.0, -80.0, 1e-9), Some(20.0));
        assert_eq!(drift_pct(1e-12, 5.0, 1e-9), None);
    }
}
