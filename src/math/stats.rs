//! Small descriptive statistics and the chi-square-of-logs comparator.
//!
//! Standard deviations are population (ddof = 0) deviations.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Standardize to zero mean and unit variance.
///
/// Returns `(standardized, mean, std)`, or `None` for empty input or zero spread.
pub fn standardize(values: &[f64]) -> Option<(Vec<f64>, f64, f64)> {
    let m = mean(values)?;
    let s = std_dev(values)?;
    if !(s.is_finite() && s > 0.0) {
        return None;
    }
    Some((values.iter().map(|v| (v - m) / s).collect(), m, s))
}

/// Chi-square between two log-intensity sequences.
///
/// With `weights`, returns `Σ w_i (a_i - b_i)² / Σ w_i`; otherwise the mean of
/// squared differences. Returns `NaN` for empty input or a non-positive weight sum.
pub fn chi2_log(log_model: &[f64], log_measured: &[f64], weights: Option<&[f64]>) -> f64 {
    let n = log_model.len().min(log_measured.len());
    if n == 0 {
        return f64::NAN;
    }
    match weights {
        Some(w) => {
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                let r = log_model[i] - log_measured[i];
                num += w[i] * r * r;
                den += w[i];
            }
            if den > 0.0 { num / den } else { f64::NAN }
        }
        None => {
            let sse: f64 = (0..n)
                .map(|i| {
                    let r = log_model[i] - log_measured[i];
                    r * r
                })
                .sum();
            sse / n as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardize_has_zero_mean_unit_std() {
        let (z, m, s) = standardize(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((m - 2.5).abs() < 1e-12);
        assert!((s - 1.25_f64.sqrt()).abs() < 1e-12);
        assert!(mean(&z).unwrap().abs() < 1e-12);
        assert!((std_dev(&z).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn standardize_rejects_constant_input() {
        assert!(standardize(&[3.0, 3.0, 3.0]).is_none());
        assert!(standardize(&[]).is_none());
    }

    #[test]
    fn chi2_log_weighted_and_unweighted() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0, 5.0];
        assert!((chi2_log(&a, &b, None) - 4.0 / 3.0).abs() < 1e-12);
        let w = [1.0, 1.0, 2.0];
        assert!((chi2_log(&a, &b, Some(&w)) - 8.0 / 4.0).abs() < 1e-12);
        assert_eq!(chi2_log(&a, &a, Some(&w)), 0.0);
        assert!(chi2_log(&[], &[], None).is_nan());
    }
}
