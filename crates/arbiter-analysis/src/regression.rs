//! Two-sample t-test and half-split regression detection.
//!
//! The t-test uses pooled variance and compares `|t|` against a fixed
//! critical value (default `2.0`) rather than a df-dependent quantile.  The
//! same test decides A/B experiment winners in the optimizer.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::descriptive::{finite, mean, variance};
use crate::metric::Metric;

pub const DEFAULT_T_CRITICAL: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TTestResult {
    pub mean_a: f64,
    pub mean_b: f64,
    pub variance_a: f64,
    pub variance_b: f64,
    pub n_a: usize,
    pub n_b: usize,
    /// `(mean_a − mean_b) / se`; positive when A is larger.
    pub t_statistic: f64,
    pub critical_value: f64,
    pub significant: bool,
}

/// Pooled-variance two-sample t-test.
///
/// Either sample with fewer than two finite values is never significant.
/// Zero pooled variance is significant exactly when the means differ.
pub fn two_sample_t_test(a: &[f64], b: &[f64], critical_value: f64) -> TTestResult {
    let a = finite(a);
    let b = finite(b);
    let (n_a, n_b) = (a.len(), b.len());
    let (mean_a, mean_b) = (mean(&a), mean(&b));
    let (variance_a, variance_b) = (variance(&a), variance(&b));

    let t_statistic = if n_a < 2 || n_b < 2 {
        0.0
    } else {
        let pooled = ((n_a - 1) as f64 * variance_a + (n_b - 1) as f64 * variance_b)
            / (n_a + n_b - 2) as f64;
        let se = (pooled * (1.0 / n_a as f64 + 1.0 / n_b as f64)).sqrt();
        let diff = mean_a - mean_b;
        if se > f64::EPSILON {
            diff / se
        } else if diff.abs() > f64::EPSILON {
            diff.signum() * f64::INFINITY
        } else {
            0.0
        }
    };

    TTestResult {
        mean_a,
        mean_b,
        variance_a,
        variance_b,
        n_a,
        n_b,
        t_statistic,
        critical_value,
        significant: t_statistic.abs() > critical_value,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Regression detection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Relative degradation that counts as a regression.
    pub threshold: f64,
    /// Multiplier applied to `threshold`.
    pub sensitivity: f64,
    pub t_critical: f64,
    /// Points required before a check is made.
    pub min_samples: usize,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.10,
            sensitivity: 1.0,
            t_critical: DEFAULT_T_CRITICAL,
            min_samples: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegressionCheck {
    pub metric: Metric,
    pub before: f64,
    pub after: f64,
    /// Relative change, positive when worse.
    pub degradation: f64,
    pub t_statistic: f64,
    pub regressed: bool,
}

/// Compare the older half of `values` with the newer half.
///
/// Pure function of its input: identical series give identical verdicts.
pub fn check_regression(metric: Metric, values: &[f64], config: &RegressionConfig) -> Option<RegressionCheck> {
    let values = finite(values);
    if values.len() < config.min_samples.max(4) {
        return None;
    }
    let (older, newer) = values.split_at(values.len() / 2);
    let test = two_sample_t_test(older, newer, config.t_critical);
    let degradation = metric.degradation(test.mean_a, test.mean_b);
    let regressed = degradation > config.threshold * config.sensitivity && test.significant;
    Some(RegressionCheck {
        metric,
        before: test.mean_a,
        after: test.mean_b,
        degradation,
        t_statistic: test.t_statistic,
        regressed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jitter(base: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| base + if i % 2 == 0 { 0.01 } else { -0.01 }).collect()
    }

    #[test]
    fn clear_difference_is_significant() {
        let a = jitter(0.9, 20);
        let b = jitter(0.6, 20);
        let t = two_sample_t_test(&a, &b, DEFAULT_T_CRITICAL);
        assert!(t.significant);
        assert!(t.t_statistic > 0.0);
        assert!((t.mean_a - 0.9).abs() < 1e-9);
    }

    #[test]
    fn overlapping_samples_are_not_significant() {
        let a = [0.5, 0.7, 0.4, 0.8, 0.6];
        let b = [0.6, 0.5, 0.7, 0.55, 0.65];
        assert!(!two_sample_t_test(&a, &b, DEFAULT_T_CRITICAL).significant);
    }

    #[test]
    fn tiny_samples_are_never_significant() {
        assert!(!two_sample_t_test(&[1.0], &[5.0, 6.0], 2.0).significant);
        assert!(!two_sample_t_test(&[], &[], 2.0).significant);
    }

    #[test]
    fn zero_variance_with_different_means() {
        let t = two_sample_t_test(&[1.0, 1.0], &[2.0, 2.0], 2.0);
        assert!(t.significant);
        assert!(t.t_statistic.is_infinite());
        assert!(!two_sample_t_test(&[1.0, 1.0], &[1.0, 1.0], 2.0).significant);
    }

    #[test]
    fn success_rate_drop_is_a_regression() {
        let mut values = jitter(0.8, 10);
        values.extend(jitter(0.5, 10));
        let check = check_regression(Metric::SuccessRate, &values, &RegressionConfig::default()).unwrap();
        assert!(check.regressed);
        assert!((check.degradation - 0.375).abs() < 1e-9);
    }

    #[test]
    fn improvement_is_not_a_regression() {
        let mut values = jitter(0.5, 10);
        values.extend(jitter(0.8, 10));
        let check = check_regression(Metric::SuccessRate, &values, &RegressionConfig::default()).unwrap();
        assert!(!check.regressed);
        assert!(check.degradation < 0.0);
    }

    #[test]
    fn exec_time_growth_is_a_regression() {
        let mut values = jitter(1.0, 8);
        values.extend(jitter(2.0, 8));
        let check = check_regression(Metric::ExecTime, &values, &RegressionConfig::default()).unwrap();
        assert!(check.regressed);
    }

    #[test]
    fn insensitive_detector_ignores_small_drop() {
        let mut values = jitter(0.8, 10);
        values.extend(jitter(0.7, 10));
        let strict = RegressionConfig::default();
        let lax = RegressionConfig {
            sensitivity: 2.0,
            ..RegressionConfig::default()
        };
        assert!(check_regression(Metric::SuccessRate, &values, &strict).unwrap().regressed);
        assert!(!check_regression(Metric::SuccessRate, &values, &lax).unwrap().regressed);
    }

    #[test]
    fn verdict_is_idempotent() {
        let mut values = jitter(0.8, 10);
        values.extend(jitter(0.55, 10));
        let cfg = RegressionConfig::default();
        let first = check_regression(Metric::SuccessRate, &values, &cfg);
        let second = check_regression(Metric::SuccessRate, &values, &cfg);
        assert_eq!(first, second);
    }

    #[test]
    fn too_few_points_skip_the_check() {
        assert!(check_regression(Metric::Fps, &[60.0, 30.0, 20.0], &RegressionConfig::default()).is_none());
    }
}
