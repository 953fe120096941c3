//! Descriptive statistics, confidence intervals and moving averages.
//!
//! Every routine tolerates empty and single-element input by returning
//! neutral values (zeros, or the single value for location statistics).
//! Non-finite samples are dropped before computing.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (n − 1) variance; `0.0` below two samples.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Quantile of an ascending slice by linear interpolation between closest
/// ranks; `0.0` for an empty slice.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        1 => sorted[0],
        _ => {
            let idx = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = idx.floor() as usize;
            let hi = (idx.ceil() as usize).min(n - 1);
            let w = idx - lo as f64;
            sorted[lo] * (1.0 - w) + sorted[hi] * w
        }
    }
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = finite(values);
    out.sort_by(f64::total_cmp);
    out
}

/// Central moments m2, m3, m4 (population form).
fn central_moments(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let m = mean(values);
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Moment skewness `m3 / m2^1.5`; `0.0` below three samples or for constant
/// input.
pub fn skewness(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let (m2, m3, _) = central_moments(values);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

/// Excess kurtosis `m4 / m2² − 3`; `0.0` below four samples or for constant
/// input.
pub fn kurtosis(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return 0.0;
    }
    let (m2, _, m4) = central_moments(values);
    if m2 <= f64::EPSILON {
        return 0.0;
    }
    m4 / (m2 * m2) - 3.0
}

/// Resolution used when bucketing continuous values for the mode.
const MODE_RESOLUTION: f64 = 1e-3;

/// Most frequent value after rounding to [`MODE_RESOLUTION`]; ties resolve
/// to the smallest value.
pub fn mode(values: &[f64]) -> f64 {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for v in values.iter().filter(|v| v.is_finite()) {
        *counts.entry((v / MODE_RESOLUTION).round() as i64).or_default() += 1;
    }
    let mut best: Option<(i64, usize)> = None;
    for (&bucket, &count) in &counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((bucket, count));
        }
    }
    best.map_or(0.0, |(bucket, _)| bucket as f64 * MODE_RESOLUTION)
}

/// Trailing simple moving average; one value per full window.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// DescriptiveStats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub skewness: f64,
    /// Excess kurtosis (normal = 0).
    pub kurtosis: f64,
}

impl DescriptiveStats {
    pub fn from_samples(values: &[f64]) -> Self {
        let sorted = sorted(values);
        if sorted.is_empty() {
            return Self::default();
        }
        let q1 = quantile_sorted(&sorted, 0.25);
        let q3 = quantile_sorted(&sorted, 0.75);
        let variance = variance(&sorted);
        Self {
            count: sorted.len(),
            mean: mean(&sorted),
            median: quantile_sorted(&sorted, 0.5),
            mode: mode(&sorted),
            std_dev: variance.sqrt(),
            variance,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            q1,
            q3,
            iqr: q3 - q1,
            skewness: skewness(&sorted),
            kurtosis: kurtosis(&sorted),
        }
    }

    /// Standard deviation relative to the mean; `0.0` for a zero mean.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean.abs() <= f64::EPSILON {
            0.0
        } else {
            self.std_dev / self.mean.abs()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Confidence intervals
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ConfidenceLevel {
    P90,
    #[default]
    P95,
    P99,
}

impl ConfidenceLevel {
    pub fn as_fraction(self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 0.90,
            ConfidenceLevel::P95 => 0.95,
            ConfidenceLevel::P99 => 0.99,
        }
    }

    /// Approximate two-sided t critical value bucketed by degrees of
    /// freedom: `< 10`, `< 30`, and the normal limit.
    pub fn critical_value(self, df: usize) -> f64 {
        let bucket = match df {
            0..10 => 0,
            10..30 => 1,
            _ => 2,
        };
        let table = match self {
            ConfidenceLevel::P90 => [1.833, 1.697, 1.645],
            ConfidenceLevel::P95 => [2.262, 2.042, 1.960],
            ConfidenceLevel::P99 => [3.250, 2.750, 2.576],
        };
        table[bucket]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceInterval {
    pub level: ConfidenceLevel,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub margin: f64,
}

impl ConfidenceInterval {
    pub fn of(values: &[f64], level: ConfidenceLevel) -> Self {
        let values = finite(values);
        let m = mean(&values);
        let margin = if values.len() < 2 {
            0.0
        } else {
            let se = std_dev(&values) / (values.len() as f64).sqrt();
            level.critical_value(values.len() - 1) * se
        };
        Self {
            level,
            mean: m,
            lower: m - margin,
            upper: m + margin,
            margin,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.lower..=self.upper).contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn quartiles_interpolate() {
        let stats = DescriptiveStats::from_samples(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert!(approx(stats.median, 5.5));
        assert!(approx(stats.q1, 3.25));
        assert!(approx(stats.q3, 7.75));
        assert!(approx(stats.iqr, 4.5));
        assert!(approx(stats.mean, 5.5));
        assert!(approx(stats.variance, 55.0 / 6.0));
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);
        assert!(approx(stats.skewness, 0.0));
        // Uniform data is platykurtic.
        assert!(stats.kurtosis < 0.0);
    }

    #[test]
    fn degenerate_inputs_are_neutral() {
        let empty = DescriptiveStats::from_samples(&[]);
        assert_eq!(empty, DescriptiveStats::default());

        let single = DescriptiveStats::from_samples(&[0.7]);
        assert_eq!(single.count, 1);
        assert_eq!(single.mean, 0.7);
        assert_eq!(single.median, 0.7);
        assert_eq!(single.variance, 0.0);
        assert_eq!(single.skewness, 0.0);

        let constant = DescriptiveStats::from_samples(&[2.0; 8]);
        assert_eq!(constant.std_dev, 0.0);
        assert_eq!(constant.kurtosis, 0.0);
        assert_eq!(constant.coefficient_of_variation(), 0.0);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let stats = DescriptiveStats::from_samples(&[1.0, f64::NAN, 3.0, f64::INFINITY]);
        assert_eq!(stats.count, 2);
        assert!(approx(stats.mean, 2.0));
    }

    #[test]
    fn mode_picks_most_frequent() {
        assert!(approx(mode(&[0.5, 0.8, 0.8, 0.9]), 0.8));
        assert!(approx(mode(&[3.0, 1.0]), 1.0));
        assert_eq!(mode(&[]), 0.0);
    }

    #[test]
    fn right_tail_has_positive_skew() {
        assert!(skewness(&[1.0, 1.0, 1.0, 1.0, 10.0]) > 1.0);
    }

    #[test]
    fn confidence_interval_uses_df_bucket() {
        let values = [10.0, 12.0, 11.0, 9.0, 13.0];
        let ci = ConfidenceInterval::of(&values, ConfidenceLevel::P95);
        let se = std_dev(&values) / 5.0_f64.sqrt();
        assert!(approx(ci.margin, 2.262 * se));
        assert!(ci.contains(11.0));
        assert!(approx(ci.lower + ci.upper, 22.0));

        let wide = ConfidenceInterval::of(&values, ConfidenceLevel::P99);
        assert!(wide.margin > ci.margin);
        assert_eq!(ConfidenceInterval::of(&[4.0], ConfidenceLevel::P90).margin, 0.0);
        assert_eq!(ConfidenceLevel::P95.critical_value(100), 1.960);
    }

    #[test]
    fn moving_average_windows() {
        assert_eq!(moving_average(&[1.0, 2.0, 3.0, 4.0], 2), vec![1.5, 2.5, 3.5]);
        assert!(moving_average(&[1.0], 3).is_empty());
        assert!(moving_average(&[1.0], 0).is_empty());
    }
}
