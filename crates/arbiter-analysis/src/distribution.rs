//! Distribution shape, normality, histogram, outlier and seasonality
//! analysis.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::descriptive::{finite, kurtosis, mean, quantile_sorted, skewness, sorted};

/// χ²(2) critical value at 5 %.
pub const JARQUE_BERA_CRITICAL: f64 = 5.99;
/// |skewness| above which a distribution is called skewed.
pub const SKEW_LIMIT: f64 = 1.0;
/// |excess kurtosis| above which a distribution is called lepto/platykurtic.
pub const KURTOSIS_LIMIT: f64 = 1.0;
pub const IQR_FACTOR: f64 = 1.5;
/// Autocorrelation above which a lag counts as a season.
pub const SEASONALITY_THRESHOLD: f64 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// Shape
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DistributionShape {
    Normal,
    RightSkewed,
    LeftSkewed,
    Leptokurtic,
    Platykurtic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalityTest {
    pub jarque_bera: f64,
    pub is_normal: bool,
}

impl NormalityTest {
    /// `JB = n/6 · (S² + K²/4)` with excess kurtosis `K`.  Fewer than four
    /// samples cannot reject normality.
    pub fn of(values: &[f64]) -> Self {
        let values = finite(values);
        if values.len() < 4 {
            return Self {
                jarque_bera: 0.0,
                is_normal: true,
            };
        }
        let s = skewness(&values);
        let k = kurtosis(&values);
        let jb = values.len() as f64 / 6.0 * (s * s + k * k / 4.0);
        Self {
            jarque_bera: jb,
            is_normal: jb < JARQUE_BERA_CRITICAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistributionAnalysis {
    pub shape: DistributionShape,
    pub skewness: f64,
    pub kurtosis: f64,
    pub normality: NormalityTest,
}

impl DistributionAnalysis {
    pub fn of(values: &[f64]) -> Self {
        let values = finite(values);
        let skewness = skewness(&values);
        let kurtosis = kurtosis(&values);
        let shape = if skewness > SKEW_LIMIT {
            DistributionShape::RightSkewed
        } else if skewness < -SKEW_LIMIT {
            DistributionShape::LeftSkewed
        } else if kurtosis > KURTOSIS_LIMIT {
            DistributionShape::Leptokurtic
        } else if kurtosis < -KURTOSIS_LIMIT {
            DistributionShape::Platykurtic
        } else {
            DistributionShape::Normal
        };
        Self {
            shape,
            skewness,
            kurtosis,
            normality: NormalityTest::of(&values),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub bin_width: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    /// Equal-width bins over `[min, max]`.  `bins == 0` picks `⌈√n⌉`.
    pub fn build(values: &[f64], bins: usize) -> Self {
        let values = sorted(values);
        let Some((&min, &max)) = values.first().zip(values.last()) else {
            return Self {
                min: 0.0,
                max: 0.0,
                bin_width: 0.0,
                counts: Vec::new(),
            };
        };
        let bins = if bins == 0 {
            (values.len() as f64).sqrt().ceil() as usize
        } else {
            bins
        }
        .max(1);

        if max - min <= f64::EPSILON {
            let mut counts = vec![0; bins];
            counts[0] = values.len();
            return Self {
                min,
                max,
                bin_width: 0.0,
                counts,
            };
        }

        let bin_width = (max - min) / bins as f64;
        let mut counts = vec![0; bins];
        for v in &values {
            let idx = (((v - min) / bin_width) as usize).min(bins - 1);
            counts[idx] += 1;
        }
        Self {
            min,
            max,
            bin_width,
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outliers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OutlierSide {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Outlier {
    /// Position in the analysed series.
    pub index: usize,
    pub value: f64,
    pub side: OutlierSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutlierReport {
    pub lower_fence: f64,
    pub upper_fence: f64,
    pub outliers: Vec<Outlier>,
}

impl OutlierReport {
    /// Flag values outside `[Q1 − 1.5·IQR, Q3 + 1.5·IQR]`.
    pub fn iqr(values: &[f64]) -> Self {
        let sorted = sorted(values);
        if sorted.len() < 4 {
            return Self {
                lower_fence: f64::NEG_INFINITY,
                upper_fence: f64::INFINITY,
                outliers: Vec::new(),
            };
        }
        let q1 = quantile_sorted(&sorted, 0.25);
        let q3 = quantile_sorted(&sorted, 0.75);
        let iqr = q3 - q1;
        let lower_fence = q1 - IQR_FACTOR * iqr;
        let upper_fence = q3 + IQR_FACTOR * iqr;

        let outliers = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .filter_map(|(index, &value)| {
                let side = if value < lower_fence {
                    OutlierSide::Low
                } else if value > upper_fence {
                    OutlierSide::High
                } else {
                    return None;
                };
                Some(Outlier { index, value, side })
            })
            .collect();
        Self {
            lower_fence,
            upper_fence,
            outliers,
        }
    }

    pub fn fraction(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.outliers.len() as f64 / total as f64
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seasonality
// ─────────────────────────────────────────────────────────────────────────────

/// Sample autocorrelation at `lag`; `0.0` when undefined.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    if lag == 0 || lag >= values.len() {
        return 0.0;
    }
    let m = mean(values);
    let denom: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    let num: f64 = values
        .iter()
        .zip(values.iter().skip(lag))
        .map(|(a, b)| (a - m) * (b - m))
        .sum();
    num / denom
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Seasonality {
    /// Lag with the strongest autocorrelation, when above the threshold.
    pub period: Option<usize>,
    pub strength: f64,
}

impl Seasonality {
    /// Search lags `2..=min(max_lag, n/2)`.
    pub fn detect(values: &[f64], max_lag: usize) -> Self {
        let values = finite(values);
        let upper = max_lag.min(values.len() / 2);
        let best = (2..=upper)
            .map(|lag| (lag, autocorrelation(&values, lag)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((lag, r)) if r > SEASONALITY_THRESHOLD => Self {
                period: Some(lag),
                strength: r,
            },
            Some((_, r)) => Self {
                period: None,
                strength: r.max(0.0),
            },
            None => Self {
                period: None,
                strength: 0.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapsed_success_rate_is_a_low_outlier() {
        let report = OutlierReport::iqr(&[0.80, 0.82, 0.79, 0.81, 0.05]);
        assert_eq!(report.outliers.len(), 1);
        let outlier = &report.outliers[0];
        assert_eq!(outlier.index, 4);
        assert_eq!(outlier.value, 0.05);
        assert_eq!(outlier.side, OutlierSide::Low);
    }

    #[test]
    fn tight_series_has_no_outliers() {
        let report = OutlierReport::iqr(&[0.5, 0.51, 0.49, 0.5, 0.52, 0.48]);
        assert!(report.outliers.is_empty());
        assert!(OutlierReport::iqr(&[1.0, 100.0]).outliers.is_empty());
    }

    #[test]
    fn symmetric_data_is_normal() {
        let values: Vec<f64> = (0..40).map(|i| ((i % 7) as f64 - 3.0) * 0.1 + 0.5).collect();
        let analysis = DistributionAnalysis::of(&values);
        assert!(analysis.skewness.abs() < 0.5);
        assert!(analysis.normality.is_normal);
    }

    #[test]
    fn long_right_tail_is_skewed_and_not_normal() {
        let mut values = vec![1.0; 30];
        values.extend([20.0, 25.0, 30.0]);
        let analysis = DistributionAnalysis::of(&values);
        assert_eq!(analysis.shape, DistributionShape::RightSkewed);
        assert!(!analysis.normality.is_normal);
        assert!(analysis.normality.jarque_bera > JARQUE_BERA_CRITICAL);
    }

    #[test]
    fn histogram_bins_every_value() {
        let values: Vec<f64> = (0..16).map(f64::from).collect();
        let hist = Histogram::build(&values, 0);
        assert_eq!(hist.counts.len(), 4);
        assert_eq!(hist.total(), 16);
        assert_eq!(hist.counts, vec![4, 4, 4, 4]);

        let flat = Histogram::build(&[3.0; 5], 3);
        assert_eq!(flat.counts, vec![5, 0, 0]);
        assert!(Histogram::build(&[], 4).counts.is_empty());
    }

    #[test]
    fn periodic_series_has_a_season() {
        let values: Vec<f64> = (0..48).map(|i| if i % 4 < 2 { 1.0 } else { 0.0 }).collect();
        let season = Seasonality::detect(&values, 12);
        assert_eq!(season.period, Some(4));
        assert!(season.strength > SEASONALITY_THRESHOLD);
    }

    #[test]
    fn short_series_has_no_season() {
        assert_eq!(Seasonality::detect(&[1.0, 2.0, 3.0], 10).period, None);
        assert_eq!(autocorrelation(&[1.0; 5], 1), 0.0);
    }
}
