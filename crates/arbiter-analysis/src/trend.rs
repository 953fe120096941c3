//! Least-squares trend line over an evenly spaced series.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::metric::{Metric, Polarity};

/// R² above which a trend counts as significant.
pub const TREND_R2_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendLine {
    /// Change per sample.
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub significant: bool,
    pub direction: TrendDirection,
}

impl TrendLine {
    /// Fit `y = slope·x + intercept` with `x = 0, 1, …`.
    pub fn fit(values: &[f64]) -> Self {
        let n = values.len();
        if n < 2 {
            return Self::flat(values.first().copied().unwrap_or(0.0));
        }
        let nf = n as f64;
        let x_mean = (nf - 1.0) / 2.0;
        let y_mean = values.iter().sum::<f64>() / nf;

        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (i, y) in values.iter().enumerate() {
            let dx = i as f64 - x_mean;
            let dy = y - y_mean;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }
        if sxx <= f64::EPSILON {
            return Self::flat(y_mean);
        }
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;
        let r_squared = if syy <= f64::EPSILON {
            0.0
        } else {
            (sxy * sxy / (sxx * syy)).clamp(0.0, 1.0)
        };
        let significant = r_squared > TREND_R2_THRESHOLD;
        let direction = if !significant || slope.abs() <= f64::EPSILON {
            TrendDirection::Flat
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };
        Self {
            slope,
            intercept,
            r_squared,
            significant,
            direction,
        }
    }

    fn flat(level: f64) -> Self {
        Self {
            slope: 0.0,
            intercept: level,
            r_squared: 0.0,
            significant: false,
            direction: TrendDirection::Flat,
        }
    }

    /// Significant movement in the bad direction for `metric`.
    pub fn is_adverse(&self, metric: Metric) -> bool {
        match (metric.polarity(), self.direction) {
            (Polarity::HigherIsBetter, TrendDirection::Decreasing) => true,
            (Polarity::LowerIsBetter, TrendDirection::Increasing) => true,
            _ => false,
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_line() {
        let line = TrendLine::fit(&[1.0, 3.0, 5.0, 7.0]);
        assert!((line.slope - 2.0).abs() < 1e-12);
        assert!((line.intercept - 1.0).abs() < 1e-12);
        assert!((line.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(line.direction, TrendDirection::Increasing);
        assert!((line.predict(4.0) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn noise_is_not_significant() {
        let line = TrendLine::fit(&[0.5, 0.9, 0.4, 0.8, 0.5, 0.9, 0.4]);
        assert!(!line.significant);
        assert_eq!(line.direction, TrendDirection::Flat);
    }

    #[test]
    fn declining_success_is_adverse() {
        let line = TrendLine::fit(&[0.9, 0.85, 0.8, 0.7, 0.65]);
        assert!(line.is_adverse(Metric::SuccessRate));
        assert!(!line.is_adverse(Metric::ExecTime));
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(TrendLine::fit(&[]).direction, TrendDirection::Flat);
        assert_eq!(TrendLine::fit(&[4.0]).intercept, 4.0);
        assert_eq!(TrendLine::fit(&[2.0; 6]).r_squared, 0.0);
    }
}
