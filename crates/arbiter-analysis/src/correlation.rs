//! Pairwise Pearson correlation across the metric catalogue.

use arbiter_telemetry::{PerformancePoint, pearson};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::metric::{Metric, Polarity};

/// |r| above which a pair is reported as strongly correlated.
pub const STRONG_CORRELATION: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CorrelationMatrix {
    pub metrics: Vec<Metric>,
    /// Row-major, symmetric, unit diagonal.
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CorrelationPair {
    pub a: Metric,
    pub b: Metric,
    pub r: f64,
}

impl CorrelationMatrix {
    pub fn from_points(points: &[PerformancePoint]) -> Self {
        let metrics = Metric::ALL.to_vec();
        let series: Vec<Vec<f64>> = metrics.iter().map(|m| m.series(points)).collect();
        let n = metrics.len();
        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            values[i][i] = 1.0;
            for j in (i + 1)..n {
                let r = pearson(&series[i], &series[j]);
                values[i][j] = r;
                values[j][i] = r;
            }
        }
        Self { metrics, values }
    }

    pub fn get(&self, a: Metric, b: Metric) -> f64 {
        let i = self.metrics.iter().position(|m| *m == a);
        let j = self.metrics.iter().position(|m| *m == b);
        match (i, j) {
            (Some(i), Some(j)) => self.values[i][j],
            _ => 0.0,
        }
    }

    /// Off-diagonal pairs with `|r| ≥` [`STRONG_CORRELATION`], strongest
    /// first.
    pub fn strong_pairs(&self) -> Vec<CorrelationPair> {
        let mut out = Vec::new();
        for (i, a) in self.metrics.iter().enumerate() {
            for (j, b) in self.metrics.iter().enumerate().skip(i + 1) {
                let r = self.values[i][j];
                if r.abs() >= STRONG_CORRELATION {
                    out.push(CorrelationPair { a: *a, b: *b, r });
                }
            }
        }
        out.sort_by(|x, y| y.r.abs().total_cmp(&x.r.abs()));
        out
    }

    /// Strong pairs where one metric improving goes with the other getting
    /// worse.
    pub fn adverse_pairs(&self) -> Vec<CorrelationPair> {
        self.strong_pairs()
            .into_iter()
            .filter(|p| {
                let same_polarity = p.a.polarity() == p.b.polarity();
                (same_polarity && p.r < 0.0) || (!same_polarity && p.r > 0.0)
            })
            .filter(|p| p.a.polarity() == Polarity::HigherIsBetter || p.b.polarity() == Polarity::HigherIsBetter)
            .collect()
    }
}
