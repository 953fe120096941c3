//! The analysed metric catalogue.

use std::fmt;

use arbiter_telemetry::PerformancePoint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Metric {
    SuccessRate,
    ExecTime,
    Memory,
    Fps,
    Efficiency,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::SuccessRate,
        Metric::ExecTime,
        Metric::Memory,
        Metric::Fps,
        Metric::Efficiency,
    ];

    pub fn polarity(self) -> Polarity {
        match self {
            Metric::SuccessRate | Metric::Fps | Metric::Efficiency => Polarity::HigherIsBetter,
            Metric::ExecTime | Metric::Memory => Polarity::LowerIsBetter,
        }
    }

    pub fn extract(self, point: &PerformancePoint) -> f64 {
        match self {
            Metric::SuccessRate => point.success_rate,
            Metric::ExecTime => point.exec_time_ms,
            Metric::Memory => point.memory_mb,
            Metric::Fps => point.fps,
            Metric::Efficiency => point.efficiency,
        }
    }

    /// The metric's values across `points`, oldest first.
    pub fn series(self, points: &[PerformancePoint]) -> Vec<f64> {
        points.iter().map(|p| self.extract(p)).collect()
    }

    /// Relative change from `before` to `after`, signed so that a positive
    /// value is always a degradation.
    pub fn degradation(self, before: f64, after: f64) -> f64 {
        if before.abs() <= f64::EPSILON {
            return 0.0;
        }
        let change = (after - before) / before.abs();
        match self.polarity() {
            Polarity::HigherIsBetter => -change,
            Polarity::LowerIsBetter => change,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::SuccessRate => "success_rate",
            Metric::ExecTime => "exec_time_ms",
            Metric::Memory => "memory_mb",
            Metric::Fps => "fps",
            Metric::Efficiency => "efficiency",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
