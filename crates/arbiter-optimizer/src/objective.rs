//! Objective functions scoring a window of performance points.
//!
//! Every objective is "higher is better" and lies in `[0, 1]` for sane
//! inputs, so scores from different objectives share a convergence
//! threshold.

use std::fmt;

use arbiter_telemetry::PerformancePoint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Memory at which the inverse-memory objective is halved.
const MEMORY_REFERENCE_MB: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositeWeights {
    pub success_rate: f64,
    pub exec_time: f64,
    pub efficiency: f64,
    pub memory: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.5,
            exec_time: 0.2,
            efficiency: 0.2,
            memory: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    SuccessRate,
    /// `1 / (1 + exec_ms)`.
    InverseExecTime,
    #[default]
    Efficiency,
    /// `1 / (1 + memory_mb / 100)`.
    InverseMemory,
    /// Weighted mean of the four above.
    Composite(CompositeWeights),
}

impl Objective {
    pub fn score_point(&self, p: &PerformancePoint) -> f64 {
        let inverse_exec = 1.0 / (1.0 + p.exec_time_ms.max(0.0));
        let inverse_memory = 1.0 / (1.0 + p.memory_mb.max(0.0) / MEMORY_REFERENCE_MB);
        match self {
            Objective::SuccessRate => p.success_rate,
            Objective::InverseExecTime => inverse_exec,
            Objective::Efficiency => p.efficiency,
            Objective::InverseMemory => inverse_memory,
            Objective::Composite(w) => {
                let total = w.success_rate + w.exec_time + w.efficiency + w.memory;
                if total <= 0.0 {
                    return 0.0;
                }
                (w.success_rate * p.success_rate
                    + w.exec_time * inverse_exec
                    + w.efficiency * p.efficiency
                    + w.memory * inverse_memory)
                    / total
            }
        }
    }

    /// Mean point score; `0.0` for an empty window.
    pub fn evaluate(&self, points: &[PerformancePoint]) -> f64 {
        let scores: Vec<f64> = points
            .iter()
            .map(|p| self.score_point(p))
            .filter(|s| s.is_finite())
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::SuccessRate => "success_rate",
            Objective::InverseExecTime => "inverse_exec_time",
            Objective::Efficiency => "efficiency",
            Objective::InverseMemory => "inverse_memory",
            Objective::Composite(_) => "composite",
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(success_rate: f64, exec_time_ms: f64, memory_mb: f64) -> PerformancePoint {
        PerformancePoint {
            tick: 0,
            timestamp: Utc::now(),
            success_rate,
            exec_time_ms,
            memory_mb,
            fps: 60.0,
            efficiency: PerformancePoint::efficiency_of(success_rate, exec_time_ms, 1.0),
        }
    }

    #[test]
    fn single_metric_objectives() {
        let p = point(0.8, 1.0, 100.0);
        assert_eq!(Objective::SuccessRate.score_point(&p), 0.8);
        assert_eq!(Objective::InverseExecTime.score_point(&p), 0.5);
        assert_eq!(Objective::Efficiency.score_point(&p), 0.4);
        assert_eq!(Objective::InverseMemory.score_point(&p), 0.5);
    }

    #[test]
    fn composite_is_weighted_mean() {
        let p = point(0.8, 1.0, 100.0);
        let w = CompositeWeights {
            success_rate: 1.0,
            exec_time: 1.0,
            efficiency: 0.0,
            memory: 0.0,
        };
        assert!((Objective::Composite(w).score_point(&p) - 0.65).abs() < 1e-12);
        let zero = CompositeWeights {
            success_rate: 0.0,
            exec_time: 0.0,
            efficiency: 0.0,
            memory: 0.0,
        };
        assert_eq!(Objective::Composite(zero).score_point(&p), 0.0);
    }

    #[test]
    fn evaluate_averages_window() {
        let points = [point(0.6, 0.0, 0.0), point(1.0, 0.0, 0.0)];
        assert!((Objective::SuccessRate.evaluate(&points) - 0.8).abs() < 1e-12);
        assert_eq!(Objective::SuccessRate.evaluate(&[]), 0.0);
    }
}
