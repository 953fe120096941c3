//! Frame sampling, performance snapshots and trend analysis.

use std::collections::VecDeque;

use arbiter_telemetry::FrameSample;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Averages per-tick frame samples across one monitor cycle.
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    count: u64,
    fps: f64,
    frame_time_ms: f64,
    memory_mb: f64,
}

impl FrameSampler {
    pub fn record(&mut self, frame: &FrameSample) {
        if !(frame.fps.is_finite() && frame.frame_time_ms.is_finite() && frame.memory_mb.is_finite()) {
            return;
        }
        self.count += 1;
        self.fps += frame.fps;
        self.frame_time_ms += frame.frame_time_ms;
        self.memory_mb += frame.memory_mb;
    }

    /// Average of everything recorded since the last take, then clear.
    pub fn take(&mut self) -> Option<FrameSample> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let avg = FrameSample {
            fps: self.fps / n,
            frame_time_ms: self.frame_time_ms / n,
            memory_mb: self.memory_mb / n,
        };
        *self = Self::default();
        Some(avg)
    }
}

/// Point-in-time system view captured once per monitor cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformanceSnapshot {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub fps: f64,
    pub frame_time_ms: f64,
    pub memory_mb: f64,
    /// Mean of the latest success rate of every monitored tree.
    pub success_rate: f64,
    /// Mean of the latest tick time of every monitored tree.
    pub exec_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

/// Relative change between the older and newer half of the trend window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendAnalysis {
    pub window: usize,
    pub fps_change: f64,
    pub memory_change: f64,
    pub success_change: f64,
    pub exec_time_change: f64,
    pub direction: TrendDirection,
}

impl TrendAnalysis {
    /// `None` until `window` snapshots (at least 2) are available.
    pub fn from_history(history: &VecDeque<PerformanceSnapshot>, window: usize, threshold: f64) -> Option<Self> {
        let window = window.max(2);
        if history.len() < window {
            return None;
        }
        let recent: Vec<&PerformanceSnapshot> = history.iter().skip(history.len() - window).collect();
        let (older, newer) = recent.split_at(window / 2);

        let change = |f: fn(&PerformanceSnapshot) -> f64| {
            let a = mean(older.iter().map(|s| f(s)));
            let b = mean(newer.iter().map(|s| f(s)));
            relative_change(a, b)
        };
        let fps_change = change(|s| s.fps);
        let memory_change = change(|s| s.memory_mb);
        let success_change = change(|s| s.success_rate);
        let exec_time_change = change(|s| s.exec_time_ms);

        let direction = if fps_change <= -threshold || success_change <= -threshold {
            TrendDirection::Degrading
        } else if success_change >= threshold || fps_change >= threshold {
            TrendDirection::Improving
        } else {
            TrendDirection::Stable
        };

        Some(Self {
            window,
            fps_change,
            memory_change,
            success_change,
            exec_time_change,
            direction,
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn relative_change(before: f64, after: f64) -> f64 {
    if before.abs() <= f64::EPSILON {
        0.0
    } else {
        (after - before) / before.abs()
    }
}
