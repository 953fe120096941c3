//! Bounded per-tree performance series.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Host frame measurements for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameSample {
    pub fps: f64,
    pub frame_time_ms: f64,
    pub memory_mb: f64,
}

impl FrameSample {
    pub fn new(fps: f64, memory_mb: f64) -> Self {
        let frame_time_ms = if fps > 0.0 { 1000.0 / fps } else { 0.0 };
        Self {
            fps,
            frame_time_ms,
            memory_mb,
        }
    }
}

impl Default for FrameSample {
    fn default() -> Self {
        Self::new(60.0, 0.0)
    }
}

/// One captured point of a tree's performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PerformancePoint {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub success_rate: f64,
    pub exec_time_ms: f64,
    pub memory_mb: f64,
    pub fps: f64,
    pub efficiency: f64,
}

impl PerformancePoint {
    /// `success_rate / (1 + exec_time_ms / reference_ms)`.
    pub fn efficiency_of(success_rate: f64, exec_time_ms: f64, reference_ms: f64) -> f64 {
        if reference_ms <= 0.0 {
            return success_rate;
        }
        success_rate / (1.0 + exec_time_ms.max(0.0) / reference_ms)
    }
}

/// Ring buffer of [`PerformancePoint`]s; the oldest point is evicted when
/// full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSeries {
    capacity: usize,
    points: VecDeque<PerformancePoint>,
}

impl PerformanceSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, point: PerformancePoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PerformancePoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformancePoint> {
        self.points.iter()
    }

    /// The last `n` points, oldest first.
    pub fn recent(&self, n: usize) -> Vec<PerformancePoint> {
        let skip = self.points.len().saturating_sub(n);
        self.points.iter().skip(skip).cloned().collect()
    }

    /// Points captured at or after `tick`.
    pub fn since(&self, tick: u64) -> Vec<PerformancePoint> {
        self.points
            .iter()
            .filter(|p| p.tick >= tick)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(tick: u64) -> PerformancePoint {
        PerformancePoint {
            tick,
            timestamp: Utc::now(),
            success_rate: 0.5,
            exec_time_ms: 0.1,
            memory_mb: 10.0,
            fps: 60.0,
            efficiency: 0.45,
        }
    }

    #[test]
    fn oldest_point_is_evicted() {
        let mut series = PerformanceSeries::new(3);
        for t in 0..5 {
            series.push(point(t));
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.iter().next().map(|p| p.tick), Some(2));
        assert_eq!(series.latest().map(|p| p.tick), Some(4));
    }

    #[test]
    fn recent_and_since() {
        let mut series = PerformanceSeries::new(10);
        for t in 0..6 {
            series.push(point(t * 10));
        }
        let recent: Vec<u64> = series.recent(2).iter().map(|p| p.tick).collect();
        assert_eq!(recent, vec![40, 50]);
        assert_eq!(series.since(30).len(), 3);
        assert_eq!(series.recent(100).len(), 6);
    }

    #[test]
    fn efficiency_formula() {
        assert_eq!(PerformancePoint::efficiency_of(0.8, 1.0, 1.0), 0.4);
        assert_eq!(PerformancePoint::efficiency_of(0.8, 0.0, 1.0), 0.8);
        assert_eq!(PerformancePoint::efficiency_of(0.8, 5.0, 0.0), 0.8);
    }

    #[test]
    fn frame_sample_derives_frame_time() {
        let f = FrameSample::new(50.0, 100.0);
        assert_eq!(f.frame_time_ms, 20.0);
        assert_eq!(FrameSample::new(0.0, 0.0).frame_time_ms, 0.0);
    }
}
