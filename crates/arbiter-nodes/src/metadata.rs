//! Per-node execution counters.

use serde::{Deserialize, Serialize};

use crate::node::NodeStatus;

/// Counters and timings captured after every evaluation of one node.
///
/// `success_count + failure_count + running_count == execution_count` holds
/// after every [`record`][Self::record] and [`reset`][Self::reset].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub running_count: u64,
    /// Evaluations answered from the result cache.
    pub cache_hits: u64,
    /// Evaluations that ended in a caught fault.
    pub fault_count: u64,
    pub total_time_ms: f64,
    pub min_time_ms: Option<f64>,
    pub max_time_ms: f64,
    pub last_status: Option<NodeStatus>,
    pub last_tick: Option<u64>,
}

impl NodeMetadata {
    pub fn record(&mut self, status: NodeStatus, elapsed_ms: f64, tick: u64, cached: bool, faulted: bool) {
        let elapsed_ms = if elapsed_ms.is_finite() && elapsed_ms > 0.0 {
            elapsed_ms
        } else {
            0.0
        };
        self.execution_count += 1;
        match status {
            NodeStatus::Success => self.success_count += 1,
            NodeStatus::Failure => self.failure_count += 1,
            NodeStatus::Running => self.running_count += 1,
        }
        if cached {
            self.cache_hits += 1;
        }
        if faulted {
            self.fault_count += 1;
        }
        self.total_time_ms += elapsed_ms;
        self.min_time_ms = Some(self.min_time_ms.map_or(elapsed_ms, |m| m.min(elapsed_ms)));
        self.max_time_ms = self.max_time_ms.max(elapsed_ms);
        self.last_status = Some(status);
        self.last_tick = Some(tick);
    }

    /// Successes over executions, `0.0` before the first execution.
    pub fn success_rate(&self) -> f64 {
        ratio(self.success_count, self.execution_count)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failure_count, self.execution_count)
    }

    pub fn average_time_ms(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.total_time_ms / self.execution_count as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_consistent(&self) -> bool {
        self.success_count + self.failure_count + self.running_count == self.execution_count
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_stay_consistent() {
        let mut meta = NodeMetadata::default();
        let statuses = [
            NodeStatus::Success,
            NodeStatus::Running,
            NodeStatus::Failure,
            NodeStatus::Running,
            NodeStatus::Success,
        ];
        for (i, status) in statuses.into_iter().enumerate() {
            meta.record(status, 0.5, i as u64, false, false);
            assert!(meta.is_consistent());
        }
        assert_eq!(meta.execution_count, 5);
        assert_eq!(meta.running_count, 2);
    }

    #[test]
    fn eighty_of_a_hundred_is_exact() {
        let mut meta = NodeMetadata::default();
        for i in 0..100 {
            let status = if i < 80 {
                NodeStatus::Success
            } else {
                NodeStatus::Failure
            };
            meta.record(status, 1.0, i, false, false);
        }
        assert_eq!(meta.success_rate(), 0.8);
        assert_eq!(meta.failure_rate(), 0.2);
    }

    #[test]
    fn timings_track_min_max_average() {
        let mut meta = NodeMetadata::default();
        meta.record(NodeStatus::Success, 2.0, 0, false, false);
        meta.record(NodeStatus::Success, 4.0, 1, true, false);
        meta.record(NodeStatus::Failure, f64::NAN, 2, false, true);
        assert_eq!(meta.min_time_ms, Some(0.0));
        assert_eq!(meta.max_time_ms, 4.0);
        assert!((meta.average_time_ms() - 2.0).abs() < 1e-12);
        assert_eq!(meta.cache_hits, 1);
        assert_eq!(meta.fault_count, 1);
    }

    #[test]
    fn empty_rates_are_zero() {
        let meta = NodeMetadata::default();
        assert_eq!(meta.success_rate(), 0.0);
        assert_eq!(meta.average_time_ms(), 0.0);
        assert!(meta.is_consistent());
    }

    #[test]
    fn reset_clears_everything() {
        let mut meta = NodeMetadata::default();
        meta.record(NodeStatus::Success, 1.0, 3, false, false);
        meta.reset();
        assert_eq!(meta, NodeMetadata::default());
    }
}
