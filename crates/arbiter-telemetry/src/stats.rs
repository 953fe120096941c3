//! Per-node and per-tree counters built from tick traces.

use std::collections::BTreeMap;

use arbiter_nodes::{NodeKind, NodeRecord, NodeStatus};
use arbiter_types::{NodeHandle, NodeId, TreeId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// OnlineStats
// ─────────────────────────────────────────────────────────────────────────────

/// Welford running mean/variance plus min/max.  Non-finite samples are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for OnlineStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl OnlineStats {
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.mean }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.min }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.max }
    }

    /// Sample variance (divide by n-1).
    pub fn variance_sample(&self) -> f64 {
        if self.n <= 1 {
            0.0
        } else {
            self.m2 / (self.n as f64 - 1.0)
        }
    }

    pub fn stddev_sample(&self) -> f64 {
        self.variance_sample().sqrt()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NodeStats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub handle: NodeHandle,
    pub name: String,
    pub kind: NodeKind,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub running: u64,
    pub cache_hits: u64,
    pub faults: u64,
    pub timing: OnlineStats,
}

impl NodeStats {
    pub fn new(handle: NodeHandle, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            handle,
            name: name.into(),
            kind,
            executions: 0,
            successes: 0,
            failures: 0,
            running: 0,
            cache_hits: 0,
            faults: 0,
            timing: OnlineStats::default(),
        }
    }

    pub fn record(&mut self, record: &NodeRecord) {
        self.executions += 1;
        match record.status {
            NodeStatus::Success => self.successes += 1,
            NodeStatus::Failure => self.failures += 1,
            NodeStatus::Running => self.running += 1,
        }
        if record.cached {
            self.cache_hits += 1;
        }
        if record.faulted {
            self.faults += 1;
        }
        self.timing.add(record.elapsed_ms);
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.executions)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.executions)
    }

    pub fn average_time_ms(&self) -> f64 {
        self.timing.mean()
    }

    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.executions)
    }
}

pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BranchHistogram
// ─────────────────────────────────────────────────────────────────────────────

/// How often a selector picked each child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BranchHistogram {
    /// `child_index -> (child node, selections)`.
    pub counts: BTreeMap<usize, (NodeId, u64)>,
    pub total: u64,
}

impl BranchHistogram {
    pub fn record(&mut self, child_index: usize, child: NodeId) {
        let entry = self.counts.entry(child_index).or_insert((child, 0));
        entry.1 += 1;
        self.total += 1;
    }

    /// Share of selections that went to `child_index`.
    pub fn frequency(&self, child_index: usize) -> f64 {
        self.counts
            .get(&child_index)
            .map_or(0.0, |(_, n)| ratio(*n, self.total))
    }

    /// The most frequently chosen branch, if any.
    pub fn dominant(&self) -> Option<usize> {
        self.counts
            .iter()
            .max_by_key(|(_, (_, n))| *n)
            .map(|(index, _)| *index)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TreeStats
// ─────────────────────────────────────────────────────────────────────────────

/// Counters accumulated since the previous performance-point capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalCounters {
    pub ticks: u64,
    pub leaf_successes: u64,
    pub leaf_failures: u64,
    pub tick_time_ms: f64,
}

impl IntervalCounters {
    /// Resolved leaf outcomes that succeeded, if any resolved.
    pub fn success_rate(&self) -> Option<f64> {
        let resolved = self.leaf_successes + self.leaf_failures;
        (resolved > 0).then(|| self.leaf_successes as f64 / resolved as f64)
    }

    pub fn average_tick_ms(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.tick_time_ms / self.ticks as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeStats {
    pub tree: TreeId,
    pub name: String,
    /// Full tree evaluations.
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub running: u64,
    pub tick_timing: OnlineStats,
    pub nodes: BTreeMap<NodeHandle, NodeStats>,
    pub branches: BTreeMap<NodeHandle, BranchHistogram>,
    pub interval: IntervalCounters,
}

impl TreeStats {
    pub fn new(tree: TreeId, name: impl Into<String>) -> Self {
        Self {
            tree,
            name: name.into(),
            executions: 0,
            successes: 0,
            failures: 0,
            running: 0,
            tick_timing: OnlineStats::default(),
            nodes: BTreeMap::new(),
            branches: BTreeMap::new(),
            interval: IntervalCounters::default(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.executions)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(self.failures, self.executions)
    }

    /// Leaf (non-composite) node statistics.
    pub fn leaves(&self) -> impl Iterator<Item = &NodeStats> {
        self.nodes.values().filter(|n| !n.kind.is_composite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: NodeStatus, elapsed_ms: f64) -> NodeRecord {
        NodeRecord {
            handle: NodeHandle::new(TreeId(1), NodeId(0)),
            name: "n".into(),
            kind: NodeKind::Condition,
            status,
            elapsed_ms,
            cached: false,
            faulted: false,
        }
    }

    #[test]
    fn online_stats_matches_textbook() {
        let mut s = OnlineStats::default();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.add(x);
        }
        assert_eq!(s.mean(), 5.0);
        assert!((s.variance_sample() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(s.min(), 2.0);
        assert_eq!(s.max(), 9.0);
    }

    #[test]
    fn online_stats_ignores_non_finite() {
        let mut s = OnlineStats::default();
        s.add(f64::NAN);
        s.add(f64::INFINITY);
        assert_eq!(s.n(), 0);
        assert_eq!(s.mean(), 0.0);
    }

    #[test]
    fn node_stats_rates_are_exact() {
        let mut stats = NodeStats::new(NodeHandle::new(TreeId(1), NodeId(0)), "n", NodeKind::Condition);
        for i in 0..100 {
            let status = if i < 80 {
                NodeStatus::Success
            } else {
                NodeStatus::Failure
            };
            stats.record(&record(status, 0.1));
        }
        assert_eq!(stats.success_rate(), 0.80);
        assert_eq!(stats.failure_rate(), 0.20);
    }

    #[test]
    fn histogram_frequencies() {
        let mut h = BranchHistogram::default();
        h.record(0, NodeId(1));
        h.record(1, NodeId(2));
        h.record(1, NodeId(2));
        h.record(1, NodeId(2));
        assert_eq!(h.frequency(1), 0.75);
        assert_eq!(h.dominant(), Some(1));
        assert_eq!(h.frequency(5), 0.0);
    }

    #[test]
    fn interval_without_resolved_outcomes_has_no_rate() {
        let interval = IntervalCounters {
            ticks: 3,
            ..IntervalCounters::default()
        };
        assert_eq!(interval.success_rate(), None);
    }
}
