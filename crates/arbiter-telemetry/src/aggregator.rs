//! [`TelemetryAggregator`] – turns tick traces into per-tree statistics,
//! performance points, bottleneck reports and optimization priorities.
//!
//! # Bottlenecks
//!
//! A leaf node with at least `min_samples` executions is a bottleneck when
//! its average execution time exceeds `bottleneck_time_ms` or its failure
//! rate exceeds `bottleneck_failure_rate`.  Severity is observed/threshold.
//!
//! # Optimization priority
//!
//! `frequency × (1 − success_rate) × (avg_time / tree_avg_time)` per leaf,
//! divided by the largest raw score so the top node scores `1.0`.

use std::collections::BTreeMap;

use arbiter_nodes::{NodeKind, TreeTickReport};
use arbiter_types::{ArbiterError, NodeHandle, TreeId};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::correlation::{CorrelationTracker, ParameterCorrelation};
use crate::series::{FrameSample, PerformancePoint, PerformanceSeries};
use crate::stats::{NodeStats, TreeStats};

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Ticks between performance-point captures.
    pub sample_interval_ticks: u64,
    /// Points kept per tree.
    pub history_capacity: usize,
    pub bottleneck_time_ms: f64,
    pub bottleneck_failure_rate: f64,
    /// Executions required before a node can be flagged.
    pub min_samples: u64,
    /// Execution time at which efficiency is halved.
    pub efficiency_reference_ms: f64,
    /// Samples kept per parameter for correlation.
    pub correlation_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval_ticks: 30,
            history_capacity: 1000,
            bottleneck_time_ms: 1.0,
            bottleneck_failure_rate: 0.5,
            min_samples: 10,
            efficiency_reference_ms: 1.0,
            correlation_capacity: 200,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BottleneckKind {
    ExecutionTime,
    FailureRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Bottleneck {
    pub handle: NodeHandle,
    pub name: String,
    pub kind: BottleneckKind,
    pub observed: f64,
    pub threshold: f64,
    /// `observed / threshold`, always above 1.
    pub severity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodePriority {
    pub handle: NodeHandle,
    pub name: String,
    /// Normalised into `[0, 1]`.
    pub score: f64,
}

/// Exported per-tree overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TreeSummary {
    pub tree: TreeId,
    pub name: String,
    pub executions: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub average_tick_ms: f64,
    pub node_count: usize,
    pub cache_hit_rate: f64,
    pub points: usize,
    pub bottlenecks: Vec<Bottleneck>,
    pub priorities: Vec<NodePriority>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────────────────────────

struct TreeEntry {
    stats: TreeStats,
    series: PerformanceSeries,
    last_success_rate: f64,
}

pub struct TelemetryAggregator {
    config: TelemetryConfig,
    trees: BTreeMap<TreeId, TreeEntry>,
    correlations: CorrelationTracker,
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig) -> Self {
        let correlations = CorrelationTracker::new(config.correlation_capacity);
        Self {
            config,
            trees: BTreeMap::new(),
            correlations,
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn register_tree(&mut self, tree: TreeId, name: impl Into<String>) {
        let name = name.into();
        debug!(%tree, %name, "telemetry tracking tree");
        self.trees.insert(
            tree,
            TreeEntry {
                stats: TreeStats::new(tree, name),
                series: PerformanceSeries::new(self.config.history_capacity),
                last_success_rate: 0.0,
            },
        );
    }

    pub fn unregister_tree(&mut self, tree: TreeId) {
        self.trees.remove(&tree);
        self.correlations.remove_tree(tree);
    }

    pub fn trees(&self) -> impl Iterator<Item = TreeId> + '_ {
        self.trees.keys().copied()
    }

    /// Fold one tree evaluation into the counters.
    pub fn record_tick(&mut self, report: &TreeTickReport) -> Result<(), ArbiterError> {
        let entry = self
            .trees
            .get_mut(&report.tree)
            .ok_or(ArbiterError::UnknownTree(report.tree))?;
        let stats = &mut entry.stats;

        stats.executions += 1;
        match report.status {
            arbiter_nodes::NodeStatus::Success => stats.successes += 1,
            arbiter_nodes::NodeStatus::Failure => stats.failures += 1,
            arbiter_nodes::NodeStatus::Running => stats.running += 1,
        }
        stats.tick_timing.add(report.elapsed_ms);
        stats.interval.ticks += 1;
        stats.interval.tick_time_ms += report.elapsed_ms;

        for record in &report.trace.records {
            stats
                .nodes
                .entry(record.handle)
                .or_insert_with(|| NodeStats::new(record.handle, record.name.clone(), record.kind))
                .record(record);
            if !record.kind.is_composite() {
                match record.status {
                    arbiter_nodes::NodeStatus::Success => stats.interval.leaf_successes += 1,
                    arbiter_nodes::NodeStatus::Failure => stats.interval.leaf_failures += 1,
                    arbiter_nodes::NodeStatus::Running => {}
                }
            }
        }
        for branch in &report.trace.branches {
            stats
                .branches
                .entry(branch.selector)
                .or_default()
                .record(branch.child_index, branch.child);
        }
        trace!(tree = %report.tree, records = report.trace.records.len(), "tick aggregated");
        Ok(())
    }

    /// Close the current interval of `tree` and append a point to its
    /// series.
    ///
    /// An interval without resolved leaf outcomes carries the previous
    /// success rate forward.
    pub fn capture(&mut self, tree: TreeId, tick: u64, frame: &FrameSample) -> Result<PerformancePoint, ArbiterError> {
        let reference_ms = self.config.efficiency_reference_ms;
        let entry = self
            .trees
            .get_mut(&tree)
            .ok_or(ArbiterError::UnknownTree(tree))?;

        let interval = std::mem::take(&mut entry.stats.interval);
        let success_rate = interval.success_rate().unwrap_or(entry.last_success_rate);
        entry.last_success_rate = success_rate;
        let exec_time_ms = interval.average_tick_ms();

        let point = PerformancePoint {
            tick,
            timestamp: Utc::now(),
            success_rate,
            exec_time_ms,
            memory_mb: frame.memory_mb,
            fps: frame.fps,
            efficiency: PerformancePoint::efficiency_of(success_rate, exec_time_ms, reference_ms),
        };
        entry.series.push(point.clone());
        Ok(point)
    }

    /// Capture every registered tree.
    pub fn capture_all(&mut self, tick: u64, frame: &FrameSample) -> Vec<(TreeId, PerformancePoint)> {
        let trees: Vec<TreeId> = self.trees.keys().copied().collect();
        trees
            .into_iter()
            .filter_map(|tree| self.capture(tree, tick, frame).ok().map(|p| (tree, p)))
            .collect()
    }

    pub fn series(&self, tree: TreeId) -> Option<&PerformanceSeries> {
        self.trees.get(&tree).map(|e| &e.series)
    }

    pub fn recent_points(&self, tree: TreeId, n: usize) -> Vec<PerformancePoint> {
        self.series(tree).map(|s| s.recent(n)).unwrap_or_default()
    }

    pub fn tree_stats(&self, tree: TreeId) -> Option<&TreeStats> {
        self.trees.get(&tree).map(|e| &e.stats)
    }

    pub fn node_stats(&self, handle: NodeHandle) -> Option<&NodeStats> {
        self.tree_stats(handle.tree)?.nodes.get(&handle)
    }

    pub fn bottlenecks(&self, tree: TreeId) -> Vec<Bottleneck> {
        let Some(stats) = self.tree_stats(tree) else {
            return Vec::new();
        };
        let cfg = &self.config;
        let mut out = Vec::new();
        for node in stats.leaves().filter(|n| n.executions >= cfg.min_samples) {
            let avg = node.average_time_ms();
            if cfg.bottleneck_time_ms > 0.0 && avg > cfg.bottleneck_time_ms {
                out.push(Bottleneck {
                    handle: node.handle,
                    name: node.name.clone(),
                    kind: BottleneckKind::ExecutionTime,
                    observed: avg,
                    threshold: cfg.bottleneck_time_ms,
                    severity: avg / cfg.bottleneck_time_ms,
                });
            }
            let failure_rate = node.failure_rate();
            if cfg.bottleneck_failure_rate > 0.0 && failure_rate > cfg.bottleneck_failure_rate {
                out.push(Bottleneck {
                    handle: node.handle,
                    name: node.name.clone(),
                    kind: BottleneckKind::FailureRate,
                    observed: failure_rate,
                    threshold: cfg.bottleneck_failure_rate,
                    severity: failure_rate / cfg.bottleneck_failure_rate,
                });
            }
        }
        out.sort_by(|a, b| b.severity.total_cmp(&a.severity));
        out
    }

    /// Largest bottleneck severity of `tree`, `0.0` when none.
    pub fn max_bottleneck_severity(&self, tree: TreeId) -> f64 {
        self.bottlenecks(tree)
            .first()
            .map_or(0.0, |b| b.severity)
    }

    pub fn optimization_priorities(&self, tree: TreeId) -> Vec<NodePriority> {
        let Some(stats) = self.tree_stats(tree) else {
            return Vec::new();
        };
        let leaves: Vec<&NodeStats> = stats.leaves().filter(|n| n.executions > 0).collect();
        if leaves.is_empty() {
            return Vec::new();
        }
        let total_executions: u64 = leaves.iter().map(|n| n.executions).sum();
        let tree_avg =
            leaves.iter().map(|n| n.average_time_ms()).sum::<f64>() / leaves.len() as f64;

        let raw: Vec<(&NodeStats, f64)> = leaves
            .iter()
            .map(|n| {
                let frequency = n.executions as f64 / total_executions as f64;
                let relative_time = if tree_avg > 0.0 {
                    n.average_time_ms() / tree_avg
                } else {
                    1.0
                };
                (*n, frequency * (1.0 - n.success_rate()) * relative_time)
            })
            .collect();
        let max = raw.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);

        let mut out: Vec<NodePriority> = raw
            .into_iter()
            .map(|(n, s)| NodePriority {
                handle: n.handle,
                name: n.name.clone(),
                score: if max > 0.0 { s / max } else { 0.0 },
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out
    }

    pub fn record_parameter_sample(&mut self, handle: NodeHandle, parameter: &str, value: f64, metric: f64) {
        self.correlations.record(handle, parameter, value, metric);
    }

    pub fn parameter_correlation(&self, handle: NodeHandle, parameter: &str) -> Option<ParameterCorrelation> {
        self.correlations.correlation(handle, parameter)
    }

    pub fn parameter_correlations(&self, tree: TreeId) -> Vec<ParameterCorrelation> {
        self.correlations.for_tree(tree)
    }

    pub fn summary(&self, tree: TreeId) -> Option<TreeSummary> {
        let entry = self.trees.get(&tree)?;
        let stats = &entry.stats;
        let node_execs: u64 = stats.nodes.values().map(|n| n.executions).sum();
        let node_hits: u64 = stats.nodes.values().map(|n| n.cache_hits).sum();
        Some(TreeSummary {
            tree,
            name: stats.name.clone(),
            executions: stats.executions,
            success_rate: stats.success_rate(),
            failure_rate: stats.failure_rate(),
            average_tick_ms: stats.tick_timing.mean(),
            node_count: stats.nodes.len(),
            cache_hit_rate: crate::stats::ratio(node_hits, node_execs),
            points: entry.series.len(),
            bottlenecks: self.bottlenecks(tree),
            priorities: self.optimization_priorities(tree),
        })
    }

    /// Name of a node kind as used in reports.
    pub fn kind_label(kind: NodeKind) -> &'static str {
        match kind {
            NodeKind::Action => "action",
            NodeKind::Condition => "condition",
            NodeKind::Movement => "movement",
            NodeKind::Sequence => "sequence",
            NodeKind::Selector => "selector",
            NodeKind::Inverter => "inverter",
            NodeKind::Leaf => "leaf",
        }
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}
