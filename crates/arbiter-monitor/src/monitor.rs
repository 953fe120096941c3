//! [`PerformanceMonitor`] – periodic threshold and trend checks.
//!
//! Each cycle:
//!
//! 1. averages the frames sampled since the previous cycle into a
//!    [`PerformanceSnapshot`] and appends it to the bounded history,
//! 2. checks system metrics (fps, memory) and every tree's latest
//!    [`PerformancePoint`][arbiter_telemetry::PerformancePoint] against the
//!    static thresholds,
//! 3. checks the trend window for an fps decline or memory growth,
//! 4. resolves alerts whose metric recovered past the margin and purges old
//!    resolved alerts,
//! 5. scores every tree and emits an [`OptimizationRequest`] for those above
//!    the threshold whose cooldown has elapsed.
//!
//! | Alert | Source | Raised when | Resolved when |
//! |---|---|---|---|
//! | `LowFps` | `system` | fps < min | fps ≥ min × (1 + margin) |
//! | `HighMemory` | `system` | mem > max | mem ≤ max × (1 − margin) |
//! | `FpsDecline` | `system` | Δfps ≤ −trend | Δfps > −trend × (1 − margin) |
//! | `MemoryLeak` | `system` | Δmem ≥ trend | Δmem < trend × (1 − margin) |
//! | `HighExecutionTime` | tree name | exec > max | exec ≤ max × (1 − margin) |
//! | `HighFailureRate` | tree name | fail > max | fail ≤ max × (1 − margin) |

use std::collections::{BTreeMap, VecDeque};

use arbiter_telemetry::{FrameSample, TelemetryAggregator};
use arbiter_types::{Alert, AlertKind, AlertSeverity, TreeId};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::alerts::AlertBook;
use crate::config::MonitorConfig;
use crate::trend::{FrameSampler, PerformanceSnapshot, TrendAnalysis};

pub const SYSTEM_SOURCE: &str = "system";

/// Composite "needs optimization" score of one tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationScore {
    pub tree: TreeId,
    pub score: f64,
    pub exec_overrun: f64,
    pub failure: f64,
    pub bottleneck: f64,
    pub inefficiency: f64,
}

/// Ask the optimizer to tune a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationRequest {
    pub tree: TreeId,
    pub score: f64,
    pub reason: String,
    pub tick: u64,
}

/// Everything one monitor cycle produced.
#[derive(Debug, Clone, Default)]
pub struct MonitorCycleReport {
    pub tick: u64,
    pub snapshot: Option<PerformanceSnapshot>,
    pub raised: Vec<Alert>,
    pub resolved: Vec<Alert>,
    pub purged: usize,
    pub trend: Option<TrendAnalysis>,
    pub scores: Vec<OptimizationScore>,
    pub requests: Vec<OptimizationRequest>,
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    tick_rate_hz: f64,
    sampler: FrameSampler,
    history: VecDeque<PerformanceSnapshot>,
    alerts: AlertBook,
    last_cycle: Option<u64>,
    last_request: BTreeMap<TreeId, u64>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, tick_rate_hz: f64) -> Self {
        Self {
            config,
            tick_rate_hz: if tick_rate_hz > 0.0 { tick_rate_hz } else { 60.0 },
            sampler: FrameSampler::default(),
            history: VecDeque::new(),
            alerts: AlertBook::new(),
            last_cycle: None,
            last_request: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Feed one per-tick frame measurement.
    pub fn record_frame(&mut self, frame: &FrameSample) {
        self.sampler.record(frame);
    }

    pub fn is_due(&self, tick: u64) -> bool {
        match self.last_cycle {
            None => true,
            Some(last) => tick.saturating_sub(last) >= self.config.interval_ticks.max(1),
        }
    }

    pub fn run_cycle(&mut self, tick: u64, telemetry: &TelemetryAggregator) -> MonitorCycleReport {
        self.last_cycle = Some(tick);
        let mut report = MonitorCycleReport {
            tick,
            ..Default::default()
        };

        let snapshot = self.snapshot(tick, telemetry);
        self.history.push_back(snapshot.clone());
        while self.history.len() > self.config.history_capacity.max(1) {
            self.history.pop_front();
        }

        self.check_system(&snapshot, &mut report);
        self.check_trees(tick, telemetry, &mut report);

        let trend = self.trend_analysis();
        if let Some(trend) = &trend {
            self.check_trend(tick, trend, &mut report);
        }
        report.trend = trend;

        let grace = (self.config.purge_after_secs.max(0.0) * self.tick_rate_hz).round() as u64;
        report.purged = self.alerts.purge(tick, grace);

        report.scores = telemetry
            .trees()
            .filter_map(|tree| self.optimization_score(tree, telemetry))
            .collect();
        report.requests = self.requests(tick, &report.scores);

        debug!(
            tick,
            fps = snapshot.fps,
            memory_mb = snapshot.memory_mb,
            raised = report.raised.len(),
            resolved = report.resolved.len(),
            "monitor cycle"
        );
        report.snapshot = Some(snapshot);
        report
    }

    fn snapshot(&mut self, tick: u64, telemetry: &TelemetryAggregator) -> PerformanceSnapshot {
        let frame = self.sampler.take().unwrap_or_default();
        let latest: Vec<_> = telemetry
            .trees()
            .filter_map(|tree| telemetry.series(tree)?.latest().cloned())
            .collect();
        let n = latest.len().max(1) as f64;
        PerformanceSnapshot {
            tick,
            timestamp: Utc::now(),
            fps: frame.fps,
            frame_time_ms: frame.frame_time_ms,
            memory_mb: frame.memory_mb,
            success_rate: latest.iter().map(|p| p.success_rate).sum::<f64>() / n,
            exec_time_ms: latest.iter().map(|p| p.exec_time_ms).sum::<f64>() / n,
        }
    }

    fn check_system(&mut self, snapshot: &PerformanceSnapshot, report: &mut MonitorCycleReport) {
        let cfg = self.config.clone();
        let tick = snapshot.tick;

        if cfg.min_fps > 0.0 {
            if snapshot.fps < cfg.min_fps {
                let ratio = if snapshot.fps > 0.0 {
                    cfg.min_fps / snapshot.fps
                } else {
                    f64::INFINITY
                };
                self.raise(
                    report,
                    AlertKind::LowFps,
                    SYSTEM_SOURCE,
                    ratio,
                    format!("fps {:.1} below {:.1}", snapshot.fps, cfg.min_fps),
                    snapshot.fps,
                    cfg.min_fps,
                    tick,
                );
            } else if snapshot.fps >= cfg.min_fps * (1.0 + cfg.recovery_margin) {
                self.resolve(report, AlertKind::LowFps, SYSTEM_SOURCE, tick);
            }
        }

        self.check_upper(
            report,
            AlertKind::HighMemory,
            SYSTEM_SOURCE,
            snapshot.memory_mb,
            cfg.max_memory_mb,
            format!("memory {:.0} MB above {:.0} MB", snapshot.memory_mb, cfg.max_memory_mb),
            tick,
        );
    }

    fn check_trees(&mut self, tick: u64, telemetry: &TelemetryAggregator, report: &mut MonitorCycleReport) {
        let cfg = self.config.clone();
        for tree in telemetry.trees() {
            let Some(point) = telemetry.series(tree).and_then(|s| s.latest()).cloned() else {
                continue;
            };
            let name = telemetry
                .tree_stats(tree)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| tree.to_string());

            self.check_upper(
                report,
                AlertKind::HighExecutionTime,
                &name,
                point.exec_time_ms,
                cfg.max_exec_time_ms,
                format!("{name}: tick time {:.2} ms above {:.2} ms", point.exec_time_ms, cfg.max_exec_time_ms),
                tick,
            );
            let failure_rate = 1.0 - point.success_rate;
            self.check_upper(
                report,
                AlertKind::HighFailureRate,
                &name,
                failure_rate,
                cfg.max_failure_rate,
                format!(
                    "{name}: failure rate {:.0}% above {:.0}%",
                    failure_rate * 100.0,
                    cfg.max_failure_rate * 100.0
                ),
                tick,
            );
        }
    }

    fn check_trend(&mut self, tick: u64, trend: &TrendAnalysis, report: &mut MonitorCycleReport) {
        let threshold = self.config.trend_threshold;
        if threshold <= 0.0 {
            return;
        }
        let margin = self.config.recovery_margin;

        let decline = -trend.fps_change;
        if decline >= threshold {
            self.raise(
                report,
                AlertKind::FpsDecline,
                SYSTEM_SOURCE,
                decline / threshold,
                format!("fps down {:.0}% over {} snapshots", decline * 100.0, trend.window),
                trend.fps_change,
                -threshold,
                tick,
            );
        } else if decline < threshold * (1.0 - margin) {
            self.resolve(report, AlertKind::FpsDecline, SYSTEM_SOURCE, tick);
        }

        let growth = trend.memory_change;
        if growth >= threshold {
            self.raise(
                report,
                AlertKind::MemoryLeak,
                SYSTEM_SOURCE,
                growth / threshold,
                format!("memory up {:.0}% over {} snapshots, possible leak", growth * 100.0, trend.window),
                growth,
                threshold,
                tick,
            );
        } else if growth < threshold * (1.0 - margin) {
            self.resolve(report, AlertKind::MemoryLeak, SYSTEM_SOURCE, tick);
        }
    }

    /// Raise when `observed > threshold`; resolve once back under the margin.
    #[allow(clippy::too_many_arguments)]
    fn check_upper(
        &mut self,
        report: &mut MonitorCycleReport,
        kind: AlertKind,
        source: &str,
        observed: f64,
        threshold: f64,
        message: String,
        tick: u64,
    ) {
        if threshold <= 0.0 || !observed.is_finite() {
            return;
        }
        if observed > threshold {
            self.raise(report, kind, source, observed / threshold, message, observed, threshold, tick);
        } else if observed <= threshold * (1.0 - self.config.recovery_margin) {
            self.resolve(report, kind, source, tick);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn raise(
        &mut self,
        report: &mut MonitorCycleReport,
        kind: AlertKind,
        source: &str,
        ratio: f64,
        message: String,
        observed: f64,
        threshold: f64,
        tick: u64,
    ) {
        let severity = AlertSeverity::from_ratio(ratio);
        if let Some(alert) = self
            .alerts
            .raise(kind, source, severity, message, observed, threshold, tick)
        {
            report.raised.push(alert);
        }
    }

    fn resolve(&mut self, report: &mut MonitorCycleReport, kind: AlertKind, source: &str, tick: u64) {
        if let Some(alert) = self.alerts.resolve(kind, source, tick) {
            report.resolved.push(alert);
        }
    }

    /// `0.4·overrun + 0.3·(1 − success) + 0.2·min(severity / 2, 1) + 0.1·(1 − efficiency)`.
    pub fn optimization_score(&self, tree: TreeId, telemetry: &TelemetryAggregator) -> Option<OptimizationScore> {
        let point = telemetry.series(tree)?.latest()?;
        let max_exec = self.config.max_exec_time_ms;
        let exec_overrun = if max_exec > 0.0 {
            ((point.exec_time_ms - max_exec) / max_exec).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let failure = (1.0 - point.success_rate).clamp(0.0, 1.0);
        let bottleneck = (telemetry.max_bottleneck_severity(tree) / 2.0).min(1.0);
        let inefficiency = (1.0 - point.efficiency).clamp(0.0, 1.0);
        let score = 0.4 * exec_overrun + 0.3 * failure + 0.2 * bottleneck + 0.1 * inefficiency;
        Some(OptimizationScore {
            tree,
            score,
            exec_overrun,
            failure,
            bottleneck,
            inefficiency,
        })
    }

    fn requests(&mut self, tick: u64, scores: &[OptimizationScore]) -> Vec<OptimizationRequest> {
        if !self.config.auto_optimize {
            return Vec::new();
        }
        let cooldown = (self.config.optimization_cooldown_secs.max(0.0) * self.tick_rate_hz).round() as u64;
        let mut out = Vec::new();
        for s in scores.iter().filter(|s| s.score >= self.config.optimization_threshold) {
            if let Some(&last) = self.last_request.get(&s.tree)
                && tick.saturating_sub(last) < cooldown
            {
                continue;
            }
            self.last_request.insert(s.tree, tick);
            info!(tree = %s.tree, score = s.score, "requesting optimization");
            out.push(OptimizationRequest {
                tree: s.tree,
                score: s.score,
                reason: format!(
                    "score {:.2} (overrun {:.2}, failure {:.2}, bottleneck {:.2}, inefficiency {:.2})",
                    s.score, s.exec_overrun, s.failure, s.bottleneck, s.inefficiency
                ),
                tick,
            });
        }
        out
    }

    // ── queries ──────────────────────────────────────────────────────────────

    pub fn history(&self) -> &VecDeque<PerformanceSnapshot> {
        &self.history
    }

    pub fn latest_snapshot(&self) -> Option<&PerformanceSnapshot> {
        self.history.back()
    }

    pub fn trend_analysis(&self) -> Option<TrendAnalysis> {
        TrendAnalysis::from_history(&self.history, self.config.trend_window, self.config.trend_threshold)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    pub fn alerts(&self) -> &AlertBook {
        &self.alerts
    }

    pub fn forget_tree(&mut self, tree: TreeId) {
        self.last_request.remove(&tree);
    }
}
