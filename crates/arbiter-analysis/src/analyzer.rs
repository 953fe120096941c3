//! [`StatisticalAnalyzer`] – periodic per-tree analysis of the telemetry
//! series.
//!
//! Every `interval_ticks` the analyzer pulls the last `window` performance
//! points of each registered tree and produces an [`AnalysisReport`]:
//! per-metric statistics, the correlation matrix, regression checks and
//! ranked recommendations.  Alerts are passed in from the monitor's previous
//! cycle, so the analyzer sees them one cycle late.

use std::collections::{BTreeMap, BTreeSet};

use arbiter_telemetry::{PerformancePoint, TelemetryAggregator};
use arbiter_types::{Alert, EventPayload, TreeId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::correlation::CorrelationMatrix;
use crate::descriptive::{ConfidenceInterval, ConfidenceLevel, DescriptiveStats, moving_average};
use crate::distribution::{DistributionAnalysis, Histogram, OutlierReport, Seasonality};
use crate::metric::Metric;
use crate::recommend::{Recommendation, RecommendationConfig, RecommendationInput, recommend};
use crate::regression::{RegressionCheck, RegressionConfig, check_regression};
use crate::trend::TrendLine;

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Ticks between analysis cycles.
    pub interval_ticks: u64,
    /// Points analysed per tree.
    pub window: usize,
    /// Points required before a tree is analysed at all.
    pub min_points: usize,
    pub confidence: ConfidenceLevel,
    pub moving_average_window: usize,
    /// `0` picks `⌈√n⌉` bins.
    pub histogram_bins: usize,
    pub seasonality_max_lag: usize,
    pub regression: RegressionConfig,
    pub recommendations: RecommendationConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            interval_ticks: 300,
            window: 100,
            min_points: 5,
            confidence: ConfidenceLevel::P95,
            moving_average_window: 5,
            histogram_bins: 0,
            seasonality_max_lag: 20,
            regression: RegressionConfig::default(),
            recommendations: RecommendationConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reports
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricAnalysis {
    pub metric: Metric,
    pub stats: DescriptiveStats,
    pub confidence: ConfidenceInterval,
    pub moving_average: Vec<f64>,
    pub distribution: DistributionAnalysis,
    pub histogram: Histogram,
    pub outliers: OutlierReport,
    pub seasonality: Seasonality,
    pub trend: TrendLine,
    pub regression: Option<RegressionCheck>,
}

impl MetricAnalysis {
    pub fn compute(metric: Metric, values: &[f64], config: &AnalyzerConfig) -> Self {
        Self {
            metric,
            stats: DescriptiveStats::from_samples(values),
            confidence: ConfidenceInterval::of(values, config.confidence),
            moving_average: moving_average(values, config.moving_average_window),
            distribution: DistributionAnalysis::of(values),
            histogram: Histogram::build(values, config.histogram_bins),
            outliers: OutlierReport::iqr(values),
            seasonality: Seasonality::detect(values, config.seasonality_max_lag),
            trend: TrendLine::fit(values),
            regression: check_regression(metric, values, &config.regression),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisReport {
    pub tree: TreeId,
    pub tree_name: String,
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub point_count: usize,
    pub metrics: Vec<MetricAnalysis>,
    pub correlations: CorrelationMatrix,
    /// Checks that flagged a regression.
    pub regressions: Vec<RegressionCheck>,
    pub recommendations: Vec<Recommendation>,
    /// Unresolved alerts seen when the report was built.
    pub active_alerts: usize,
}

impl AnalysisReport {
    pub fn metric(&self, metric: Metric) -> Option<&MetricAnalysis> {
        self.metrics.iter().find(|m| m.metric == metric)
    }

    /// Output events for the bus, in publication order.
    pub fn events(&self) -> Vec<EventPayload> {
        let mut out = vec![EventPayload::AnalysisCompleted {
            tree: self.tree,
            sample_count: self.point_count,
            regression_count: self.regressions.len(),
            recommendation_count: self.recommendations.len(),
        }];
        out.extend(self.regressions.iter().map(|r| EventPayload::RegressionDetected {
            tree: self.tree,
            metric: r.metric.to_string(),
            degradation: r.degradation,
            t_statistic: r.t_statistic,
        }));
        out.extend(self.recommendations.iter().map(|r| EventPayload::RecommendationReady {
            tree: self.tree,
            title: r.title.clone(),
            priority: r.priority,
        }));
        out.push(EventPayload::VisualizationDataUpdated {
            tree: self.tree,
            points: self.point_count,
        });
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Analyzer
// ─────────────────────────────────────────────────────────────────────────────

pub struct StatisticalAnalyzer {
    config: AnalyzerConfig,
    trees: BTreeSet<TreeId>,
    latest: BTreeMap<TreeId, AnalysisReport>,
    last_cycle: Option<u64>,
}

impl StatisticalAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            trees: BTreeSet::new(),
            latest: BTreeMap::new(),
            last_cycle: None,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn register_tree(&mut self, tree: TreeId) {
        self.trees.insert(tree);
    }

    pub fn unregister_tree(&mut self, tree: TreeId) {
        self.trees.remove(&tree);
        self.latest.remove(&tree);
    }

    pub fn is_due(&self, tick: u64) -> bool {
        match self.last_cycle {
            None => tick >= self.config.interval_ticks,
            Some(last) => tick.saturating_sub(last) >= self.config.interval_ticks.max(1),
        }
    }

    /// Analyse every registered tree with enough points.
    pub fn run_cycle(&mut self, tick: u64, telemetry: &TelemetryAggregator, alerts: &[Alert]) -> Vec<AnalysisReport> {
        self.last_cycle = Some(tick);
        let trees: Vec<TreeId> = self.trees.iter().copied().collect();
        let mut reports = Vec::new();
        for tree in trees {
            match self.analyze(tree, tick, telemetry, alerts) {
                Some(report) => reports.push(report),
                None => debug!(%tree, "not enough points to analyse"),
            }
        }
        reports
    }

    /// Analyse one tree now, independent of the cycle cadence.
    pub fn analyze(
        &mut self,
        tree: TreeId,
        tick: u64,
        telemetry: &TelemetryAggregator,
        alerts: &[Alert],
    ) -> Option<AnalysisReport> {
        let points = telemetry.recent_points(tree, self.config.window);
        if points.len() < self.config.min_points.max(1) {
            return None;
        }
        let name = telemetry
            .tree_stats(tree)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| tree.to_string());
        let priorities = telemetry.optimization_priorities(tree);
        let report = analyze_points(tree, &name, tick, &points, alerts, priorities.first(), &self.config);

        for r in &report.regressions {
            warn!(%tree, metric = %r.metric, degradation = r.degradation, t = r.t_statistic, "performance regression");
        }
        info!(
            %tree,
            points = report.point_count,
            regressions = report.regressions.len(),
            recommendations = report.recommendations.len(),
            "analysis completed"
        );
        self.latest.insert(tree, report.clone());
        Some(report)
    }

    pub fn latest(&self, tree: TreeId) -> Option<&AnalysisReport> {
        self.latest.get(&tree)
    }

    pub fn latest_reports(&self) -> impl Iterator<Item = &AnalysisReport> {
        self.latest.values()
    }
}

impl Default for StatisticalAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

/// Pure analysis of a point window; the analyzer's cycle is a thin wrapper.
pub fn analyze_points(
    tree: TreeId,
    name: &str,
    tick: u64,
    points: &[PerformancePoint],
    alerts: &[Alert],
    top_priority: Option<&arbiter_telemetry::NodePriority>,
    config: &AnalyzerConfig,
) -> AnalysisReport {
    let metrics: Vec<MetricAnalysis> = Metric::ALL
        .iter()
        .map(|&m| MetricAnalysis::compute(m, &m.series(points), config))
        .collect();
    let correlations = CorrelationMatrix::from_points(points);
    let regressions = metrics
        .iter()
        .filter_map(|m| m.regression.clone())
        .filter(|r| r.regressed)
        .collect();
    let recommendations = recommend(
        &RecommendationInput {
            metrics: &metrics,
            correlations: &correlations,
            active_alerts: alerts,
            top_priority,
        },
        &config.recommendations,
    );
    AnalysisReport {
        tree,
        tree_name: name.to_string(),
        tick,
        timestamp: Utc::now(),
        point_count: points.len(),
        metrics,
        correlations,
        regressions,
        recommendations,
        active_alerts: alerts.iter().filter(|a| !a.resolved).count(),
    }
}
