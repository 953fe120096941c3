//! Rule-based optimization recommendations.
//!
//! Each rule inspects one aspect of an analysis and may emit a
//! [`Recommendation`] with an expected impact in `[0, 1]` and an effort
//! tier.  Priority is `impact × effort weight × kind weight`; the list is
//! ranked by priority and truncated.
//!
//! | Effort | Weight |
//! |---|---|
//! | Low | 1.0 |
//! | Medium | 0.7 |
//! | High | 0.4 |

use arbiter_telemetry::NodePriority;
use arbiter_types::{Alert, AlertKind, NodeHandle};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::analyzer::MetricAnalysis;
use crate::correlation::CorrelationMatrix;
use crate::metric::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EffortTier {
    Low,
    Medium,
    High,
}

impl EffortTier {
    pub fn weight(self) -> f64 {
        match self {
            EffortTier::Low => 1.0,
            EffortTier::Medium => 0.7,
            EffortTier::High => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RecommendationKind {
    LowSuccessRate,
    HighExecutionTime,
    HighVariance,
    ExcessOutliers,
    NonNormalDistribution,
    AdverseCorrelation,
    NegativeTrend,
    MemoryLeak,
    ParameterTuning,
}

impl RecommendationKind {
    pub fn weight(self) -> f64 {
        match self {
            RecommendationKind::LowSuccessRate | RecommendationKind::MemoryLeak => 1.0,
            RecommendationKind::HighExecutionTime | RecommendationKind::NegativeTrend => 0.9,
            RecommendationKind::ParameterTuning => 0.8,
            RecommendationKind::AdverseCorrelation => 0.7,
            RecommendationKind::HighVariance => 0.6,
            RecommendationKind::ExcessOutliers => 0.5,
            RecommendationKind::NonNormalDistribution => 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub title: String,
    pub detail: String,
    pub metric: Option<Metric>,
    /// Node the suggestion is about, when it targets one.
    pub target: Option<NodeHandle>,
    pub expected_impact: f64,
    pub effort: EffortTier,
    pub priority: f64,
}

impl Recommendation {
    fn new(
        kind: RecommendationKind,
        title: impl Into<String>,
        detail: impl Into<String>,
        impact: f64,
        effort: EffortTier,
    ) -> Self {
        let expected_impact = impact.clamp(0.0, 1.0);
        Self {
            kind,
            title: title.into(),
            detail: detail.into(),
            metric: None,
            target: None,
            expected_impact,
            effort,
            priority: expected_impact * effort.weight() * kind.weight(),
        }
    }

    fn on(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub low_success_rate: f64,
    pub high_exec_time_ms: f64,
    /// Coefficient of variation above which a metric is called unstable.
    pub high_variation: f64,
    /// Outlier fraction above which outliers are reported.
    pub outlier_fraction: f64,
    /// Samples needed before the normality rule fires.
    pub min_normality_samples: usize,
    pub max_recommendations: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            low_success_rate: 0.6,
            high_exec_time_ms: 2.0,
            high_variation: 0.3,
            outlier_fraction: 0.1,
            min_normality_samples: 8,
            max_recommendations: 5,
        }
    }
}

/// What the rules look at.
pub struct RecommendationInput<'a> {
    pub metrics: &'a [MetricAnalysis],
    pub correlations: &'a CorrelationMatrix,
    pub active_alerts: &'a [Alert],
    pub top_priority: Option<&'a NodePriority>,
}

pub fn recommend(input: &RecommendationInput<'_>, config: &RecommendationConfig) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let analysis = |m: Metric| input.metrics.iter().find(|a| a.metric == m);

    if let Some(sr) = analysis(Metric::SuccessRate)
        && sr.stats.count > 0
        && config.low_success_rate > 0.0
        && sr.stats.mean < config.low_success_rate
    {
        let gap = (config.low_success_rate - sr.stats.mean) / config.low_success_rate;
        out.push(
            Recommendation::new(
                RecommendationKind::LowSuccessRate,
                "Raise success rate",
                format!(
                    "mean success rate {:.2} is below {:.2}; revisit action gating and condition thresholds",
                    sr.stats.mean, config.low_success_rate
                ),
                0.5 + 0.5 * gap,
                EffortTier::Medium,
            )
            .on(Metric::SuccessRate),
        );
    }

    if let Some(exec) = analysis(Metric::ExecTime)
        && exec.stats.count > 0
        && config.high_exec_time_ms > 0.0
        && exec.stats.mean > config.high_exec_time_ms
    {
        let overrun = (exec.stats.mean - config.high_exec_time_ms) / config.high_exec_time_ms;
        out.push(
            Recommendation::new(
                RecommendationKind::HighExecutionTime,
                "Reduce tick time",
                format!(
                    "mean tick time {:.2} ms exceeds {:.2} ms; widen cache windows or prune expensive leaves",
                    exec.stats.mean, config.high_exec_time_ms
                ),
                overrun,
                EffortTier::Medium,
            )
            .on(Metric::ExecTime),
        );
    }

    for a in input.metrics.iter().filter(|a| a.stats.count > 1) {
        let cv = a.stats.coefficient_of_variation();
        if cv > config.high_variation {
            out.push(
                Recommendation::new(
                    RecommendationKind::HighVariance,
                    format!("Stabilise {}", a.metric),
                    format!("coefficient of variation {cv:.2} above {:.2}", config.high_variation),
                    cv * 0.5,
                    EffortTier::Medium,
                )
                .on(a.metric),
            );
        }

        let fraction = a.outliers.fraction(a.stats.count);
        if fraction > config.outlier_fraction {
            out.push(
                Recommendation::new(
                    RecommendationKind::ExcessOutliers,
                    format!("Investigate {} outliers", a.metric),
                    format!(
                        "{} of {} points fall outside [{:.3}, {:.3}]",
                        a.outliers.outliers.len(),
                        a.stats.count,
                        a.outliers.lower_fence,
                        a.outliers.upper_fence
                    ),
                    fraction,
                    EffortTier::Low,
                )
                .on(a.metric),
            );
        }

        if a.stats.count >= config.min_normality_samples && !a.distribution.normality.is_normal {
            out.push(
                Recommendation::new(
                    RecommendationKind::NonNormalDistribution,
                    format!("{} is not normally distributed", a.metric),
                    format!(
                        "Jarque-Bera {:.2}, shape {:?}; mean-based verdicts may be unreliable",
                        a.distribution.normality.jarque_bera, a.distribution.shape
                    ),
                    0.2,
                    EffortTier::High,
                )
                .on(a.metric),
            );
        }

        if a.trend.is_adverse(a.metric) {
            out.push(
                Recommendation::new(
                    RecommendationKind::NegativeTrend,
                    format!("{} is trending worse", a.metric),
                    format!("slope {:.4} per point, R² {:.2}", a.trend.slope, a.trend.r_squared),
                    a.trend.r_squared * 0.8,
                    EffortTier::Medium,
                )
                .on(a.metric),
            );
        }
    }

    for pair in input.correlations.adverse_pairs() {
        out.push(
            Recommendation::new(
                RecommendationKind::AdverseCorrelation,
                format!("Trade-off between {} and {}", pair.a, pair.b),
                format!("correlation {:.2}: improving one worsens the other", pair.r),
                pair.r.abs() * 0.5,
                EffortTier::High,
            )
            .on(pair.a),
        );
    }

    if input
        .active_alerts
        .iter()
        .any(|a| !a.resolved && a.kind == AlertKind::MemoryLeak)
    {
        out.push(
            Recommendation::new(
                RecommendationKind::MemoryLeak,
                "Investigate memory growth",
                "an unresolved memory-leak alert is active; check for retained traces and unbounded histories",
                0.8,
                EffortTier::High,
            )
            .on(Metric::Memory),
        );
    }

    if let Some(top) = input.top_priority
        && top.score > 0.0
    {
        let mut rec = Recommendation::new(
            RecommendationKind::ParameterTuning,
            format!("Tune parameters of {}", top.name),
            format!("highest optimization priority ({:.2}) in the tree", top.score),
            top.score * 0.6,
            EffortTier::Low,
        );
        rec.target = Some(top.handle);
        out.push(rec);
    }

    out.sort_by(|a, b| b.priority.total_cmp(&a.priority));
    out.truncate(config.max_recommendations);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MetricAnalysis;
    use arbiter_types::{AlertSeverity, NodeId, TreeId};

    fn analysis(metric: Metric, values: &[f64]) -> MetricAnalysis {
        MetricAnalysis::compute(metric, values, &crate::analyzer::AnalyzerConfig::default())
    }

    fn empty_matrix() -> CorrelationMatrix {
        CorrelationMatrix::from_points(&[])
    }

    #[test]
    fn low_success_rate_is_recommended() {
        let metrics = vec![analysis(Metric::SuccessRate, &[0.3, 0.31, 0.29, 0.3, 0.3, 0.31])];
        let matrix = empty_matrix();
        let recs = recommend(
            &RecommendationInput {
                metrics: &metrics,
                correlations: &matrix,
                active_alerts: &[],
                top_priority: None,
            },
            &RecommendationConfig::default(),
        );
        assert_eq!(recs[0].kind, RecommendationKind::LowSuccessRate);
        assert_eq!(recs[0].effort, EffortTier::Medium);
        let expected = recs[0].expected_impact * 0.7 * 1.0;
        assert!((recs[0].priority - expected).abs() < 1e-12);
    }

    #[test]
    fn memory_leak_and_top_node_rules() {
        let matrix = empty_matrix();
        let leak = Alert::new(AlertKind::MemoryLeak, "system", AlertSeverity::Low, "leak", 0.2, 0.1, 10);
        let top = NodePriority {
            handle: NodeHandle::new(TreeId(1), NodeId(4)),
            name: "attack".into(),
            score: 1.0,
        };
        let recs = recommend(
            &RecommendationInput {
                metrics: &[],
                correlations: &matrix,
                active_alerts: std::slice::from_ref(&leak),
                top_priority: Some(&top),
            },
            &RecommendationConfig::default(),
        );
        assert_eq!(recs.len(), 2);
        // 0.6 × 1.0 × 0.8 beats 0.8 × 0.4 × 1.0.
        assert_eq!(recs[0].kind, RecommendationKind::ParameterTuning);
        assert_eq!(recs[0].target, Some(top.handle));
        assert_eq!(recs[1].kind, RecommendationKind::MemoryLeak);
    }

    #[test]
    fn resolved_leak_is_ignored() {
        let matrix = empty_matrix();
        let mut leak = Alert::new(AlertKind::MemoryLeak, "system", AlertSeverity::Low, "leak", 0.2, 0.1, 10);
        leak.resolve(20);
        let recs = recommend(
            &RecommendationInput {
                metrics: &[],
                correlations: &matrix,
                active_alerts: std::slice::from_ref(&leak),
                top_priority: None,
            },
            &RecommendationConfig::default(),
        );
        assert!(recs.is_empty());
    }

    #[test]
    fn list_is_ranked_and_truncated() {
        let noisy: Vec<f64> = (0..20).map(|i| if i % 3 == 0 { 0.1 } else { 0.5 - 0.02 * i as f64 }).collect();
        let slow: Vec<f64> = (0..20).map(|i| 3.0 + 0.5 * i as f64).collect();
        let metrics = vec![analysis(Metric::SuccessRate, &noisy), analysis(Metric::ExecTime, &slow)];
        let matrix = empty_matrix();
        let cfg = RecommendationConfig {
            max_recommendations: 3,
            ..RecommendationConfig::default()
        };
        let recs = recommend(
            &RecommendationInput {
                metrics: &metrics,
                correlations: &matrix,
                active_alerts: &[],
                top_priority: None,
            },
            &cfg,
        );
        assert_eq!(recs.len(), 3);
        assert!(recs.windows(2).all(|w| w[0].priority >= w[1].priority));
    }
}
