//! [`Experiment`] – A/B comparison of two fixed parameter sets.
//!
//! Group A is applied first.  Every `switch_interval_ticks` the other group
//! is applied, until `duration_ticks` have elapsed.  Each performance point
//! captured while a group was active is scored with the objective and
//! attributed to that group.  On completion a pooled two-sample t-test
//! decides the winner; the winner's parameters are committed, and the
//! baseline is restored when there is none.

use std::fmt;

use arbiter_analysis::{TTestResult, two_sample_t_test};
use arbiter_analysis::regression::DEFAULT_T_CRITICAL;
use arbiter_nodes::{ParameterArena, ParameterWrite};
use arbiter_telemetry::TelemetryAggregator;
use arbiter_types::{ArbiterError, TreeId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::objective::Objective;
use crate::space::TunedParameter;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub switch_interval_ticks: u64,
    pub duration_ticks: u64,
    pub objective: Objective,
    pub t_critical: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            switch_interval_ticks: 300,
            duration_ticks: 3600,
            objective: Objective::Efficiency,
            t_critical: DEFAULT_T_CRITICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ExperimentGroup {
    GroupA,
    GroupB,
}

impl ExperimentGroup {
    fn other(self) -> Self {
        match self {
            ExperimentGroup::GroupA => ExperimentGroup::GroupB,
            ExperimentGroup::GroupB => ExperimentGroup::GroupA,
        }
    }
}

impl fmt::Display for ExperimentGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExperimentGroup::GroupA => "GroupA",
            ExperimentGroup::GroupB => "GroupB",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentVerdict {
    pub test: TTestResult,
    pub winner: Option<ExperimentGroup>,
}

impl ExperimentVerdict {
    /// Significant difference → the group with the higher mean wins.
    pub fn decide(a: &[f64], b: &[f64], t_critical: f64) -> Self {
        let test = two_sample_t_test(a, b, t_critical);
        let winner = if !test.significant {
            None
        } else if test.mean_a > test.mean_b {
            Some(ExperimentGroup::GroupA)
        } else {
            Some(ExperimentGroup::GroupB)
        };
        Self { test, winner }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentResult {
    pub id: Uuid,
    pub tree: TreeId,
    pub objective: Objective,
    pub group_a: Vec<TunedParameter>,
    pub group_b: Vec<TunedParameter>,
    pub samples_a: Vec<f64>,
    pub samples_b: Vec<f64>,
    pub verdict: ExperimentVerdict,
    pub switches: usize,
    pub cancelled: bool,
    pub started_tick: u64,
    pub finished_tick: u64,
    pub finished_at: DateTime<Utc>,
}

impl ExperimentResult {
    pub fn winner(&self) -> Option<ExperimentGroup> {
        self.verdict.winner
    }

    pub fn significant(&self) -> bool {
        self.verdict.test.significant
    }
}

pub struct Experiment {
    id: Uuid,
    tree: TreeId,
    config: ExperimentConfig,
    group_a: Vec<ParameterWrite>,
    group_b: Vec<ParameterWrite>,
    baseline: Vec<ParameterWrite>,
    active: ExperimentGroup,
    samples_a: Vec<f64>,
    samples_b: Vec<f64>,
    last_seen_tick: u64,
    next_switch: u64,
    ends_at: u64,
    switches: usize,
    started_tick: u64,
    cancel: CancellationToken,
    done: bool,
}

impl Experiment {
    /// Capture the baseline, validate both groups and apply group A.
    ///
    /// # Errors
    ///
    /// Any write the arena rejects; the baseline is restored first.
    pub fn start(
        arena: &mut ParameterArena,
        tree: TreeId,
        group_a: Vec<ParameterWrite>,
        group_b: Vec<ParameterWrite>,
        config: ExperimentConfig,
        tick: u64,
    ) -> Result<Self, ArbiterError> {
        if config.switch_interval_ticks == 0 || config.duration_ticks == 0 {
            return Err(ArbiterError::Optimizer("experiment intervals must be positive".into()));
        }
        if group_a
            .iter()
            .chain(&group_b)
            .any(|w| w.handle.tree != tree)
        {
            return Err(ArbiterError::Optimizer(format!(
                "experiment groups must only touch {tree}"
            )));
        }
        let baseline = arena.snapshot_tree(tree);
        // Validate B up front so a bad group fails at start, not mid-run.
        if let Err(e) = arena.apply(&group_b).and_then(|_| arena.apply(&group_a)) {
            arena.apply(&baseline)?;
            return Err(e);
        }
        let id = Uuid::new_v4();
        info!(%tree, %id, duration = config.duration_ticks, switch = config.switch_interval_ticks, "experiment started");
        Ok(Self {
            id,
            tree,
            next_switch: tick + config.switch_interval_ticks,
            ends_at: tick + config.duration_ticks,
            config,
            group_a,
            group_b,
            baseline,
            active: ExperimentGroup::GroupA,
            samples_a: Vec::new(),
            samples_b: Vec::new(),
            last_seen_tick: tick,
            switches: 0,
            started_tick: tick,
            cancel: CancellationToken::new(),
            done: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub fn active_group(&self) -> ExperimentGroup {
        self.active
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn sample_counts(&self) -> (usize, usize) {
        (self.samples_a.len(), self.samples_b.len())
    }

    pub fn step(
        &mut self,
        tick: u64,
        arena: &mut ParameterArena,
        telemetry: &TelemetryAggregator,
    ) -> Result<Option<ExperimentResult>, ArbiterError> {
        if self.done {
            return Ok(None);
        }
        self.collect(telemetry);

        if self.cancel.is_cancelled() || tick >= self.ends_at {
            return self.finish(tick, arena).map(Some);
        }
        if tick >= self.next_switch {
            self.active = self.active.other();
            let writes = match self.active {
                ExperimentGroup::GroupA => &self.group_a,
                ExperimentGroup::GroupB => &self.group_b,
            };
            arena.apply(writes)?;
            self.switches += 1;
            self.next_switch = tick + self.config.switch_interval_ticks;
            debug!(tree = %self.tree, group = %self.active, tick, "experiment switched group");
        }
        Ok(None)
    }

    /// Attribute points captured since the last step to the active group.
    fn collect(&mut self, telemetry: &TelemetryAggregator) {
        let Some(series) = telemetry.series(self.tree) else {
            return;
        };
        let fresh = series.since(self.last_seen_tick + 1);
        let Some(last) = fresh.last() else {
            return;
        };
        self.last_seen_tick = last.tick;
        let target = match self.active {
            ExperimentGroup::GroupA => &mut self.samples_a,
            ExperimentGroup::GroupB => &mut self.samples_b,
        };
        target.extend(
            fresh
                .iter()
                .map(|p| self.config.objective.score_point(p))
                .filter(|s| s.is_finite()),
        );
    }

    fn finish(&mut self, tick: u64, arena: &mut ParameterArena) -> Result<ExperimentResult, ArbiterError> {
        self.done = true;
        let verdict = ExperimentVerdict::decide(&self.samples_a, &self.samples_b, self.config.t_critical);
        let committed = match verdict.winner {
            Some(ExperimentGroup::GroupA) => &self.group_a,
            Some(ExperimentGroup::GroupB) => &self.group_b,
            None => &self.baseline,
        };
        arena.apply(committed)?;

        let result = ExperimentResult {
            id: self.id,
            tree: self.tree,
            objective: self.config.objective,
            group_a: self.group_a.iter().map(TunedParameter::from).collect(),
            group_b: self.group_b.iter().map(TunedParameter::from).collect(),
            samples_a: self.samples_a.clone(),
            samples_b: self.samples_b.clone(),
            verdict,
            switches: self.switches,
            cancelled: self.cancel.is_cancelled(),
            started_tick: self.started_tick,
            finished_tick: tick,
            finished_at: Utc::now(),
        };
        info!(
            tree = %self.tree,
            id = %self.id,
            winner = ?result.verdict.winner,
            t = result.verdict.test.t_statistic,
            n_a = result.samples_a.len(),
            n_b = result.samples_b.len(),
            "experiment finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::test_support::{arena, handle};
    use arbiter_nodes::node::NodeRecord;
    use arbiter_nodes::{NodeKind, NodeStatus, TickTrace, TreeTickReport};
    use arbiter_telemetry::FrameSample;

    fn efficiency_samples(mean: f64) -> Vec<f64> {
        (0..20).map(|i| mean + if i % 2 == 0 { 0.01 } else { -0.01 }).collect()
    }

    #[test]
    fn clearly_better_group_a_wins() {
        let verdict = ExperimentVerdict::decide(&efficiency_samples(0.9), &efficiency_samples(0.6), 2.0);
        assert_eq!(verdict.winner, Some(ExperimentGroup::GroupA));
        assert!(verdict.test.significant);
    }

    #[test]
    fn indistinguishable_groups_have_no_winner() {
        let verdict = ExperimentVerdict::decide(&efficiency_samples(0.7), &efficiency_samples(0.7), 2.0);
        assert_eq!(verdict.winner, None);
    }

    fn write(name: &str, value: f64) -> ParameterWrite {
        ParameterWrite {
            handle: handle(0),
            name: name.into(),
            value,
        }
    }

    fn telemetry() -> TelemetryAggregator {
        let mut agg = TelemetryAggregator::default();
        agg.register_tree(TreeId(1), "duelist");
        agg
    }

    /// Success rate follows `range / 10`.
    fn capture(agg: &mut TelemetryAggregator, arena: &ParameterArena, tick: u64) {
        let range = arena.value(handle(0), "range").unwrap_or(0.0);
        let successes = (range.round() as u32).min(10);
        for i in 0..10 {
            let status = if i < successes {
                NodeStatus::Success
            } else {
                NodeStatus::Failure
            };
            agg.record_tick(&TreeTickReport {
                tree: TreeId(1),
                tick,
                status,
                elapsed_ms: 0.0,
                trace: TickTrace {
                    records: vec![NodeRecord {
                        handle: handle(0),
                        name: "attack".into(),
                        kind: NodeKind::Action,
                        status,
                        elapsed_ms: 0.0,
                        cached: false,
                        faulted: false,
                    }],
                    branches: vec![],
                },
            })
            .unwrap();
        }
        agg.capture(TreeId(1), tick, &FrameSample::default()).unwrap();
    }

    fn config() -> ExperimentConfig {
        ExperimentConfig {
            switch_interval_ticks: 50,
            duration_ticks: 1000,
            objective: Objective::SuccessRate,
            t_critical: 2.0,
        }
    }

    #[test]
    fn groups_alternate_and_winner_is_committed() {
        let mut arena = arena();
        let mut agg = telemetry();
        let mut exp = Experiment::start(
            &mut arena,
            TreeId(1),
            vec![write("range", 9.0)],
            vec![write("range", 4.0)],
            config(),
            0,
        )
        .unwrap();
        assert_eq!(arena.value(handle(0), "range"), Some(9.0));

        let mut result = None;
        for tick in 1..=1000 {
            if tick % 10 == 0 {
                capture(&mut agg, &arena, tick);
            }
            if let Some(r) = exp.step(tick, &mut arena, &agg).unwrap() {
                result = Some(r);
                break;
            }
            if tick == 50 {
                assert_eq!(exp.active_group(), ExperimentGroup::GroupB);
                assert_eq!(arena.value(handle(0), "range"), Some(4.0));
            }
        }
        let result = result.unwrap();
        assert_eq!(result.winner(), Some(ExperimentGroup::GroupA));
        assert!(result.significant());
        assert_eq!(result.switches, 19);
        assert_eq!(result.samples_a.len(), 50);
        assert_eq!(result.samples_b.len(), 50);
        assert!(result.samples_a.iter().all(|&s| s == 0.9));
        assert_eq!(arena.value(handle(0), "range"), Some(9.0));
        assert!(exp.is_done());
    }

    #[test]
    fn cancelled_experiment_without_data_restores_baseline() {
        let mut arena = arena();
        let agg = telemetry();
        let mut exp = Experiment::start(
            &mut arena,
            TreeId(1),
            vec![write("range", 9.0)],
            vec![write("range", 4.0)],
            config(),
            0,
        )
        .unwrap();
        exp.cancel_token().cancel();
        let result = exp.step(1, &mut arena, &agg).unwrap().unwrap();
        assert!(result.cancelled);
        assert_eq!(result.winner(), None);
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
    }

    #[test]
    fn bad_group_fails_at_start_and_keeps_baseline() {
        let mut arena = arena();
        let err = Experiment::start(
            &mut arena,
            TreeId(1),
            vec![write("range", 9.0)],
            vec![write("missing", 1.0)],
            config(),
            0,
        );
        assert!(err.is_err());
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
    }
}
