//! [`OptimizationEngine`] – owns the active optimization runs and A/B
//! experiments, at most one job per tree, and keeps a bounded history of
//! finished ones.
//!
//! The engine never blocks.  The runtime calls [`OptimizationEngine::step`]
//! once per tick; every job advances its own state machine and finished jobs
//! are turned into output events.

use std::collections::{BTreeMap, VecDeque};

use arbiter_nodes::{ParameterArena, ParameterWrite};
use arbiter_telemetry::TelemetryAggregator;
use arbiter_types::{ArbiterError, EventPayload, TreeId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::experiment::{Experiment, ExperimentConfig, ExperimentResult};
use crate::objective::Objective;
use crate::run::{OptimizationResult, OptimizationRun, RunSettings};
use crate::strategy::StrategyKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub strategy: StrategyKind,
    pub objective: Objective,
    pub max_iterations: usize,
    /// Sampling intervals a candidate stays applied before it is scored.
    pub evaluation_intervals: u64,
    pub convergence_window: usize,
    pub convergence_threshold: f64,
    pub history_capacity: usize,
    /// Fixed seed for reproducible runs; drawn from entropy when `None`.
    pub seed: Option<u64>,
    pub experiment: ExperimentConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Bayesian,
            objective: Objective::Efficiency,
            max_iterations: 20,
            evaluation_intervals: 3,
            convergence_window: 5,
            convergence_threshold: 0.001,
            history_capacity: 50,
            seed: None,
            experiment: ExperimentConfig::default(),
        }
    }
}

enum Job {
    Run(OptimizationRun),
    Experiment(Experiment),
}

impl Job {
    fn cancel_token(&self) -> CancellationToken {
        match self {
            Job::Run(run) => run.cancel_token(),
            Job::Experiment(exp) => exp.cancel_token(),
        }
    }
}

/// Jobs that finished during one [`OptimizationEngine::step`].
#[derive(Debug, Clone, Default)]
pub struct OptimizerStepReport {
    pub optimizations: Vec<OptimizationResult>,
    pub experiments: Vec<ExperimentResult>,
    /// Jobs that failed mid-flight and were dropped.
    pub failures: Vec<(TreeId, ArbiterError)>,
}

impl OptimizerStepReport {
    pub fn is_empty(&self) -> bool {
        self.optimizations.is_empty() && self.experiments.is_empty() && self.failures.is_empty()
    }

    pub fn events(&self) -> Vec<EventPayload> {
        let runs = self.optimizations.iter().map(|r| EventPayload::OptimizationCompleted {
            tree: r.tree,
            run_id: r.id,
            best_score: r.best_score,
            iterations: r.iterations,
            converged: r.converged,
        });
        let experiments = self.experiments.iter().map(|e| EventPayload::ExperimentCompleted {
            tree: e.tree,
            experiment_id: e.id,
            winner: e.winner().map(|g| g.to_string()),
            significant: e.significant(),
        });
        runs.chain(experiments).collect()
    }
}

pub struct OptimizationEngine {
    config: OptimizerConfig,
    jobs: BTreeMap<TreeId, Job>,
    optimization_history: VecDeque<OptimizationResult>,
    experiment_history: VecDeque<ExperimentResult>,
    runs_started: u64,
}

impl Default for OptimizationEngine {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl OptimizationEngine {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            jobs: BTreeMap::new(),
            optimization_history: VecDeque::new(),
            experiment_history: VecDeque::new(),
            runs_started: 0,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn is_active(&self, tree: TreeId) -> bool {
        self.jobs.contains_key(&tree)
    }

    pub fn active_trees(&self) -> impl Iterator<Item = TreeId> + '_ {
        self.jobs.keys().copied()
    }

    fn ensure_idle(&self, tree: TreeId) -> Result<(), ArbiterError> {
        if self.is_active(tree) {
            return Err(ArbiterError::Optimizer(format!("{tree} already has an active optimization job")));
        }
        Ok(())
    }

    fn next_seed(&mut self) -> u64 {
        let n = self.runs_started;
        self.runs_started += 1;
        match self.config.seed {
            Some(seed) => seed.wrapping_add(n),
            None => rand::random(),
        }
    }

    /// Start an optimization run on `tree`.  Returns a token that cancels it.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::Optimizer`] when `tree` already has an active job or
    /// has no tunable parameters.
    pub fn start_optimization(
        &mut self,
        tree: TreeId,
        strategy: StrategyKind,
        objective: Objective,
        tick: u64,
        arena: &ParameterArena,
        telemetry: &TelemetryAggregator,
    ) -> Result<CancellationToken, ArbiterError> {
        self.ensure_idle(tree)?;
        let settings = RunSettings {
            strategy,
            objective,
            max_iterations: self.config.max_iterations,
            evaluation_ticks: self.config.evaluation_intervals.max(1) * telemetry.config().sample_interval_ticks.max(1),
            convergence_window: self.config.convergence_window,
            convergence_threshold: self.config.convergence_threshold,
            seed: self.next_seed(),
        };
        let run = OptimizationRun::start(arena, tree, settings, tick)?;
        let token = run.cancel_token();
        self.jobs.insert(tree, Job::Run(run));
        Ok(token)
    }

    /// Start an optimization run with the configured default strategy and
    /// objective.
    pub fn start_default_optimization(
        &mut self,
        tree: TreeId,
        tick: u64,
        arena: &ParameterArena,
        telemetry: &TelemetryAggregator,
    ) -> Result<CancellationToken, ArbiterError> {
        let (strategy, objective) = (self.config.strategy, self.config.objective);
        self.start_optimization(tree, strategy, objective, tick, arena, telemetry)
    }

    /// Start an A/B experiment on `tree` with the configured timing.
    pub fn start_experiment(
        &mut self,
        tree: TreeId,
        group_a: Vec<ParameterWrite>,
        group_b: Vec<ParameterWrite>,
        tick: u64,
        arena: &mut ParameterArena,
    ) -> Result<CancellationToken, ArbiterError> {
        self.ensure_idle(tree)?;
        let exp = Experiment::start(arena, tree, group_a, group_b, self.config.experiment.clone(), tick)?;
        let token = exp.cancel_token();
        self.jobs.insert(tree, Job::Experiment(exp));
        Ok(token)
    }

    pub fn cancel(&self, tree: TreeId) -> bool {
        match self.jobs.get(&tree) {
            Some(job) => {
                job.cancel_token().cancel();
                true
            }
            None => false,
        }
    }

    /// Flag every active job; each finishes on its next step.
    pub fn cancel_all(&self) {
        for job in self.jobs.values() {
            job.cancel_token().cancel();
        }
    }

    /// Tokens of every active job, for a signal handler.
    pub fn cancel_tokens(&self) -> Vec<CancellationToken> {
        self.jobs.values().map(Job::cancel_token).collect()
    }

    pub fn step(
        &mut self,
        tick: u64,
        arena: &mut ParameterArena,
        telemetry: &mut TelemetryAggregator,
    ) -> OptimizerStepReport {
        let mut report = OptimizerStepReport::default();
        let mut finished = Vec::new();

        for (&tree, job) in self.jobs.iter_mut() {
            let outcome = match job {
                Job::Run(run) => run.step(tick, arena, telemetry).map(|r| r.map(|r| report.optimizations.push(r))),
                Job::Experiment(exp) => exp.step(tick, arena, telemetry).map(|r| r.map(|r| report.experiments.push(r))),
            };
            match outcome {
                Ok(Some(())) => finished.push(tree),
                Ok(None) => {}
                Err(e) => {
                    warn!(%tree, error = %e, "optimization job failed");
                    report.failures.push((tree, e));
                    finished.push(tree);
                }
            }
        }
        for tree in finished {
            self.jobs.remove(&tree);
        }

        let cap = self.config.history_capacity.max(1);
        for result in &report.optimizations {
            push_bounded(&mut self.optimization_history, result.clone(), cap);
        }
        for result in &report.experiments {
            push_bounded(&mut self.experiment_history, result.clone(), cap);
        }
        if !report.is_empty() {
            info!(
                tick,
                optimizations = report.optimizations.len(),
                experiments = report.experiments.len(),
                failures = report.failures.len(),
                "optimizer jobs finished"
            );
        }
        report
    }

    /// Oldest first.
    pub fn optimization_history(&self) -> impl Iterator<Item = &OptimizationResult> {
        self.optimization_history.iter()
    }

    pub fn experiment_history(&self) -> impl Iterator<Item = &ExperimentResult> {
        self.experiment_history.iter()
    }

    /// Drop the job for a tree that is being unregistered, without
    /// touching its parameters.
    pub fn forget_tree(&mut self, tree: TreeId) {
        self.jobs.remove(&tree);
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    if queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentGroup;
    use crate::space::test_support::{arena, handle};
    use arbiter_telemetry::{FrameSample, TelemetryConfig};

    fn telemetry() -> TelemetryAggregator {
        let mut agg = TelemetryAggregator::new(TelemetryConfig {
            sample_interval_ticks: 10,
            ..TelemetryConfig::default()
        });
        agg.register_tree(TreeId(1), "duelist");
        agg
    }

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            max_iterations: 4,
            seed: Some(7),
            history_capacity: 2,
            experiment: ExperimentConfig {
                switch_interval_ticks: 20,
                duration_ticks: 80,
                ..ExperimentConfig::default()
            },
            ..OptimizerConfig::default()
        }
    }

    fn drive(engine: &mut OptimizationEngine, arena: &mut ParameterArena, agg: &mut TelemetryAggregator, from: u64) -> (u64, OptimizerStepReport) {
        for tick in from..from + 10_000 {
            if tick % 10 == 0 {
                agg.capture(TreeId(1), tick, &FrameSample::default()).unwrap();
            }
            let report = engine.step(tick, arena, agg);
            if !report.is_empty() {
                return (tick, report);
            }
        }
        panic!("no job finished");
    }

    #[test]
    fn one_job_per_tree() {
        let mut engine = OptimizationEngine::new(config());
        let mut arena = arena();
        let agg = telemetry();
        engine.start_default_optimization(TreeId(1), 0, &arena, &agg).unwrap();
        assert!(engine.is_active(TreeId(1)));
        assert!(engine.start_default_optimization(TreeId(1), 0, &arena, &agg).is_err());
        let writes = vec![ParameterWrite {
            handle: handle(0),
            name: "range".into(),
            value: 3.0,
        }];
        assert!(engine.start_experiment(TreeId(1), writes.clone(), writes, 0, &mut arena).is_err());
    }

    #[test]
    fn finished_run_emits_event_and_lands_in_history() {
        let mut engine = OptimizationEngine::new(config());
        let mut arena = arena();
        let mut agg = telemetry();
        engine.start_default_optimization(TreeId(1), 0, &arena, &agg).unwrap();

        let (_, report) = drive(&mut engine, &mut arena, &mut agg, 1);
        assert_eq!(report.optimizations.len(), 1);
        assert!(report.optimizations[0].iterations <= 4);
        assert!(matches!(
            report.events().as_slice(),
            [EventPayload::OptimizationCompleted { tree: TreeId(1), .. }]
        ));
        assert!(!engine.is_active(TreeId(1)));
        assert_eq!(engine.optimization_history().count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut engine = OptimizationEngine::new(config());
        let mut arena = arena();
        let mut agg = telemetry();
        let mut tick = 1;
        for _ in 0..3 {
            engine.start_default_optimization(TreeId(1), tick, &arena, &agg).unwrap();
            engine.cancel_all();
            let (t, _) = drive(&mut engine, &mut arena, &mut agg, tick);
            tick = t + 1;
        }
        let history: Vec<_> = engine.optimization_history().collect();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.cancelled));
    }

    #[test]
    fn experiment_finishes_with_event() {
        let mut engine = OptimizationEngine::new(config());
        let mut arena = arena();
        let mut agg = telemetry();
        let group = |value| {
            vec![ParameterWrite {
                handle: handle(0),
                name: "range".into(),
                value,
            }]
        };
        engine.start_experiment(TreeId(1), group(3.0), group(6.0), 0, &mut arena).unwrap();
        let (tick, report) = drive(&mut engine, &mut arena, &mut agg, 1);
        assert_eq!(tick, 80);
        assert_eq!(report.experiments.len(), 1);
        // No node ticks were recorded, so both groups score identically.
        assert_eq!(report.experiments[0].winner(), None::<ExperimentGroup>);
        assert!(matches!(
            report.events().as_slice(),
            [EventPayload::ExperimentCompleted { winner: None, .. }]
        ));
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
        assert_eq!(engine.experiment_history().count(), 1);
    }

    #[test]
    fn seeded_runs_get_distinct_seeds() {
        let mut engine = OptimizationEngine::new(config());
        assert_eq!(engine.next_seed(), 7);
        assert_eq!(engine.next_seed(), 8);
    }
}
