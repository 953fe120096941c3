//! [`OptimizationRun`] – one multi-tick parameter search.
//!
//! ```text
//!  ┌──────────────────┐  apply   ┌────────────────┐ window elapsed ┌──────────┐
//!  │ ProposeCandidate │ ───────► │ AwaitTelemetry │ ─────────────► │ Evaluate │
//!  └──────────────────┘          └────────────────┘                └──────────┘
//!           ▲                                                            │
//!           │ continue        ┌──────────────────┐                       │
//!           └──────────────── │ CheckConvergence │ ◄─────────────────────┘
//!                             └──────────────────┘
//!                                      │ converged / cap / cancelled
//!                                      ▼
//!                                    Done
//! ```
//!
//! [`OptimizationRun::step`] is called once per engine tick and advances
//! through as many phases as can complete on that tick; it only ever blocks
//! in `AwaitTelemetry`.  On `Done` the best candidate is committed, or the
//! baseline restored when nothing was evaluated.

use arbiter_nodes::{ParameterArena, ParameterWrite};
use arbiter_telemetry::TelemetryAggregator;
use arbiter_types::{ArbiterError, TreeId};
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::objective::Objective;
use crate::space::{ParameterSpace, TunedParameter};
use crate::strategy::{Sample, SearchStrategy, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OptimizationPhase {
    ProposeCandidate,
    AwaitTelemetry { applied_at: u64, until: u64 },
    Evaluate { applied_at: u64 },
    CheckConvergence,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub strategy: StrategyKind,
    pub objective: Objective,
    pub max_iterations: usize,
    /// Ticks a candidate stays applied before it is scored.
    pub evaluation_ticks: u64,
    pub convergence_window: usize,
    pub convergence_threshold: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationResult {
    pub id: Uuid,
    pub tree: TreeId,
    pub strategy: StrategyKind,
    pub objective: Objective,
    pub iterations: usize,
    pub best_score: f64,
    pub best_parameters: Vec<TunedParameter>,
    pub baseline_parameters: Vec<TunedParameter>,
    /// Scores in evaluation order.
    pub scores: Vec<f64>,
    pub converged: bool,
    pub cancelled: bool,
    pub started_tick: u64,
    pub finished_tick: u64,
    pub finished_at: DateTime<Utc>,
}

/// `true` when the last `window` scores have a sample variance below
/// `threshold`.
pub fn has_converged(scores: &[f64], window: usize, threshold: f64) -> bool {
    let window = window.max(2);
    if scores.len() < window {
        return false;
    }
    let recent = &scores[scores.len() - window..];
    let mean = recent.iter().sum::<f64>() / window as f64;
    let variance = recent.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
    variance < threshold
}

pub struct OptimizationRun {
    id: Uuid,
    space: ParameterSpace,
    settings: RunSettings,
    generator: Box<dyn SearchStrategy>,
    rng: ChaCha8Rng,
    phase: OptimizationPhase,
    history: Vec<Sample>,
    best: Option<Sample>,
    candidate: Vec<f64>,
    baseline: Vec<ParameterWrite>,
    cancel: CancellationToken,
    started_tick: u64,
    converged: bool,
}

impl OptimizationRun {
    /// Capture the baseline of `tree` and prepare the search.
    pub fn start(
        arena: &ParameterArena,
        tree: TreeId,
        settings: RunSettings,
        tick: u64,
    ) -> Result<Self, ArbiterError> {
        if settings.max_iterations == 0 {
            return Err(ArbiterError::Optimizer("max_iterations must be at least 1".into()));
        }
        let space = ParameterSpace::from_arena(arena, tree)?;
        let generator = settings.strategy.build(settings.max_iterations, space.len());
        let baseline = space.writes(&space.current(arena));
        let id = Uuid::new_v4();
        info!(%tree, %id, strategy = %settings.strategy, objective = %settings.objective, dims = space.len(), "optimization started");
        Ok(Self {
            id,
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            space,
            settings,
            generator,
            phase: OptimizationPhase::ProposeCandidate,
            history: Vec::new(),
            best: None,
            candidate: Vec::new(),
            baseline,
            cancel: CancellationToken::new(),
            started_tick: tick,
            converged: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tree(&self) -> TreeId {
        self.space.tree()
    }

    pub fn phase(&self) -> OptimizationPhase {
        self.phase
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn best(&self) -> Option<&Sample> {
        self.best.as_ref()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        self.phase == OptimizationPhase::Done
    }

    /// Advance the state machine.  Returns the result on the tick the run
    /// finishes, `None` otherwise (and on every call after `Done`).
    pub fn step(
        &mut self,
        tick: u64,
        arena: &mut ParameterArena,
        telemetry: &mut TelemetryAggregator,
    ) -> Result<Option<OptimizationResult>, ArbiterError> {
        loop {
            if self.phase != OptimizationPhase::Done && self.cancel.is_cancelled() {
                debug!(tree = %self.tree(), "optimization cancelled");
                return self.finish(tick, arena).map(Some);
            }
            match self.phase {
                OptimizationPhase::Done => return Ok(None),
                OptimizationPhase::ProposeCandidate => {
                    let proposal = self.generator.propose(&self.space, &self.history, &mut self.rng);
                    let proposal = self.space.constrain(&proposal);
                    self.candidate = self.space.apply(arena, &proposal)?;
                    self.phase = OptimizationPhase::AwaitTelemetry {
                        applied_at: tick,
                        until: tick + self.settings.evaluation_ticks,
                    };
                    return Ok(None);
                }
                OptimizationPhase::AwaitTelemetry { applied_at, until } => {
                    if tick < until {
                        return Ok(None);
                    }
                    self.phase = OptimizationPhase::Evaluate { applied_at };
                }
                OptimizationPhase::Evaluate { applied_at } => {
                    self.evaluate(applied_at, telemetry);
                    self.phase = OptimizationPhase::CheckConvergence;
                }
                OptimizationPhase::CheckConvergence => {
                    let scores: Vec<f64> = self.history.iter().map(|s| s.score).collect();
                    if has_converged(&scores, self.settings.convergence_window, self.settings.convergence_threshold) {
                        self.converged = true;
                        return self.finish(tick, arena).map(Some);
                    }
                    if self.history.len() >= self.settings.max_iterations {
                        return self.finish(tick, arena).map(Some);
                    }
                    self.phase = OptimizationPhase::ProposeCandidate;
                }
            }
        }
    }

    /// Score the applied candidate on the points captured after it was
    /// applied.
    fn evaluate(&mut self, applied_at: u64, telemetry: &mut TelemetryAggregator) {
        let tree = self.tree();
        let points = telemetry
            .series(tree)
            .map(|s| s.since(applied_at + 1))
            .unwrap_or_default();
        let score = self.settings.objective.evaluate(&points);

        for (dim, &value) in self.space.dims().iter().zip(&self.candidate) {
            telemetry.record_parameter_sample(dim.handle, &dim.spec.name, value, score);
        }
        let sample = Sample {
            values: self.candidate.clone(),
            score,
        };
        if self.best.as_ref().is_none_or(|b| score > b.score) {
            self.best = Some(sample.clone());
        }
        self.history.push(sample);
        debug!(
            %tree,
            iteration = self.history.len(),
            score,
            points = points.len(),
            best = self.best.as_ref().map_or(score, |b| b.score),
            "candidate evaluated"
        );
    }

    fn finish(&mut self, tick: u64, arena: &mut ParameterArena) -> Result<OptimizationResult, ArbiterError> {
        self.phase = OptimizationPhase::Done;
        let committed: Vec<ParameterWrite> = match &self.best {
            Some(best) => self.space.writes(&best.values),
            None => self.baseline.clone(),
        };
        arena.apply(&committed)?;

        let result = OptimizationResult {
            id: self.id,
            tree: self.tree(),
            strategy: self.settings.strategy,
            objective: self.settings.objective,
            iterations: self.history.len(),
            best_score: self.best.as_ref().map_or(0.0, |b| b.score),
            best_parameters: committed.iter().map(TunedParameter::from).collect(),
            baseline_parameters: self.baseline.iter().map(TunedParameter::from).collect(),
            scores: self.history.iter().map(|s| s.score).collect(),
            converged: self.converged,
            cancelled: self.cancel.is_cancelled(),
            started_tick: self.started_tick,
            finished_tick: tick,
            finished_at: Utc::now(),
        };
        info!(
            tree = %result.tree,
            id = %result.id,
            iterations = result.iterations,
            best_score = result.best_score,
            converged = result.converged,
            cancelled = result.cancelled,
            "optimization finished"
        );
        Ok(result)
    }
}
