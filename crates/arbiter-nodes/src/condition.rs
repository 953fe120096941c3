//! Condition nodes: pure predicates over the observation.
//!
//! A [`ConditionNode`] wraps a [`Predicate`] strategy.  Evaluation order:
//!
//! 1. the predicate's cheap [`quick_check`][Predicate::quick_check], which
//!    may decide the result without measuring,
//! 2. the full measurement compared against the threshold,
//! 3. optional adaptive learning: the last 10 measurements are averaged and
//!    the learned threshold moves toward that average by `learning_rate`.
//!
//! Results are cached under a coarse hash of health, enemy distance and
//! agent state.

use std::collections::VecDeque;

use arbiter_types::{ActionKind, NodeHandle, Observation};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, DEFAULT_CACHE_WINDOW};
use crate::node::{
    Conditional, EvalContext, Node, NodeCore, NodeFault, NodeKind, NodeStatus, delegate_core,
};
use crate::params::ParamSpec;

/// Number of measurements averaged by the adaptive threshold.
pub const ADAPTIVE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// Holds when `value <= threshold`.
    Below,
    /// Holds when `value >= threshold`.
    Above,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Below => value <= threshold,
            Comparison::Above => value >= threshold,
        }
    }
}

/// The measurement a condition node compares against its threshold.
pub trait Predicate: Send {
    fn measure(&self, obs: &Observation) -> f64;
    fn comparison(&self) -> Comparison;

    /// Spec of the `threshold` parameter.
    fn threshold_spec(&self) -> ParamSpec;

    /// Decide without measuring, if possible.
    fn quick_check(&self, _obs: &Observation) -> Option<bool> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in predicates
// ─────────────────────────────────────────────────────────────────────────────

/// Own health fraction at or below the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthBelow;

impl Predicate for HealthBelow {
    fn measure(&self, obs: &Observation) -> f64 {
        f64::from(obs.agent.health_fraction())
    }

    fn comparison(&self) -> Comparison {
        Comparison::Below
    }

    fn threshold_spec(&self) -> ParamSpec {
        ParamSpec::new("threshold", 0.0, 1.0, 0.3)
    }

    fn quick_check(&self, obs: &Observation) -> Option<bool> {
        (obs.agent.health >= obs.agent.max_health).then_some(false)
    }
}

/// Enemy distance at or below the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnemyWithinRange;

impl Predicate for EnemyWithinRange {
    fn measure(&self, obs: &Observation) -> f64 {
        f64::from(obs.enemy_distance())
    }

    fn comparison(&self) -> Comparison {
        Comparison::Below
    }

    fn threshold_spec(&self) -> ParamSpec {
        ParamSpec::new("threshold", 0.5, 30.0, 3.0)
    }
}

/// Cooldown of one action is ready.
#[derive(Debug, Clone, Copy)]
pub struct CooldownReady(pub ActionKind);

impl Predicate for CooldownReady {
    fn measure(&self, obs: &Observation) -> f64 {
        if obs.cooldowns.is_ready(self.0) { 1.0 } else { 0.0 }
    }

    fn comparison(&self) -> Comparison {
        Comparison::Above
    }

    fn threshold_spec(&self) -> ParamSpec {
        ParamSpec::new("threshold", 0.5, 0.5, 0.5)
    }

    fn quick_check(&self, obs: &Observation) -> Option<bool> {
        Some(obs.cooldowns.is_ready(self.0))
    }
}

/// Enemy health fraction at or below the threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnemyHealthBelow;

impl Predicate for EnemyHealthBelow {
    fn measure(&self, obs: &Observation) -> f64 {
        f64::from(obs.enemy.health_fraction())
    }

    fn comparison(&self) -> Comparison {
        Comparison::Below
    }

    fn threshold_spec(&self) -> ParamSpec {
        ParamSpec::new("threshold", 0.0, 1.0, 0.5)
    }

    fn quick_check(&self, obs: &Observation) -> Option<bool> {
        (obs.enemy.health <= 0.0).then_some(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adaptive threshold
// ─────────────────────────────────────────────────────────────────────────────

/// Learned threshold that follows the running average of recent
/// measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold {
    window: VecDeque<f64>,
    learned: f64,
    /// Arena value the learned threshold was seeded from.
    base: f64,
}

impl AdaptiveThreshold {
    pub fn new(base: f64) -> Self {
        Self {
            window: VecDeque::with_capacity(ADAPTIVE_WINDOW),
            learned: base,
            base,
        }
    }

    /// Fold in `value` and return the updated threshold, clamped to `spec`.
    pub fn observe(&mut self, value: f64, learning_rate: f64, spec: &ParamSpec) -> f64 {
        if self.window.len() == ADAPTIVE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(value);
        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
        self.learned = spec.constrain(self.learned + learning_rate * (average - self.learned));
        self.learned
    }

    /// Re-seed when the arena value changed underneath (e.g. an optimizer
    /// write).
    fn sync_base(&mut self, base: f64) {
        if base != self.base {
            *self = Self::new(base);
        }
    }

    pub fn learned(&self) -> f64 {
        self.learned
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConditionNode
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionOptions {
    pub adaptive: bool,
    pub cache_window: u64,
}

impl Default for ConditionOptions {
    fn default() -> Self {
        Self {
            adaptive: false,
            cache_window: DEFAULT_CACHE_WINDOW,
        }
    }
}

struct ConditionState {
    handle: NodeHandle,
    predicate: Box<dyn Predicate>,
    spec: ParamSpec,
    adaptive: Option<AdaptiveThreshold>,
    last_threshold: Option<f64>,
    last_measurement: Option<f64>,
    quick_decisions: u64,
}

impl ConditionState {
    fn step(&mut self, ctx: &mut EvalContext<'_>) -> Result<NodeStatus, NodeFault> {
        let obs = ctx.observation;
        if let Some(decided) = self.predicate.quick_check(obs) {
            self.quick_decisions += 1;
            return Ok(status_of(decided));
        }

        let value = self.predicate.measure(obs);
        if !value.is_finite() {
            return Err(NodeFault::InvalidMeasurement(format!("{value}")));
        }
        self.last_measurement = Some(value);

        let base = ctx.param(self.handle, "threshold")?;
        let threshold = match self.adaptive.as_mut() {
            Some(adaptive) => {
                adaptive.sync_base(base);
                // Compare against the threshold learned so far, then learn.
                let current = adaptive.learned();
                let rate = ctx.param(self.handle, "learning_rate")?;
                adaptive.observe(value, rate, &self.spec);
                current
            }
            None => base,
        };
        self.last_threshold = Some(threshold);
        Ok(status_of(self.predicate.comparison().holds(value, threshold)))
    }
}

fn status_of(holds: bool) -> NodeStatus {
    if holds {
        NodeStatus::Success
    } else {
        NodeStatus::Failure
    }
}

pub struct ConditionNode {
    core: NodeCore,
    state: ConditionState,
}

impl ConditionNode {
    pub fn new(
        handle: NodeHandle,
        name: impl Into<String>,
        predicate: impl Predicate + 'static,
        options: ConditionOptions,
    ) -> Self {
        let spec = predicate.threshold_spec();
        Self {
            core: NodeCore::new(handle, name, NodeKind::Condition, options.cache_window),
            state: ConditionState {
                handle,
                adaptive: options.adaptive.then(|| AdaptiveThreshold::new(spec.default)),
                spec,
                predicate: Box::new(predicate),
                last_threshold: None,
                last_measurement: None,
                quick_decisions: 0,
            },
        }
    }

    /// Parameters to register for a condition built from `predicate`.
    pub fn param_specs(predicate: &dyn Predicate, options: &ConditionOptions) -> Vec<ParamSpec> {
        let mut specs = vec![predicate.threshold_spec()];
        if options.adaptive {
            specs.push(ParamSpec::new("learning_rate", 0.0, 1.0, 0.1));
        }
        specs
    }

    /// Evaluations answered by the quick check alone.
    pub fn quick_decisions(&self) -> u64 {
        self.state.quick_decisions
    }
}

impl Node for ConditionNode {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let key = Some(CacheKey::coarse_hash(ctx.observation));
        let state = &mut self.state;
        self.core.run(ctx, key, |ctx| state.step(ctx))
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn as_conditional(&self) -> Option<&dyn Conditional> {
        Some(self)
    }
}

impl Conditional for ConditionNode {
    fn threshold(&self) -> Option<f64> {
        self.state.last_threshold
    }

    fn last_measurement(&self) -> Option<f64> {
        self.state.last_measurement
    }
}
