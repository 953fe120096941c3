//! Action nodes: gated, timed dispatch of combat actions.
//!
//! An [`ActionNode`] in its idle phase checks its gates in order (cooldown,
//! chain rule, range, health) and then dispatches through the attached
//! actuator.  An accepted dispatch enters the *executing* sub-state, which
//! answers `Running` until the configured duration has elapsed (`Success`)
//! or the strategy reports an interrupt condition (`Failure`).
//!
//! # Parameters
//!
//! | Name | Meaning |
//! |---|---|
//! | `range` | Maximum enemy distance for the action to start. |
//! | `min_health` | Minimum own health fraction for the action to start. |
//! | `duration` | Seconds spent in the executing sub-state. |

use arbiter_types::{ActionKind, AgentState, NodeHandle, Observation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actuator::{self, ActionCommand, SharedActuator, TargetRef};
use crate::cache::{CacheKey, DEFAULT_CACHE_WINDOW};
use crate::clock::Tick;
use crate::node::{
    Actionable, EvalContext, Node, NodeCore, NodeFault, NodeKind, NodeStatus, delegate_core,
};
use crate::params::ParamSpec;

// ─────────────────────────────────────────────────────────────────────────────
// ActionSpec
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of an action node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub kind: ActionKind,
    /// Whether [`Actionable::interrupt`] and strategy interrupts apply.
    pub interruptible: bool,
    pub range: ParamSpec,
    pub min_health: ParamSpec,
    pub duration: ParamSpec,
    pub cache_window: u64,
}

impl ActionSpec {
    fn with(kind: ActionKind, interruptible: bool, range: (f64, f64, f64), min_health: f64, duration: (f64, f64)) -> Self {
        Self {
            kind,
            interruptible,
            range: ParamSpec::new("range", range.0, range.1, range.2),
            min_health: ParamSpec::new("min_health", 0.0, 1.0, min_health),
            duration: ParamSpec::new("duration", 0.0, duration.0, duration.1),
            cache_window: DEFAULT_CACHE_WINDOW,
        }
    }

    pub fn attack() -> Self {
        Self::with(ActionKind::Attack, true, (0.5, 10.0, 2.0), 0.0, (2.0, 0.3))
    }

    pub fn dodge() -> Self {
        Self::with(ActionKind::Dodge, false, (0.0, 50.0, 6.0), 0.0, (1.0, 0.2))
    }

    pub fn defend() -> Self {
        Self::with(ActionKind::Defend, true, (0.0, 20.0, 5.0), 0.0, (3.0, 1.0))
    }

    pub fn special() -> Self {
        Self::with(ActionKind::Special, false, (0.5, 15.0, 4.0), 0.3, (3.0, 0.8))
    }

    pub fn param_specs(&self) -> Vec<ParamSpec> {
        vec![
            self.range.clone(),
            self.min_health.clone(),
            self.duration.clone(),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy
// ─────────────────────────────────────────────────────────────────────────────

/// Behaviour injected into an [`ActionNode`].
pub trait ActionStrategy: Send {
    /// Command to dispatch once every gate has passed.
    fn command(&self, kind: ActionKind, obs: &Observation) -> ActionCommand;

    /// Checked every tick while executing.
    fn should_interrupt(&self, _obs: &Observation) -> bool {
        false
    }
}

/// Aim the action at the enemy's current position; abort when stunned.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetEnemy;

impl ActionStrategy for TargetEnemy {
    fn command(&self, kind: ActionKind, obs: &Observation) -> ActionCommand {
        ActionCommand::Perform {
            kind,
            target: Some(obs.enemy.position),
        }
    }

    fn should_interrupt(&self, obs: &Observation) -> bool {
        obs.state == AgentState::Stunned
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Why an idle action did not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateRejection {
    Cooldown,
    Chain,
    Range,
    Health,
    Actuator,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    pub dispatched: u64,
    pub completed: u64,
    pub interrupted: u64,
    /// Executions dropped because the parent stopped visiting the node.
    pub abandoned: u64,
    pub cooldown_rejections: u64,
    pub chain_rejections: u64,
    pub range_rejections: u64,
    pub health_rejections: u64,
    pub actuator_rejections: u64,
}

impl ActionStats {
    fn reject(&mut self, reason: GateRejection) {
        match reason {
            GateRejection::Cooldown => self.cooldown_rejections += 1,
            GateRejection::Chain => self.chain_rejections += 1,
            GateRejection::Range => self.range_rejections += 1,
            GateRejection::Health => self.health_rejections += 1,
            GateRejection::Actuator => self.actuator_rejections += 1,
        }
    }

    pub fn total_rejections(&self) -> u64 {
        self.cooldown_rejections
            + self.chain_rejections
            + self.range_rejections
            + self.health_rejections
            + self.actuator_rejections
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionNode
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Executing {
        started: Tick,
        duration_ticks: u64,
        target: Option<TargetRef>,
    },
}

/// Everything but the core, so the evaluation closure can borrow it while
/// [`NodeCore::run`] holds the core.
struct ActionState {
    handle: NodeHandle,
    spec: ActionSpec,
    strategy: Box<dyn ActionStrategy>,
    actuator: Option<SharedActuator>,
    phase: Phase,
    stats: ActionStats,
    last_rejection: Option<GateRejection>,
}

impl ActionState {
    fn step(&mut self, ctx: &mut EvalContext<'_>) -> Result<NodeStatus, NodeFault> {
        let obs = ctx.observation;
        if let Phase::Executing {
            started,
            duration_ticks,
            ..
        } = self.phase
        {
            if self.spec.interruptible && self.strategy.should_interrupt(obs) {
                self.phase = Phase::Idle;
                self.stats.interrupted += 1;
                return Ok(NodeStatus::Failure);
            }
            if ctx.now.since(started) >= duration_ticks {
                self.phase = Phase::Idle;
                self.stats.completed += 1;
                return Ok(NodeStatus::Success);
            }
            return Ok(NodeStatus::Running);
        }

        if let Some(reason) = self.gate(ctx)? {
            self.stats.reject(reason);
            self.last_rejection = Some(reason);
            return Ok(NodeStatus::Failure);
        }

        let actuator = self.actuator.as_ref().ok_or(NodeFault::NoActuator)?;
        let command = self.strategy.command(self.spec.kind, obs);
        let response = actuator::dispatch(actuator, &command)?;
        if !response.success {
            self.stats.reject(GateRejection::Actuator);
            self.last_rejection = Some(GateRejection::Actuator);
            return Ok(NodeStatus::Failure);
        }

        self.stats.dispatched += 1;
        self.last_rejection = None;
        let duration_ticks = ctx.seconds_to_ticks(ctx.param(self.handle, "duration")?);
        debug!(action = %self.spec.kind, duration_ticks, "action dispatched");
        if duration_ticks == 0 {
            self.stats.completed += 1;
            return Ok(NodeStatus::Success);
        }
        self.phase = Phase::Executing {
            started: ctx.now,
            duration_ticks,
            target: response.target,
        };
        Ok(NodeStatus::Running)
    }

    fn gate(&self, ctx: &EvalContext<'_>) -> Result<Option<GateRejection>, NodeFault> {
        let obs = ctx.observation;
        let kind = self.spec.kind;
        if !obs.cooldowns.is_ready(kind) {
            return Ok(Some(GateRejection::Cooldown));
        }
        if let Some(current) = obs.current_action
            && !current.can_chain_to(kind)
        {
            return Ok(Some(GateRejection::Chain));
        }
        if f64::from(obs.enemy_distance()) > ctx.param(self.handle, "range")? {
            return Ok(Some(GateRejection::Range));
        }
        if f64::from(obs.agent.health_fraction()) < ctx.param(self.handle, "min_health")? {
            return Ok(Some(GateRejection::Health));
        }
        Ok(None)
    }

    /// Cooldown and chain gates only; position and health are covered by the
    /// snapshot tolerances.
    fn readiness(&self, obs: &Observation) -> bool {
        let kind = self.spec.kind;
        obs.cooldowns.is_ready(kind) && obs.current_action.is_none_or(|current| current.can_chain_to(kind))
    }
}

/// A timed, gated combat action.
pub struct ActionNode {
    core: NodeCore,
    state: ActionState,
}

impl ActionNode {
    /// The caller registers `spec.param_specs()` under `handle` in the arena
    /// ([`TreeBuilder`][crate::tree::TreeBuilder] does this).
    pub fn new(
        handle: NodeHandle,
        name: impl Into<String>,
        spec: ActionSpec,
        strategy: impl ActionStrategy + 'static,
    ) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Action, spec.cache_window),
            state: ActionState {
                handle,
                spec,
                strategy: Box::new(strategy),
                actuator: None,
                phase: Phase::Idle,
                stats: ActionStats::default(),
                last_rejection: None,
            },
        }
    }

    pub fn spec(&self) -> &ActionSpec {
        &self.state.spec
    }

    pub fn last_rejection(&self) -> Option<GateRejection> {
        self.state.last_rejection
    }

    /// Target reference returned by the actuator for the running action.
    pub fn current_target(&self) -> Option<TargetRef> {
        match self.state.phase {
            Phase::Executing { target, .. } => target,
            Phase::Idle => None,
        }
    }
}

impl Node for ActionNode {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        // Only idle gate checks are cacheable; an executing action must see
        // every tick.
        let key = (self.state.phase == Phase::Idle).then(|| {
            CacheKey::snapshot(ctx.observation).with_gate(self.state.readiness(ctx.observation))
        });
        let state = &mut self.state;
        self.core.run(ctx, key, |ctx| state.step(ctx))
    }

    fn initialize(&mut self, actuator: SharedActuator) {
        self.state.actuator = Some(actuator);
    }

    fn reset(&mut self) {
        self.state.phase = Phase::Idle;
        self.state.last_rejection = None;
        self.core.reset();
    }

    /// Drop a pre-empted execution regardless of `interruptible`: the next
    /// visit has to pass the gates and dispatch again.
    fn halt(&mut self) {
        if !self.is_executing() {
            return;
        }
        self.state.phase = Phase::Idle;
        self.state.stats.abandoned += 1;
        self.core.set_status(NodeStatus::Failure);
        self.core.invalidate_cache();
        debug!(node = %self.core.name(), "executing action abandoned");
    }

    fn as_actionable(&mut self) -> Option<&mut dyn Actionable> {
        Some(self)
    }
}

impl Actionable for ActionNode {
    fn action_kind(&self) -> ActionKind {
        self.state.spec.kind
    }

    fn is_executing(&self) -> bool {
        matches!(self.state.phase, Phase::Executing { .. })
    }

    fn interrupt(&mut self) -> bool {
        if !self.state.spec.interruptible || !self.is_executing() {
            return false;
        }
        self.state.phase = Phase::Idle;
        self.state.stats.interrupted += 1;
        self.core.set_status(NodeStatus::Failure);
        self.core.invalidate_cache();
        debug!(node = %self.core.name(), "action interrupted");
        true
    }

    fn action_stats(&self) -> &ActionStats {
        &self.state.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{Actuator, ActuatorResponse, shared};
    use crate::node::test_support::{eval_at, handle};
    use crate::params::ParameterArena;
    use std::sync::{Arc, Mutex};

    struct CountingActuator {
        accept: bool,
        count: Arc<Mutex<usize>>,
    }

    impl Actuator for CountingActuator {
        fn id(&self) -> &str {
            "counting"
        }

        fn dispatch(&mut self, _command: &ActionCommand) -> ActuatorResponse {
            *self.count.lock().unwrap() += 1;
            if self.accept {
                ActuatorResponse::accepted(Some(TargetRef(1)))
            } else {
                ActuatorResponse::rejected()
            }
        }
    }

    fn setup(spec: ActionSpec, accept: bool) -> (ActionNode, ParameterArena, Arc<Mutex<usize>>) {
        let mut arena = ParameterArena::new();
        arena.register(handle(0), spec.param_specs()).unwrap();
        let mut node = ActionNode::new(handle(0), "attack", spec, TargetEnemy);
        let count = Arc::new(Mutex::new(0));
        node.initialize(shared(CountingActuator {
            accept,
            count: Arc::clone(&count),
        }));
        (node, arena, count)
    }

    fn in_range() -> Observation {
        let mut obs = Observation::default();
        obs.enemy.position = arbiter_types::Vec2::new(1.5, 0.0);
        obs
    }

    #[test]
    fn cooldown_not_ready_fails_and_counts_execution() {
        let (mut node, arena, count) = setup(ActionSpec::attack(), true);
        let mut obs = in_range();
        obs.cooldowns.attack = false;

        let (status, _) = eval_at(&mut node, &obs, &arena, 1);

        assert_eq!(status, NodeStatus::Failure);
        assert_eq!(node.metadata().execution_count, 1);
        assert_eq!(node.metadata().success_count, 0);
        assert_eq!(node.action_stats().cooldown_rejections, 1);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn out_of_range_fails() {
        let (mut node, arena, _) = setup(ActionSpec::attack(), true);
        let (status, _) = eval_at(&mut node, &Observation::default(), &arena, 1);
        assert_eq!(status, NodeStatus::Failure);
        assert_eq!(node.last_rejection(), Some(GateRejection::Range));
    }

    #[test]
    fn low_health_fails_health_gate() {
        let (mut node, arena, _) = setup(ActionSpec::special(), true);
        let mut obs = in_range();
        obs.agent.health = 10.0;
        let (status, _) = eval_at(&mut node, &obs, &arena, 1);
        assert_eq!(status, NodeStatus::Failure);
        assert_eq!(node.last_rejection(), Some(GateRejection::Health));
    }

    #[test]
    fn invalid_chain_fails_valid_chain_dispatches() {
        let (mut node, arena, _) = setup(ActionSpec::attack(), true);
        let mut obs = in_range();
        obs.current_action = Some(ActionKind::Attack);
        let (status, _) = eval_at(&mut node, &obs, &arena, 1);
        assert_eq!(status, NodeStatus::Failure);
        assert_eq!(node.last_rejection(), Some(GateRejection::Chain));

        obs.current_action = Some(ActionKind::Defend);
        obs.agent.position.x += 1.0; // defeat the cache
        obs.enemy.position.x += 1.0;
        let (status, _) = eval_at(&mut node, &obs, &arena, 2);
        assert_eq!(status, NodeStatus::Running);
    }

    #[test]
    fn executing_resolves_to_success_after_duration() {
        let (mut node, arena, count) = setup(ActionSpec::attack(), true);
        let obs = in_range();
        // 0.3 s at 60 Hz = 18 ticks.
        assert_eq!(eval_at(&mut node, &obs, &arena, 100).0, NodeStatus::Running);
        assert!(node.is_executing());
        assert_eq!(node.current_target(), Some(TargetRef(1)));
        assert_eq!(eval_at(&mut node, &obs, &arena, 110).0, NodeStatus::Running);
        assert_eq!(eval_at(&mut node, &obs, &arena, 118).0, NodeStatus::Success);
        assert!(!node.is_executing());
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(node.action_stats().completed, 1);
    }

    #[test]
    fn stun_interrupts_executing_action() {
        let (mut node, arena, _) = setup(ActionSpec::attack(), true);
        let mut obs = in_range();
        eval_at(&mut node, &obs, &arena, 1);
        obs.state = AgentState::Stunned;
        assert_eq!(eval_at(&mut node, &obs, &arena, 2).0, NodeStatus::Failure);
        assert_eq!(node.action_stats().interrupted, 1);
    }

    #[test]
    fn explicit_interrupt_respects_interruptible_flag() {
        let (mut attack, arena, _) = setup(ActionSpec::attack(), true);
        eval_at(&mut attack, &in_range(), &arena, 1);
        assert!(attack.interrupt());
        assert_eq!(attack.status(), NodeStatus::Failure);
        assert!(!attack.interrupt());

        let (mut dodge, arena, _) = setup(ActionSpec::dodge(), true);
        eval_at(&mut dodge, &in_range(), &arena, 1);
        assert!(dodge.is_executing());
        assert!(!dodge.interrupt());
    }

    #[test]
    fn zero_duration_succeeds_immediately() {
        let (mut node, mut arena, _) = setup(ActionSpec::attack(), true);
        arena.set(handle(0), "duration", 0.0).unwrap();
        assert_eq!(eval_at(&mut node, &in_range(), &arena, 1).0, NodeStatus::Success);
    }

    #[test]
    fn missing_actuator_is_failure_not_panic() {
        let spec = ActionSpec::attack();
        let mut arena = ParameterArena::new();
        arena.register(handle(0), spec.param_specs()).unwrap();
        let mut node = ActionNode::new(handle(0), "attack", spec, TargetEnemy);
        let (status, trace) = eval_at(&mut node, &in_range(), &arena, 1);
        assert_eq!(status, NodeStatus::Failure);
        assert!(trace.records[0].faulted);
    }

    #[test]
    fn actuator_rejection_is_failure() {
        let (mut node, arena, _) = setup(ActionSpec::attack(), false);
        assert_eq!(eval_at(&mut node, &in_range(), &arena, 1).0, NodeStatus::Failure);
        assert_eq!(node.action_stats().actuator_rejections, 1);
    }

    #[test]
    fn halted_action_must_dispatch_again() {
        let (mut node, arena, count) = setup(ActionSpec::dodge(), true);
        assert_eq!(eval_at(&mut node, &in_range(), &arena, 1).0, NodeStatus::Running);
        node.halt();
        assert!(!node.is_executing());
        assert_eq!(node.action_stats().abandoned, 1);
        assert_eq!(node.metadata().execution_count, 1);

        // Long past the old duration: no completion without a new dispatch.
        assert_eq!(eval_at(&mut node, &in_range(), &arena, 200).0, NodeStatus::Running);
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(node.action_stats().completed, 0);
    }

    #[test]
    fn cached_cooldown_failure_clears_when_ready() {
        let (mut node, arena, count) = setup(ActionSpec::attack(), true);
        let mut obs = in_range();
        obs.cooldowns.attack = false;
        assert_eq!(eval_at(&mut node, &obs, &arena, 1).0, NodeStatus::Failure);

        // Same positions and health, one tick later, cooldown back.
        obs.cooldowns.attack = true;
        let (status, trace) = eval_at(&mut node, &obs, &arena, 2);
        assert_eq!(status, NodeStatus::Running);
        assert!(!trace.records[0].cached);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn reset_returns_to_idle_running() {
        let (mut node, arena, _) = setup(ActionSpec::attack(), true);
        eval_at(&mut node, &in_range(), &arena, 1);
        node.reset();
        assert_eq!(node.status(), NodeStatus::Running);
        assert!(!node.is_executing());
    }
}
