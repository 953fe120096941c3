//! Movement nodes: goal prediction, path shaping, stuck detection and
//! lateral avoidance.
//!
//! Each evaluation of a [`MovementNode`]:
//!
//! 1. asks its [`TargetSelector`] for a target position and velocity,
//! 2. predicts the goal `prediction_time` seconds ahead and clamps it into
//!    the arena,
//! 3. returns `Success` once within `arrival_radius` of the goal,
//! 4. returns `Failure` when the agent has moved less than `stuck_distance`
//!    over `stuck_time` seconds,
//! 5. otherwise shapes a waypoint with its [`PathStrategy`], sidesteps the
//!    enemy when it blocks the segment, dispatches `MoveTo` and returns
//!    `Running`.

use arbiter_types::{NodeHandle, Observation, Vec2};
use serde::{Deserialize, Serialize};

use crate::actuator::{self, ActionCommand, SharedActuator};
use crate::cache::{CacheKey, DEFAULT_CACHE_WINDOW};
use crate::clock::Tick;
use crate::node::{
    EvalContext, Movable, Node, NodeCore, NodeFault, NodeKind, NodeStatus, delegate_core,
};
use crate::params::ParamSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathStrategy {
    /// Straight line to the goal.
    #[default]
    Direct,
    /// Midpoint pushed sideways by `curve_factor`, producing an arc.
    Smoothed,
    /// Aim beside the goal, offset by `avoidance_radius`.
    Tactical,
}

/// Where the node is heading this tick.
pub trait TargetSelector: Send {
    /// `(position, velocity)` of the target.
    fn target(&self, obs: &Observation) -> (Vec2, Vec2);

    /// Whether the target is the enemy itself (disables enemy avoidance).
    fn targets_enemy(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChaseEnemy;

impl TargetSelector for ChaseEnemy {
    fn target(&self, obs: &Observation) -> (Vec2, Vec2) {
        (obs.enemy.position, obs.enemy.velocity)
    }

    fn targets_enemy(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HoldArenaCenter;

impl TargetSelector for HoldArenaCenter {
    fn target(&self, obs: &Observation) -> (Vec2, Vec2) {
        (obs.arena_center, Vec2::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSpec {
    pub strategy: PathStrategy,
    pub cache_window: u64,
}

impl Default for MovementSpec {
    fn default() -> Self {
        Self {
            strategy: PathStrategy::Direct,
            cache_window: DEFAULT_CACHE_WINDOW,
        }
    }
}

impl MovementSpec {
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("speed", 0.5, 10.0, 4.0),
            ParamSpec::new("arrival_radius", 0.1, 5.0, 1.0),
            ParamSpec::new("prediction_time", 0.0, 2.0, 0.5),
            ParamSpec::new("stuck_distance", 0.01, 1.0, 0.05),
            ParamSpec::new("stuck_time", 0.1, 5.0, 1.0),
            ParamSpec::new("avoidance_radius", 0.0, 5.0, 1.5),
            ParamSpec::new("curve_factor", 0.0, 1.0, 0.3),
        ]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Geometry helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Target position extrapolated by `seconds`, clamped into the arena.
pub fn predict_goal(position: Vec2, velocity: Vec2, seconds: f32, center: Vec2, radius: f32) -> Vec2 {
    let predicted = position + velocity * seconds;
    let offset = predicted - center;
    if offset.length() > radius {
        center + offset.normalized() * radius
    } else {
        predicted
    }
}

/// Distance from `point` to the segment `a..b`.
fn segment_distance(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq <= f32::EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}

/// Shape the next waypoint from `from` toward `goal`.
pub fn plan_waypoint(
    strategy: PathStrategy,
    from: Vec2,
    goal: Vec2,
    curve_factor: f32,
    avoidance_radius: f32,
) -> Vec2 {
    let to_goal = goal - from;
    let side = to_goal.normalized().perpendicular();
    match strategy {
        PathStrategy::Direct => goal,
        PathStrategy::Smoothed => from.lerp(goal, 0.5) + side * (to_goal.length() * curve_factor * 0.5),
        PathStrategy::Tactical => goal + side * avoidance_radius,
    }
}

/// If `obstacle` lies within `radius` of the segment `from..waypoint`,
/// replace the waypoint with whichever perpendicular sidestep around the
/// obstacle is closer to `goal`.
pub fn resolve_avoidance(from: Vec2, waypoint: Vec2, goal: Vec2, obstacle: Vec2, radius: f32) -> Vec2 {
    if radius <= 0.0 || segment_distance(obstacle, from, waypoint) >= radius {
        return waypoint;
    }
    let side = (waypoint - from).normalized().perpendicular() * (radius * 2.0);
    let left = obstacle + side;
    let right = obstacle - side;
    if left.distance(goal) <= right.distance(goal) {
        left
    } else {
        right
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stuck detection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct ProgressTracker {
    anchor: Vec2,
    since: Tick,
}

impl ProgressTracker {
    /// `true` once the agent stayed within `min_distance` of the anchor for
    /// `window` ticks.  Movement past the distance re-anchors.
    fn update(&mut self, position: Vec2, now: Tick, min_distance: f32, window: u64) -> bool {
        if position.distance(self.anchor) > min_distance {
            self.anchor = position;
            self.since = now;
            return false;
        }
        now.since(self.since) >= window
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MovementNode
// ─────────────────────────────────────────────────────────────────────────────

struct MovementState {
    handle: NodeHandle,
    strategy: PathStrategy,
    selector: Box<dyn TargetSelector>,
    actuator: Option<SharedActuator>,
    progress: Option<ProgressTracker>,
    last_goal: Option<Vec2>,
    last_waypoint: Option<Vec2>,
    stuck: bool,
}

impl MovementState {
    fn param(&self, ctx: &EvalContext<'_>, name: &str) -> Result<f32, NodeFault> {
        ctx.param(self.handle, name).map(|v| v as f32)
    }

    fn step(&mut self, ctx: &mut EvalContext<'_>) -> Result<NodeStatus, NodeFault> {
        let obs = ctx.observation;
        let (target, velocity) = self.selector.target(obs);
        let goal = predict_goal(
            target,
            velocity,
            self.param(ctx, "prediction_time")?,
            obs.arena_center,
            obs.arena_radius,
        );
        self.last_goal = Some(goal);

        let here = obs.agent.position;
        if here.distance(goal) <= self.param(ctx, "arrival_radius")? {
            self.progress = None;
            self.stuck = false;
            return Ok(NodeStatus::Success);
        }

        let stuck_window = ctx.seconds_to_ticks(ctx.param(self.handle, "stuck_time")?);
        let min_distance = self.param(ctx, "stuck_distance")?;
        let tracker = self.progress.get_or_insert(ProgressTracker {
            anchor: here,
            since: ctx.now,
        });
        if tracker.update(here, ctx.now, min_distance, stuck_window) {
            self.stuck = true;
            self.progress = None;
            return Ok(NodeStatus::Failure);
        }
        self.stuck = false;

        let avoidance_radius = self.param(ctx, "avoidance_radius")?;
        let mut waypoint = plan_waypoint(
            self.strategy,
            here,
            goal,
            self.param(ctx, "curve_factor")?,
            avoidance_radius,
        );
        if !self.selector.targets_enemy() {
            waypoint = resolve_avoidance(here, waypoint, goal, obs.enemy.position, avoidance_radius);
        }
        self.last_waypoint = Some(waypoint);

        let actuator = self.actuator.as_ref().ok_or(NodeFault::NoActuator)?;
        let command = ActionCommand::MoveTo {
            destination: waypoint,
            speed: self.param(ctx, "speed")?,
        };
        if actuator::dispatch(actuator, &command)?.success {
            Ok(NodeStatus::Running)
        } else {
            Ok(NodeStatus::Failure)
        }
    }
}

pub struct MovementNode {
    core: NodeCore,
    state: MovementState,
}

impl MovementNode {
    pub fn new(
        handle: NodeHandle,
        name: impl Into<String>,
        spec: MovementSpec,
        selector: impl TargetSelector + 'static,
    ) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Movement, spec.cache_window),
            state: MovementState {
                handle,
                strategy: spec.strategy,
                selector: Box::new(selector),
                actuator: None,
                progress: None,
                last_goal: None,
                last_waypoint: None,
                stuck: false,
            },
        }
    }

    pub fn last_waypoint(&self) -> Option<Vec2> {
        self.state.last_waypoint
    }
}

impl Node for MovementNode {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let key = Some(CacheKey::snapshot(ctx.observation));
        let state = &mut self.state;
        self.core.run(ctx, key, |ctx| state.step(ctx))
    }

    fn initialize(&mut self, actuator: SharedActuator) {
        self.state.actuator = Some(actuator);
    }

    fn reset(&mut self) {
        self.state.progress = None;
        self.state.stuck = false;
        self.core.reset();
    }

    // Time spent off the active branch must not count towards stuck.
    fn halt(&mut self) {
        self.state.progress = None;
    }

    fn as_movable(&self) -> Option<&dyn Movable> {
        Some(self)
    }
}

impl Movable for MovementNode {
    fn path_strategy(&self) -> PathStrategy {
        self.state.strategy
    }

    fn last_goal(&self) -> Option<Vec2> {
        self.state.last_goal
    }

    fn is_stuck(&self) -> bool {
        self.state.stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{Actuator, ActuatorResponse, shared};
    use crate::node::test_support::{eval_at, handle};
    use crate::params::ParameterArena;

    struct AcceptAll;

    impl Actuator for AcceptAll {
        fn id(&self) -> &str {
            "accept"
        }

        fn dispatch(&mut self, _command: &ActionCommand) -> ActuatorResponse {
            ActuatorResponse::accepted(None)
        }
    }

    fn build(spec: MovementSpec, selector: impl TargetSelector + 'static) -> (MovementNode, ParameterArena) {
        let mut arena = ParameterArena::new();
        arena.register(handle(0), spec.param_specs()).unwrap();
        let mut node = MovementNode::new(handle(0), "move", spec, selector);
        node.initialize(shared(AcceptAll));
        (node, arena)
    }

    fn uncached(strategy: PathStrategy) -> MovementSpec {
        MovementSpec {
            strategy,
            cache_window: 0,
        }
    }

    #[test]
    fn prediction_is_clamped_to_arena() {
        let goal = predict_goal(Vec2::new(9.0, 0.0), Vec2::new(10.0, 0.0), 1.0, Vec2::ZERO, 10.0);
        assert!((goal.x - 10.0).abs() < 1e-5);
        assert!(goal.y.abs() < 1e-5);
    }

    #[test]
    fn arrival_is_success() {
        let (mut node, arena) = build(uncached(PathStrategy::Direct), ChaseEnemy);
        let mut obs = Observation::default();
        obs.enemy.position = Vec2::new(0.5, 0.0);
        assert_eq!(eval_at(&mut node, &obs, &arena, 1).0, NodeStatus::Success);
    }

    #[test]
    fn far_target_is_running() {
        let (mut node, arena) = build(uncached(PathStrategy::Direct), ChaseEnemy);
        let obs = Observation::default();
        assert_eq!(eval_at(&mut node, &obs, &arena, 1).0, NodeStatus::Running);
        assert_eq!(node.last_goal(), Some(Vec2::new(5.0, 0.0)));
    }

    #[test]
    fn no_progress_is_stuck_failure() {
        let (mut node, arena) = build(uncached(PathStrategy::Direct), ChaseEnemy);
        let obs = Observation::default();
        // stuck_time 1 s = 60 ticks without moving.
        assert_eq!(eval_at(&mut node, &obs, &arena, 0).0, NodeStatus::Running);
        assert_eq!(eval_at(&mut node, &obs, &arena, 30).0, NodeStatus::Running);
        assert_eq!(eval_at(&mut node, &obs, &arena, 60).0, NodeStatus::Failure);
        assert!(node.is_stuck());
    }

    #[test]
    fn progress_re_anchors_stuck_timer() {
        let (mut node, arena) = build(uncached(PathStrategy::Direct), ChaseEnemy);
        let mut obs = Observation::default();
        obs.enemy.position = Vec2::new(15.0, 0.0);
        eval_at(&mut node, &obs, &arena, 0);
        obs.agent.position = Vec2::new(1.0, 0.0);
        eval_at(&mut node, &obs, &arena, 50);
        assert_eq!(eval_at(&mut node, &obs, &arena, 60).0, NodeStatus::Running);
    }

    #[test]
    fn avoidance_picks_side_closer_to_goal() {
        let from = Vec2::ZERO;
        let goal = Vec2::new(10.0, 1.0);
        let obstacle = Vec2::new(5.0, 0.0);
        let waypoint = resolve_avoidance(from, goal, goal, obstacle, 1.5);
        assert!(waypoint.y > 0.0, "upper sidestep is closer to the goal");
        assert!(waypoint.distance(obstacle) >= 1.5);
    }

    #[test]
    fn clear_path_is_unchanged() {
        let waypoint = resolve_avoidance(Vec2::ZERO, Vec2::new(10.0, 0.0), Vec2::new(10.0, 0.0), Vec2::new(5.0, 5.0), 1.5);
        assert_eq!(waypoint, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn holding_center_steers_around_enemy() {
        let (mut node, arena) = build(uncached(PathStrategy::Direct), HoldArenaCenter);
        let mut obs = Observation::default();
        obs.agent.position = Vec2::new(10.0, 0.0);
        obs.enemy.position = Vec2::new(5.0, 0.0);
        eval_at(&mut node, &obs, &arena, 1);
        let waypoint = node.last_waypoint().unwrap();
        assert!(waypoint.distance(obs.enemy.position) >= 1.5);
    }

    #[test]
    fn strategies_shape_waypoint() {
        let from = Vec2::ZERO;
        let goal = Vec2::new(10.0, 0.0);
        assert_eq!(plan_waypoint(PathStrategy::Direct, from, goal, 0.3, 1.5), goal);
        let curved = plan_waypoint(PathStrategy::Smoothed, from, goal, 0.3, 1.5);
        assert!((curved.x - 5.0).abs() < 1e-5 && (curved.y - 1.5).abs() < 1e-5);
        let flank = plan_waypoint(PathStrategy::Tactical, from, goal, 0.3, 1.5);
        assert!((flank.y - 1.5).abs() < 1e-5);
    }

    #[test]
    fn missing_actuator_fails() {
        let spec = uncached(PathStrategy::Direct);
        let mut arena = ParameterArena::new();
        arena.register(handle(0), spec.param_specs()).unwrap();
        let mut node = MovementNode::new(handle(0), "move", spec, ChaseEnemy);
        let (status, trace) = eval_at(&mut node, &Observation::default(), &arena, 1);
        assert_eq!(status, NodeStatus::Failure);
        assert!(trace.records[0].faulted);
    }
}
