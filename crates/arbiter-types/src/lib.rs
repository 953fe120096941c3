//! `arbiter-types` – shared data model for the Arbiter decision engine.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here:
//!
//! | Type | Role |
//! |---|---|
//! | [`Observation`] | Immutable per-tick world snapshot consumed by nodes. |
//! | [`ActionKind`] | Discrete combat actions and their chain rules. |
//! | [`TreeId`] / [`NodeId`] / [`NodeHandle`] | Addresses for trees, nodes and parameter records. |
//! | [`Alert`] | Deduplicated, leveled performance alert. |
//! | [`Event`] / [`EventPayload`] | Output events for dashboards and loggers. |
//! | [`ArbiterError`] | Workspace-wide error type. |

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// A 2-D vector in arena coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction, or [`Vec2::ZERO`] for a
    /// zero-length input.
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len <= f32::EPSILON {
            Vec2::ZERO
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    /// Counter-clockwise perpendicular.
    pub fn perpendicular(self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }

    pub fn lerp(self, other: Vec2, t: f32) -> Vec2 {
        self + (other - self) * t
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actions and agent state
// ─────────────────────────────────────────────────────────────────────────────

/// The discrete actions an agent can request through its actuator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum ActionKind {
    Attack,
    Dodge,
    Defend,
    Move,
    Special,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Attack,
        ActionKind::Dodge,
        ActionKind::Defend,
        ActionKind::Move,
        ActionKind::Special,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Attack => "attack",
            ActionKind::Dodge => "dodge",
            ActionKind::Defend => "defend",
            ActionKind::Move => "move",
            ActionKind::Special => "special",
        }
    }

    /// Whether `next` may start while `self` is still in progress.
    ///
    /// | From | Allowed follow-ups |
    /// |---|---|
    /// | Attack | Dodge, Defend |
    /// | Defend | Attack, Dodge |
    /// | Dodge | Attack, Move |
    /// | Move | anything except Move |
    /// | Special | Dodge |
    pub fn can_chain_to(self, next: ActionKind) -> bool {
        use ActionKind::*;
        match self {
            Attack => matches!(next, Dodge | Defend),
            Defend => matches!(next, Attack | Dodge),
            Dodge => matches!(next, Attack | Move),
            Move => next != Move,
            Special => next == Dodge,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse animation/locomotion state reported for the controlled agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
pub enum AgentState {
    #[default]
    Idle,
    Moving,
    Attacking,
    Dodging,
    Defending,
    Stunned,
}

/// Per-action cooldown readiness. Movement has no cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Cooldowns {
    pub attack: bool,
    pub dodge: bool,
    pub defend: bool,
    pub special: bool,
}

impl Cooldowns {
    pub fn is_ready(&self, kind: ActionKind) -> bool {
        match kind {
            ActionKind::Attack => self.attack,
            ActionKind::Dodge => self.dodge,
            ActionKind::Defend => self.defend,
            ActionKind::Special => self.special,
            ActionKind::Move => true,
        }
    }

    pub fn set(&mut self, kind: ActionKind, ready: bool) {
        match kind {
            ActionKind::Attack => self.attack = ready,
            ActionKind::Dodge => self.dodge = ready,
            ActionKind::Defend => self.defend = ready,
            ActionKind::Special => self.special = ready,
            ActionKind::Move => {}
        }
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            attack: true,
            dodge: true,
            defend: true,
            special: true,
        }
    }
}

/// Kinematic and health state of one combatant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentSnapshot {
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
    pub max_health: f32,
}

impl AgentSnapshot {
    /// Health as a fraction of maximum, in `[0, 1]`.
    pub fn health_fraction(&self) -> f32 {
        if self.max_health <= 0.0 {
            0.0
        } else {
            (self.health / self.max_health).clamp(0.0, 1.0)
        }
    }
}

impl Default for AgentSnapshot {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            health: 100.0,
            max_health: 100.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable per-tick world snapshot.
///
/// Produced externally once per tick and handed to the tree by shared
/// reference; nodes never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Observation {
    /// Simulation tick that produced this snapshot.
    pub tick: u64,
    /// The agent the tree controls.
    pub agent: AgentSnapshot,
    /// The opponent.
    pub enemy: AgentSnapshot,
    pub cooldowns: Cooldowns,
    pub state: AgentState,
    /// Action the agent is currently performing, if any.
    pub current_action: Option<ActionKind>,
    pub arena_center: Vec2,
    pub arena_radius: f32,
}

impl Observation {
    pub fn enemy_distance(&self) -> f32 {
        self.agent.position.distance(self.enemy.position)
    }

    /// Unit vector from the agent towards the enemy.
    pub fn enemy_direction(&self) -> Vec2 {
        (self.enemy.position - self.agent.position).normalized()
    }

    /// Distance from the agent to the arena boundary (negative when outside).
    pub fn distance_to_edge(&self) -> f32 {
        self.arena_radius - self.agent.position.distance(self.arena_center)
    }
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            tick: 0,
            agent: AgentSnapshot::default(),
            enemy: AgentSnapshot {
                position: Vec2::new(5.0, 0.0),
                ..AgentSnapshot::default()
            },
            cooldowns: Cooldowns::default(),
            state: AgentState::Idle,
            current_action: None,
            arena_center: Vec2::ZERO,
            arena_radius: 20.0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of a registered behavior tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct TreeId(pub u32);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree#{}", self.0)
    }
}

/// Identifier of a node, unique within its tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Address of a node's parameter record: `(tree, node)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct NodeHandle {
    pub tree: TreeId,
    pub node: NodeId,
}

impl NodeHandle {
    pub const fn new(tree: TreeId, node: NodeId) -> Self {
        Self { tree, node }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tree, self.node)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alerts
// ─────────────────────────────────────────────────────────────────────────────

/// What an [`Alert`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AlertKind {
    LowFps,
    HighExecutionTime,
    HighMemory,
    HighFailureRate,
    FpsDecline,
    /// Sustained memory growth across the trend window.
    MemoryLeak,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::LowFps => "low_fps",
            AlertKind::HighExecutionTime => "high_execution_time",
            AlertKind::HighMemory => "high_memory",
            AlertKind::HighFailureRate => "high_failure_rate",
            AlertKind::FpsDecline => "fps_decline",
            AlertKind::MemoryLeak => "memory_leak",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    /// Map an observed/threshold ratio (≥ 1 when the threshold is breached)
    /// to a severity level.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 2.0 {
            AlertSeverity::High
        } else if ratio >= 1.5 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }
}

/// A performance alert.
///
/// At most one unresolved alert exists per `(kind, source)` pair; the
/// monitor enforces the deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    /// Tree name or `"system"` for frame-level alerts.
    pub source: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub observed: f64,
    pub threshold: f64,
    pub raised_tick: u64,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_tick: Option<u64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        source: impl Into<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
        observed: f64,
        threshold: f64,
        tick: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            severity,
            message: message.into(),
            observed,
            threshold,
            raised_tick: tick,
            raised_at: Utc::now(),
            resolved: false,
            resolved_tick: None,
            resolved_at: None,
        }
    }

    /// Mark the alert resolved at `tick`. Resolving twice keeps the first
    /// resolution time.
    pub fn resolve(&mut self, tick: u64) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        self.resolved_tick = Some(tick);
        self.resolved_at = Some(Utc::now());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output events
// ─────────────────────────────────────────────────────────────────────────────

/// Output event wrapper published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"arbiter-monitor"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data published for external dashboards and loggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    AnalysisCompleted {
        tree: TreeId,
        sample_count: usize,
        regression_count: usize,
        recommendation_count: usize,
    },
    RegressionDetected {
        tree: TreeId,
        metric: String,
        degradation: f64,
        t_statistic: f64,
    },
    RecommendationReady {
        tree: TreeId,
        title: String,
        priority: f64,
    },
    VisualizationDataUpdated {
        tree: TreeId,
        points: usize,
    },
    PerformanceAlert(Alert),
    OptimizationCompleted {
        tree: TreeId,
        run_id: Uuid,
        best_score: f64,
        iterations: usize,
        converged: bool,
    },
    ExperimentCompleted {
        tree: TreeId,
        experiment_id: Uuid,
        winner: Option<String>,
        significant: bool,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArbiterError {
    #[error("Node fault in {node}: {details}")]
    NodeFault { node: String, details: String },

    #[error("No actuator attached to node {0}")]
    ActuatorUnavailable(String),

    #[error("Unknown tree: {0}")]
    UnknownTree(TreeId),

    #[error("Unknown parameter '{name}' on {handle}")]
    UnknownParameter { handle: NodeHandle, name: String },

    #[error("Invalid bounds for parameter '{name}': [{min}, {max}]")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
