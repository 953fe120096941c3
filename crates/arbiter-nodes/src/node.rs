//! Node contract, capability traits and the shared evaluation wrapper.
//!
//! Every node implements the minimal [`Node`] trait.  Specialised behaviour
//! is exposed through optional capability traits instead of a base-class
//! chain:
//!
//! | Capability | Implemented by | Exposes |
//! |---|---|---|
//! | [`Actionable`] | [`ActionNode`][crate::action::ActionNode] | executing sub-state, interruption, dispatch stats |
//! | [`Conditional`] | [`ConditionNode`][crate::condition::ConditionNode] | last measurement, learned threshold |
//! | [`Movable`] | [`MovementNode`][crate::movement::MovementNode] | path strategy, goal, stuck flag |
//!
//! All node kinds embed a [`NodeCore`] and route their evaluation through
//! [`NodeCore::run`], which owns caching, failure isolation, timing, metadata
//! and the tick trace.  Node-specific logic only ever returns
//! `Result<NodeStatus, NodeFault>`.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use arbiter_types::{NodeHandle, NodeId, Observation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::actuator::SharedActuator;
use crate::cache::{CacheKey, ResultCache};
use crate::clock::{Tick, seconds_to_ticks};
use crate::metadata::NodeMetadata;
use crate::params::ParameterArena;

// ─────────────────────────────────────────────────────────────────────────────
// Status and kind
// ─────────────────────────────────────────────────────────────────────────────

/// The execution status returned by a node after a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// The node completed its task successfully.
    Success,
    /// The node could not run or its task failed.
    Failure,
    /// The node needs more ticks.
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Action,
    Condition,
    Movement,
    Sequence,
    Selector,
    Inverter,
    Leaf,
}

impl NodeKind {
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            NodeKind::Sequence | NodeKind::Selector | NodeKind::Inverter
        )
    }
}

/// A recoverable fault inside node logic.  Always converted to
/// [`NodeStatus::Failure`] by [`NodeCore::run`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeFault {
    #[error("no actuator attached")]
    NoActuator,

    #[error("parameter '{0}' is not registered")]
    MissingParameter(String),

    #[error("invalid measurement: {0}")]
    InvalidMeasurement(String),

    #[error("actuator lock poisoned")]
    ActuatorPoisoned,

    #[error("{0}")]
    Other(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick trace
// ─────────────────────────────────────────────────────────────────────────────

/// One node evaluation as seen by telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub handle: NodeHandle,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub elapsed_ms: f64,
    pub cached: bool,
    pub faulted: bool,
}

/// A selector picked `child_index` (its first non-failing child).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSelection {
    pub selector: NodeHandle,
    pub child_index: usize,
    pub child: NodeId,
}

/// Everything that happened during one tree tick, in evaluation order
/// (children before their parents).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickTrace {
    pub records: Vec<NodeRecord>,
    pub branches: Vec<BranchSelection>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EvalContext
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only world view plus the trace sink for one evaluation pass.
pub struct EvalContext<'a> {
    pub observation: &'a Observation,
    pub now: Tick,
    pub tick_rate_hz: f32,
    pub params: &'a ParameterArena,
    pub trace: &'a mut TickTrace,
}

impl EvalContext<'_> {
    /// Current value of a registered parameter.
    pub fn param(&self, handle: NodeHandle, name: &str) -> Result<f64, NodeFault> {
        self.params
            .value(handle, name)
            .ok_or_else(|| NodeFault::MissingParameter(name.to_string()))
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        seconds_to_ticks(seconds, self.tick_rate_hz)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node trait and capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Minimal contract shared by every node.
///
/// Lifecycle hooks ([`initialize`][Node::initialize], [`reset`][Node::reset],
/// [`reset_metadata`][Node::reset_metadata]) act on this node only; the
/// owning [`BehaviorTree`][crate::tree::BehaviorTree] walks the children.
pub trait Node: Send {
    fn handle(&self) -> NodeHandle;
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;

    /// Evaluate against the current observation.  Never panics past this
    /// call and always returns exactly one status.
    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus;

    /// Attach the actuator.  Nodes that never dispatch ignore it.
    fn initialize(&mut self, _actuator: SharedActuator) {}

    /// Back to [`NodeStatus::Running`] with an empty cache.
    fn reset(&mut self);

    /// The parent finished this tick without reaching this node.  Work left
    /// in flight by an earlier `Running` result is dropped so the next visit
    /// starts from scratch.  Not an evaluation: metadata is untouched.
    fn halt(&mut self) {}

    fn reset_metadata(&mut self);
    fn metadata(&self) -> &NodeMetadata;

    /// Status of the most recent evaluation (`Running` after a reset).
    fn status(&self) -> NodeStatus;

    fn id(&self) -> NodeId {
        self.handle().node
    }

    fn children(&self) -> &[Box<dyn Node>] {
        &[]
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Node>] {
        &mut []
    }

    fn as_actionable(&mut self) -> Option<&mut dyn Actionable> {
        None
    }

    fn as_conditional(&self) -> Option<&dyn Conditional> {
        None
    }

    fn as_movable(&self) -> Option<&dyn Movable> {
        None
    }
}

/// Nodes that dispatch timed actions.
pub trait Actionable {
    fn action_kind(&self) -> arbiter_types::ActionKind;
    fn is_executing(&self) -> bool;
    /// Cooperatively stop an executing action.  Returns `false` when nothing
    /// was executing or the action is not interruptible.
    fn interrupt(&mut self) -> bool;
    fn action_stats(&self) -> &crate::action::ActionStats;
}

/// Pure predicate nodes.
pub trait Conditional {
    /// Threshold used by the last evaluation (learned, if adaptive).
    fn threshold(&self) -> Option<f64>;
    fn last_measurement(&self) -> Option<f64>;
}

/// Nodes that steer the agent.
pub trait Movable {
    fn path_strategy(&self) -> crate::movement::PathStrategy;
    fn last_goal(&self) -> Option<arbiter_types::Vec2>;
    fn is_stuck(&self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────
// NodeCore
// ─────────────────────────────────────────────────────────────────────────────

/// State and bookkeeping common to every node.
#[derive(Debug, Clone)]
pub struct NodeCore {
    handle: NodeHandle,
    name: String,
    kind: NodeKind,
    status: NodeStatus,
    metadata: NodeMetadata,
    cache: ResultCache,
}

impl NodeCore {
    pub fn new(handle: NodeHandle, name: impl Into<String>, kind: NodeKind, cache_window: u64) -> Self {
        Self {
            handle,
            name: name.into(),
            kind,
            status: NodeStatus::Running,
            metadata: NodeMetadata::default(),
            cache: ResultCache::new(cache_window),
        }
    }

    /// Run one evaluation of `body`.
    ///
    /// 1. With a `key`, a valid cache entry short-circuits `body`.
    /// 2. `Err` and panics from `body` become [`NodeStatus::Failure`].
    /// 3. Non-running results are cached under `key`.
    /// 4. Metadata is updated and a [`NodeRecord`] is pushed to the trace.
    pub fn run<F>(&mut self, ctx: &mut EvalContext<'_>, key: Option<CacheKey>, body: F) -> NodeStatus
    where
        F: FnOnce(&mut EvalContext<'_>) -> Result<NodeStatus, NodeFault>,
    {
        let started = Instant::now();
        let revision = ctx.params.revision();

        let cached = key
            .as_ref()
            .and_then(|k| self.cache.lookup(ctx.now, k, revision));

        let (status, cached, faulted) = match cached {
            Some(status) => (status, true, false),
            None => {
                let (status, faulted) = self.run_isolated(ctx, body);
                if let Some(key) = key
                    && status != NodeStatus::Running
                    && !faulted
                {
                    self.cache.store(ctx.now, key, revision, status);
                }
                (status, false, faulted)
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.status = status;
        self.metadata
            .record(status, elapsed_ms, ctx.now.0, cached, faulted);
        ctx.trace.records.push(NodeRecord {
            handle: self.handle,
            name: self.name.clone(),
            kind: self.kind,
            status,
            elapsed_ms,
            cached,
            faulted,
        });
        status
    }

    fn run_isolated<F>(&self, ctx: &mut EvalContext<'_>, body: F) -> (NodeStatus, bool)
    where
        F: FnOnce(&mut EvalContext<'_>) -> Result<NodeStatus, NodeFault>,
    {
        match catch_unwind(AssertUnwindSafe(|| body(&mut *ctx))) {
            Ok(Ok(status)) => (status, false),
            Ok(Err(fault)) => {
                warn!(
                    tree = %self.handle.tree,
                    node = %self.name,
                    %fault,
                    "node fault, reporting failure"
                );
                (NodeStatus::Failure, true)
            }
            Err(payload) => {
                error!(
                    tree = %self.handle.tree,
                    node = %self.name,
                    panic = %panic_message(payload.as_ref()),
                    "node panicked, reporting failure"
                );
                (NodeStatus::Failure, true)
            }
        }
    }

    pub fn reset(&mut self) {
        self.status = NodeStatus::Running;
        self.cache.invalidate();
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Override the last status without an evaluation (used by interrupts).
    pub fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn reset_metadata(&mut self) {
        self.metadata.reset();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Halt every child from `from` onwards (the ones a short-circuiting
/// composite skipped this tick).
pub(crate) fn halt_from(children: &mut [Box<dyn Node>], from: usize) {
    for child in children.iter_mut().skip(from) {
        child.halt();
    }
}

/// Forwards the boilerplate [`Node`] methods to a `core: NodeCore` field.
macro_rules! delegate_core {
    () => {
        fn handle(&self) -> arbiter_types::NodeHandle {
            self.core.handle()
        }

        fn name(&self) -> &str {
            self.core.name()
        }

        fn kind(&self) -> $crate::node::NodeKind {
            self.core.kind()
        }

        fn status(&self) -> $crate::node::NodeStatus {
            self.core.status()
        }

        fn metadata(&self) -> &$crate::metadata::NodeMetadata {
            self.core.metadata()
        }

        fn reset_metadata(&mut self) {
            self.core.reset_metadata();
        }
    };
}
pub(crate) use delegate_core;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use arbiter_types::TreeId;

    pub fn handle(node: u32) -> NodeHandle {
        NodeHandle::new(TreeId(1), NodeId(node))
    }

    /// Evaluate `node` once at `now` against `obs`, returning the status and
    /// the trace it produced.
    pub fn eval_at(
        node: &mut dyn Node,
        obs: &Observation,
        arena: &ParameterArena,
        now: u64,
    ) -> (NodeStatus, TickTrace) {
        let mut trace = TickTrace::default();
        let mut ctx = EvalContext {
            observation: obs,
            now: Tick(now),
            tick_rate_hz: 60.0,
            params: arena,
            trace: &mut trace,
        };
        let status = node.evaluate(&mut ctx);
        (status, trace)
    }
}
