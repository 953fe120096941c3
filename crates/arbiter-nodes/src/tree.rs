//! Behavior tree container and builder.
//!
//! # Example
//!
//! ```rust
//! use arbiter_nodes::action::{ActionSpec, TargetEnemy};
//! use arbiter_nodes::clock::LogicalClock;
//! use arbiter_nodes::condition::{ConditionOptions, EnemyWithinRange};
//! use arbiter_nodes::movement::{ChaseEnemy, MovementSpec};
//! use arbiter_nodes::params::ParameterArena;
//! use arbiter_nodes::tree::TreeBuilder;
//! use arbiter_types::{Observation, TreeId};
//!
//! let mut arena = ParameterArena::new();
//! let mut b = TreeBuilder::new(TreeId(1), "duelist", &mut arena);
//! let near = b.condition("enemy_near", EnemyWithinRange, ConditionOptions::default()).unwrap();
//! let attack = b.action("attack", ActionSpec::attack(), TargetEnemy).unwrap();
//! let engage = b.sequence("engage", vec![near, attack]);
//! let chase = b.movement("chase", MovementSpec::default(), ChaseEnemy).unwrap();
//! let root = b.selector("root", vec![engage, chase]);
//! let mut tree = b.build(root);
//!
//! // No actuator attached yet: every dispatching leaf fails safely.
//! let report = tree.tick(&Observation::default(), &LogicalClock::default(), &arena);
//! assert_eq!(report.trace.records.len(), 4);
//! ```

use std::time::Instant;

use arbiter_types::{ArbiterError, NodeHandle, NodeId, Observation, TreeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::{ActionNode, ActionSpec, ActionStrategy};
use crate::actuator::SharedActuator;
use crate::clock::LogicalClock;
use crate::composite::{Inverter, LeafNode, Selector, Sequence};
use crate::condition::{ConditionNode, ConditionOptions, Predicate};
use crate::metadata::NodeMetadata;
use crate::movement::{MovementNode, MovementSpec, TargetSelector};
use crate::node::{EvalContext, Node, NodeFault, NodeKind, NodeStatus, TickTrace};
use crate::params::ParameterArena;

/// Result of one full tree evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeTickReport {
    pub tree: TreeId,
    pub tick: u64,
    pub status: NodeStatus,
    pub elapsed_ms: f64,
    pub trace: TickTrace,
}

/// Metadata of one node, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub handle: NodeHandle,
    pub name: String,
    pub kind: NodeKind,
    pub metadata: NodeMetadata,
}

pub struct BehaviorTree {
    id: TreeId,
    name: String,
    root: Box<dyn Node>,
}

impl BehaviorTree {
    pub fn new(id: TreeId, name: impl Into<String>, root: Box<dyn Node>) -> Self {
        Self {
            id,
            name: name.into(),
            root,
        }
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the whole tree once at the clock's current tick.
    pub fn tick(
        &mut self,
        observation: &Observation,
        clock: &LogicalClock,
        params: &ParameterArena,
    ) -> TreeTickReport {
        let started = Instant::now();
        let mut trace = TickTrace::default();
        let status = {
            let mut ctx = EvalContext {
                observation,
                now: clock.now(),
                tick_rate_hz: clock.tick_rate_hz(),
                params,
                trace: &mut trace,
            };
            self.root.evaluate(&mut ctx)
        };
        TreeTickReport {
            tree: self.id,
            tick: clock.now().0,
            status,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            trace,
        }
    }

    /// Attach `actuator` to every node that dispatches.
    pub fn initialize(&mut self, actuator: SharedActuator) {
        self.visit_mut(&mut |node| node.initialize(actuator.clone()));
        debug!(tree = %self.id, name = %self.name, "tree initialized");
    }

    /// Episode boundary: every node back to `Running` with an empty cache.
    pub fn reset(&mut self) {
        self.visit_mut(&mut |node| node.reset());
    }

    pub fn reset_metadata(&mut self) {
        self.visit_mut(&mut |node| node.reset_metadata());
    }

    /// Interrupt every executing, interruptible action.  Returns how many
    /// were stopped.
    pub fn interrupt_actions(&mut self) -> usize {
        let mut stopped = 0;
        self.visit_mut(&mut |node| {
            if let Some(action) = node.as_actionable()
                && action.interrupt()
            {
                stopped += 1;
            }
        });
        stopped
    }

    /// Pre-order walk.
    pub fn visit(&self, f: &mut dyn FnMut(&dyn Node)) {
        visit_node(self.root.as_ref(), f);
    }

    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut dyn Node)) {
        visit_node_mut(self.root.as_mut(), f);
    }

    pub fn metadata_snapshot(&self) -> Vec<NodeSummary> {
        let mut out = Vec::new();
        self.visit(&mut |node| {
            out.push(NodeSummary {
                handle: node.handle(),
                name: node.name().to_string(),
                kind: node.kind(),
                metadata: node.metadata().clone(),
            })
        });
        out
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.visit(&mut |_| count += 1);
        count
    }

    pub fn root_status(&self) -> NodeStatus {
        self.root.status()
    }
}

fn visit_node(node: &dyn Node, f: &mut dyn FnMut(&dyn Node)) {
    f(node);
    for child in node.children() {
        visit_node(child.as_ref(), f);
    }
}

fn visit_node_mut(node: &mut dyn Node, f: &mut dyn FnMut(&mut dyn Node)) {
    f(&mut *node);
    for child in node.children_mut() {
        visit_node_mut(child.as_mut(), f);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TreeBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Allocates node ids and registers parameter specs while a tree is
/// assembled bottom-up.
pub struct TreeBuilder<'a> {
    tree: TreeId,
    name: String,
    arena: &'a mut ParameterArena,
    next_id: u32,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(tree: TreeId, name: impl Into<String>, arena: &'a mut ParameterArena) -> Self {
        Self {
            tree,
            name: name.into(),
            arena,
            next_id: 0,
        }
    }

    fn next_handle(&mut self) -> NodeHandle {
        let handle = NodeHandle::new(self.tree, NodeId(self.next_id));
        self.next_id += 1;
        handle
    }

    pub fn action(
        &mut self,
        name: &str,
        spec: ActionSpec,
        strategy: impl ActionStrategy + 'static,
    ) -> Result<Box<dyn Node>, ArbiterError> {
        let handle = self.next_handle();
        self.arena.register(handle, spec.param_specs())?;
        Ok(Box::new(ActionNode::new(handle, name, spec, strategy)))
    }

    pub fn condition(
        &mut self,
        name: &str,
        predicate: impl Predicate + 'static,
        options: ConditionOptions,
    ) -> Result<Box<dyn Node>, ArbiterError> {
        let handle = self.next_handle();
        self.arena
            .register(handle, ConditionNode::param_specs(&predicate, &options))?;
        Ok(Box::new(ConditionNode::new(handle, name, predicate, options)))
    }

    pub fn movement(
        &mut self,
        name: &str,
        spec: MovementSpec,
        selector: impl TargetSelector + 'static,
    ) -> Result<Box<dyn Node>, ArbiterError> {
        let handle = self.next_handle();
        self.arena.register(handle, spec.param_specs())?;
        Ok(Box::new(MovementNode::new(handle, name, spec, selector)))
    }

    pub fn leaf(
        &mut self,
        name: &str,
        action: impl FnMut(&Observation) -> Result<NodeStatus, NodeFault> + Send + 'static,
    ) -> Box<dyn Node> {
        let handle = self.next_handle();
        Box::new(LeafNode::new(handle, name, action))
    }

    pub fn sequence(&mut self, name: &str, children: Vec<Box<dyn Node>>) -> Box<dyn Node> {
        let handle = self.next_handle();
        Box::new(Sequence::new(handle, name, children))
    }

    pub fn selector(&mut self, name: &str, children: Vec<Box<dyn Node>>) -> Box<dyn Node> {
        let handle = self.next_handle();
        Box::new(Selector::new(handle, name, children))
    }

    pub fn inverter(&mut self, name: &str, child: Box<dyn Node>) -> Box<dyn Node> {
        let handle = self.next_handle();
        Box::new(Inverter::new(handle, name, child))
    }

    pub fn build(self, root: Box<dyn Node>) -> BehaviorTree {
        debug!(tree = %self.tree, name = %self.name, nodes = self.next_id, "tree built");
        BehaviorTree::new(self.tree, self.name, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::TargetEnemy;
    use crate::actuator::{ActionCommand, Actuator, ActuatorResponse, shared};
    use crate::condition::EnemyWithinRange;
    use crate::movement::ChaseEnemy;
    use arbiter_types::Vec2;

    struct AcceptAll;

    impl Actuator for AcceptAll {
        fn id(&self) -> &str {
            "accept"
        }

        fn dispatch(&mut self, _command: &ActionCommand) -> ActuatorResponse {
            ActuatorResponse::accepted(None)
        }
    }

    fn duelist(arena: &mut ParameterArena) -> BehaviorTree {
        let mut b = TreeBuilder::new(TreeId(1), "duelist", arena);
        let near = b
            .condition("enemy_near", EnemyWithinRange, ConditionOptions::default())
            .unwrap();
        let attack = b.action("attack", ActionSpec::attack(), TargetEnemy).unwrap();
        let engage = b.sequence("engage", vec![near, attack]);
        let chase = b
            .movement("chase", MovementSpec::default(), ChaseEnemy)
            .unwrap();
        let root = b.selector("root", vec![engage, chase]);
        b.build(root)
    }

    #[test]
    fn builder_registers_parameters_per_leaf() {
        let mut arena = ParameterArena::new();
        let tree = duelist(&mut arena);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(arena.handles_for_tree(TreeId(1)).len(), 3);
        assert_eq!(
            arena.value(NodeHandle::new(TreeId(1), NodeId(1)), "range"),
            Some(2.0)
        );
    }

    #[test]
    fn far_enemy_selects_chase_branch() {
        let mut arena = ParameterArena::new();
        let mut tree = duelist(&mut arena);
        tree.initialize(shared(AcceptAll));
        let clock = LogicalClock::default();

        let report = tree.tick(&Observation::default(), &clock, &arena);

        assert_eq!(report.status, NodeStatus::Running);
        assert_eq!(report.trace.branches.len(), 1);
        assert_eq!(report.trace.branches[0].child_index, 1);
    }

    #[test]
    fn near_enemy_selects_engage_branch() {
        let mut arena = ParameterArena::new();
        let mut tree = duelist(&mut arena);
        tree.initialize(shared(AcceptAll));
        let mut obs = Observation::default();
        obs.enemy.position = Vec2::new(1.5, 0.0);

        let report = tree.tick(&obs, &LogicalClock::default(), &arena);

        assert_eq!(report.status, NodeStatus::Running);
        assert_eq!(report.trace.branches[0].child_index, 0);
        assert_eq!(tree.interrupt_actions(), 1);
    }

    /// Counts `Perform` commands only; chase steering is ignored.
    struct CountPerforms(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl Actuator for CountPerforms {
        fn id(&self) -> &str {
            "count-performs"
        }

        fn dispatch(&mut self, command: &ActionCommand) -> ActuatorResponse {
            if matches!(command, ActionCommand::Perform { .. }) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            ActuatorResponse::accepted(None)
        }
    }

    #[test]
    fn preempted_attack_is_re_gated_on_re_entry() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut arena = ParameterArena::new();
        let mut tree = duelist(&mut arena);
        let performs = Arc::new(AtomicUsize::new(0));
        tree.initialize(shared(CountPerforms(Arc::clone(&performs))));
        let mut clock = LogicalClock::default();
        let mut near = Observation::default();
        near.enemy.position = Vec2::new(1.5, 0.0);
        let mut far = Observation::default();
        far.enemy.position = Vec2::new(15.0, 0.0);

        clock.advance();
        assert_eq!(tree.tick(&near, &clock, &arena).status, NodeStatus::Running);
        assert_eq!(performs.load(Ordering::SeqCst), 1);

        // The guard fails while the attack is still executing.
        for _ in 0..30 {
            clock.advance();
            tree.tick(&far, &clock, &arena);
        }
        let mut abandoned = 0;
        tree.visit_mut(&mut |node| {
            if let Some(action) = node.as_actionable() {
                assert!(!action.is_executing());
                abandoned += action.action_stats().abandoned;
            }
        });
        assert_eq!(abandoned, 1);

        clock.advance();
        let report = tree.tick(&near, &clock, &arena);
        assert_eq!(report.status, NodeStatus::Running);
        assert_eq!(performs.load(Ordering::SeqCst), 2);
        assert!(
            tree.metadata_snapshot()
                .iter()
                .all(|s| s.metadata.is_consistent())
        );
    }

    #[test]
    fn reset_and_metadata_reset_walk_every_node() {
        let mut arena = ParameterArena::new();
        let mut tree = duelist(&mut arena);
        tree.initialize(shared(AcceptAll));
        let mut clock = LogicalClock::default();
        for _ in 0..10 {
            clock.advance();
            tree.tick(&Observation::default(), &clock, &arena);
        }
        assert!(
            tree.metadata_snapshot()
                .iter()
                .all(|s| s.metadata.is_consistent())
        );

        tree.reset();
        tree.visit(&mut |node| assert_eq!(node.status(), NodeStatus::Running));

        tree.reset_metadata();
        assert!(
            tree.metadata_snapshot()
                .iter()
                .all(|s| s.metadata.execution_count == 0)
        );
    }
}
