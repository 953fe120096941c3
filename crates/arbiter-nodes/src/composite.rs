//! Composite and decorator nodes.
//!
//! | Node type | Description |
//! |---|---|
//! | [`Sequence`] | Ticks children left-to-right; fails on first child failure. |
//! | [`Selector`] | Ticks children left-to-right; succeeds on first child success. |
//! | [`Inverter`] | Swaps `Success` and `Failure` of its child. |
//! | [`LeafNode`] | Executes an arbitrary closure and returns its status. |
//!
//! Composites are reactive: every tick restarts from the first child, so a
//! higher-priority branch can pre-empt a running one.  Children left behind
//! by a short circuit are halted, so a pre-empted action never resumes a
//! stale execution.  Composites are never cached.

use arbiter_types::{NodeHandle, Observation};

use crate::node::{
    EvalContext, Node, NodeCore, NodeFault, NodeKind, NodeStatus, delegate_core, halt_from,
};

// ─────────────────────────────────────────────────────────────────────────────
// Sequence
// ─────────────────────────────────────────────────────────────────────────────

pub struct Sequence {
    core: NodeCore,
    children: Vec<Box<dyn Node>>,
}

impl Sequence {
    pub fn new(handle: NodeHandle, name: impl Into<String>, children: Vec<Box<dyn Node>>) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Sequence, 0),
            children,
        }
    }
}

impl Node for Sequence {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let children = &mut self.children;
        self.core.run(ctx, None, |ctx| {
            for index in 0..children.len() {
                match children[index].evaluate(ctx) {
                    NodeStatus::Success => continue,
                    other => {
                        halt_from(children, index + 1);
                        return Ok(other);
                    }
                }
            }
            Ok(NodeStatus::Success)
        })
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn halt(&mut self) {
        halt_from(&mut self.children, 0);
    }

    fn children(&self) -> &[Box<dyn Node>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Node>] {
        &mut self.children
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Selector
// ─────────────────────────────────────────────────────────────────────────────

/// Priority selector.  The chosen child (first non-failing) is recorded as a
/// [`BranchSelection`][crate::node::BranchSelection] for branch telemetry.
pub struct Selector {
    core: NodeCore,
    children: Vec<Box<dyn Node>>,
    last_choice: Option<usize>,
}

impl Selector {
    pub fn new(handle: NodeHandle, name: impl Into<String>, children: Vec<Box<dyn Node>>) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Selector, 0),
            children,
            last_choice: None,
        }
    }

    /// Index of the child picked on the last evaluation.
    pub fn last_choice(&self) -> Option<usize> {
        self.last_choice
    }
}

impl Node for Selector {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let selector = self.core.handle();
        let children = &mut self.children;
        let last_choice = &mut self.last_choice;
        self.core.run(ctx, None, |ctx| {
            *last_choice = None;
            for index in 0..children.len() {
                let status = children[index].evaluate(ctx);
                if status != NodeStatus::Failure {
                    halt_from(children, index + 1);
                    *last_choice = Some(index);
                    ctx.trace.branches.push(crate::node::BranchSelection {
                        selector,
                        child_index: index,
                        child: children[index].id(),
                    });
                    return Ok(status);
                }
            }
            Ok(NodeStatus::Failure)
        })
    }

    fn reset(&mut self) {
        self.last_choice = None;
        self.core.reset();
    }

    fn halt(&mut self) {
        halt_from(&mut self.children, 0);
    }

    fn children(&self) -> &[Box<dyn Node>] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Node>] {
        &mut self.children
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inverter
// ─────────────────────────────────────────────────────────────────────────────

pub struct Inverter {
    core: NodeCore,
    child: Box<dyn Node>,
}

impl Inverter {
    pub fn new(handle: NodeHandle, name: impl Into<String>, child: Box<dyn Node>) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Inverter, 0),
            child,
        }
    }
}

impl Node for Inverter {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let child = &mut self.child;
        self.core.run(ctx, None, |ctx| {
            Ok(match child.evaluate(ctx) {
                NodeStatus::Success => NodeStatus::Failure,
                NodeStatus::Failure => NodeStatus::Success,
                NodeStatus::Running => NodeStatus::Running,
            })
        })
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn halt(&mut self) {
        self.child.halt();
    }

    fn children(&self) -> &[Box<dyn Node>] {
        std::slice::from_ref(&self.child)
    }

    fn children_mut(&mut self) -> &mut [Box<dyn Node>] {
        std::slice::from_mut(&mut self.child)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LeafNode
// ─────────────────────────────────────────────────────────────────────────────

type LeafFn = Box<dyn FnMut(&Observation) -> Result<NodeStatus, NodeFault> + Send>;

/// Closure-backed leaf for glue logic and tests.
pub struct LeafNode {
    core: NodeCore,
    action: LeafFn,
}

impl LeafNode {
    pub fn new(
        handle: NodeHandle,
        name: impl Into<String>,
        action: impl FnMut(&Observation) -> Result<NodeStatus, NodeFault> + Send + 'static,
    ) -> Self {
        Self {
            core: NodeCore::new(handle, name, NodeKind::Leaf, 0),
            action: Box::new(action),
        }
    }
}

impl Node for LeafNode {
    delegate_core!();

    fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
        let action = &mut self.action;
        self.core.run(ctx, None, |ctx| action(ctx.observation))
    }

    fn reset(&mut self) {
        self.core.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::{eval_at, handle};
    use crate::params::ParameterArena;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn leaf(id: u32, status: NodeStatus) -> Box<dyn Node> {
        Box::new(LeafNode::new(handle(id), format!("leaf{id}"), move |_| Ok(status)))
    }

    fn run(node: &mut dyn Node) -> (NodeStatus, crate::node::TickTrace) {
        eval_at(node, &Observation::default(), &ParameterArena::new(), 1)
    }

    #[test]
    fn sequence_succeeds_when_all_children_succeed() {
        let mut seq = Sequence::new(
            handle(9),
            "seq",
            vec![leaf(0, NodeStatus::Success), leaf(1, NodeStatus::Success)],
        );
        assert_eq!(run(&mut seq).0, NodeStatus::Success);
    }

    #[test]
    fn sequence_fails_on_first_failure() {
        let mut seq = Sequence::new(
            handle(9),
            "seq",
            vec![
                leaf(0, NodeStatus::Success),
                leaf(1, NodeStatus::Failure),
                leaf(2, NodeStatus::Success),
            ],
        );
        let (status, trace) = run(&mut seq);
        assert_eq!(status, NodeStatus::Failure);
        // leaf2 never ran; the sequence itself is recorded last.
        assert_eq!(trace.records.len(), 3);
        assert_eq!(trace.records[2].kind, NodeKind::Sequence);
    }

    #[test]
    fn sequence_propagates_running() {
        let mut seq = Sequence::new(
            handle(9),
            "seq",
            vec![leaf(0, NodeStatus::Success), leaf(1, NodeStatus::Running)],
        );
        assert_eq!(run(&mut seq).0, NodeStatus::Running);
    }

    #[test]
    fn sequence_empty_succeeds() {
        let mut seq = Sequence::new(handle(9), "seq", vec![]);
        assert_eq!(run(&mut seq).0, NodeStatus::Success);
    }

    #[test]
    fn selector_records_chosen_branch() {
        let mut sel = Selector::new(
            handle(9),
            "sel",
            vec![
                leaf(0, NodeStatus::Failure),
                leaf(1, NodeStatus::Running),
                leaf(2, NodeStatus::Success),
            ],
        );
        let (status, trace) = run(&mut sel);
        assert_eq!(status, NodeStatus::Running);
        assert_eq!(sel.last_choice(), Some(1));
        assert_eq!(trace.branches.len(), 1);
        assert_eq!(trace.branches[0].child_index, 1);
        assert_eq!(trace.branches[0].child, handle(1).node);
    }

    #[test]
    fn selector_fails_when_all_children_fail() {
        let mut sel = Selector::new(
            handle(9),
            "sel",
            vec![leaf(0, NodeStatus::Failure), leaf(1, NodeStatus::Failure)],
        );
        let (status, trace) = run(&mut sel);
        assert_eq!(status, NodeStatus::Failure);
        assert!(trace.branches.is_empty());
    }

    /// Leaf that records how often its parent halted it.
    struct Haltable {
        core: NodeCore,
        status: NodeStatus,
        halts: Arc<AtomicUsize>,
    }

    impl Node for Haltable {
        delegate_core!();

        fn evaluate(&mut self, ctx: &mut EvalContext<'_>) -> NodeStatus {
            let status = self.status;
            self.core.run(ctx, None, |_| Ok(status))
        }

        fn reset(&mut self) {
            self.core.reset();
        }

        fn halt(&mut self) {
            self.halts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn haltable(id: u32, status: NodeStatus) -> (Box<dyn Node>, Arc<AtomicUsize>) {
        let halts = Arc::new(AtomicUsize::new(0));
        let node = Haltable {
            core: NodeCore::new(handle(id), format!("h{id}"), NodeKind::Leaf, 0),
            status,
            halts: Arc::clone(&halts),
        };
        (Box::new(node), halts)
    }

    #[test]
    fn short_circuit_halts_skipped_children_only() {
        let (first, first_halts) = haltable(0, NodeStatus::Failure);
        let (second, second_halts) = haltable(1, NodeStatus::Running);
        let mut seq = Sequence::new(handle(9), "seq", vec![first, second]);
        run(&mut seq);
        assert_eq!(first_halts.load(Ordering::SeqCst), 0);
        assert_eq!(second_halts.load(Ordering::SeqCst), 1);

        let (winner, winner_halts) = haltable(0, NodeStatus::Success);
        let (fallback, fallback_halts) = haltable(1, NodeStatus::Running);
        let mut sel = Selector::new(handle(9), "sel", vec![winner, fallback]);
        run(&mut sel);
        assert_eq!(winner_halts.load(Ordering::SeqCst), 0);
        assert_eq!(fallback_halts.load(Ordering::SeqCst), 1);

        // Halting a composite reaches every descendant.
        sel.halt();
        assert_eq!(winner_halts.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_halts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inverter_swaps_terminal_states() {
        let mut inv = Inverter::new(handle(9), "not", leaf(0, NodeStatus::Failure));
        assert_eq!(run(&mut inv).0, NodeStatus::Success);
        let mut inv = Inverter::new(handle(9), "not", leaf(0, NodeStatus::Running));
        assert_eq!(run(&mut inv).0, NodeStatus::Running);
        assert_eq!(inv.children().len(), 1);
    }

    #[test]
    fn broken_leaf_does_not_abort_traversal() {
        let broken: Box<dyn Node> = Box::new(LeafNode::new(handle(0), "broken", |_| {
            panic!("leaf bug")
        }));
        let mut sel = Selector::new(handle(9), "sel", vec![broken, leaf(1, NodeStatus::Success)]);
        let (status, trace) = run(&mut sel);
        assert_eq!(status, NodeStatus::Success);
        assert!(trace.records[0].faulted);
    }
}
