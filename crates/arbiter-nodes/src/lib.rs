//! `arbiter-nodes` – the node execution core.
//!
//! | Module | Role |
//! |---|---|
//! | [`node`] | `Node` contract, capability traits, `NodeCore` evaluation wrapper, tick trace. |
//! | [`action`] | Gated, timed action nodes. |
//! | [`condition`] | Predicate nodes with quick checks and adaptive thresholds. |
//! | [`movement`] | Goal prediction, path strategies, stuck detection, avoidance. |
//! | [`composite`] | `Sequence`, `Selector`, `Inverter`, closure leaves. |
//! | [`tree`] | `BehaviorTree` container and `TreeBuilder`. |
//! | [`params`] | `ParameterArena`, the only state shared with the optimizer. |
//! | [`cache`] | Similarity-keyed result cache. |
//! | [`clock`] | Monotonic logical clock. |
//! | [`actuator`] | Host seam for dispatching commands. |
//! | [`metadata`] | Per-node counters. |

pub mod action;
pub mod actuator;
pub mod cache;
pub mod clock;
pub mod composite;
pub mod condition;
pub mod metadata;
pub mod movement;
pub mod node;
pub mod params;
pub mod tree;

pub use actuator::{ActionCommand, Actuator, ActuatorResponse, SharedActuator, TargetRef};
pub use clock::{LogicalClock, Tick};
pub use metadata::NodeMetadata;
pub use node::{Node, NodeFault, NodeKind, NodeRecord, NodeStatus, TickTrace};
pub use params::{ParamSpec, ParameterArena, ParameterWrite};
pub use tree::{BehaviorTree, NodeSummary, TreeBuilder, TreeTickReport};
