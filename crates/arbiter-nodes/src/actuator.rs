//! Actuator seam between decision nodes and the simulation.
//!
//! Nodes never touch the world directly.  An action or movement node turns
//! its decision into an [`ActionCommand`] and hands it to whatever
//! [`Actuator`] was attached at [`initialize`][crate::node::Node::initialize]
//! time.  The host (game loop, simulation, test harness) owns the
//! implementation and can swap it without touching tree logic.

use std::sync::{Arc, Mutex};

use arbiter_types::{ActionKind, Vec2};
use serde::{Deserialize, Serialize};

use crate::node::NodeFault;

/// A request from a node to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionCommand {
    Perform {
        kind: ActionKind,
        target: Option<Vec2>,
    },
    MoveTo {
        destination: Vec2,
        speed: f32,
    },
    Stop,
}

/// Opaque reference to whatever the host resolved as the action's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorResponse {
    pub success: bool,
    pub target: Option<TargetRef>,
}

impl ActuatorResponse {
    pub fn accepted(target: Option<TargetRef>) -> Self {
        Self {
            success: true,
            target,
        }
    }

    pub fn rejected() -> Self {
        Self {
            success: false,
            target: None,
        }
    }
}

/// Capability that turns node commands into simulated effects.
pub trait Actuator: Send {
    /// Stable identifier, e.g. `"duel-agent-0"`.
    fn id(&self) -> &str;

    /// Execute `command`.  A rejected command is a normal outcome, not an
    /// error.
    fn dispatch(&mut self, command: &ActionCommand) -> ActuatorResponse;
}

/// One actuator shared by every node of a tree.
pub type SharedActuator = Arc<Mutex<dyn Actuator>>;

/// Wrap a concrete actuator for [`BehaviorTree::initialize`][crate::tree::BehaviorTree::initialize].
pub fn shared<A: Actuator + 'static>(actuator: A) -> SharedActuator {
    Arc::new(Mutex::new(actuator))
}

/// Dispatch through a shared actuator, mapping a poisoned lock to a fault.
pub(crate) fn dispatch(
    actuator: &SharedActuator,
    command: &ActionCommand,
) -> Result<ActuatorResponse, NodeFault> {
    let mut guard = actuator.lock().map_err(|_| NodeFault::ActuatorPoisoned)?;
    Ok(guard.dispatch(command))
}
