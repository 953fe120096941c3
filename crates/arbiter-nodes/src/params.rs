//! Parameter arena – the only state shared between nodes and the optimizer.
//!
//! Every tunable node declares its parameters as [`ParamSpec`]s
//! (`name`, `min`, `max`, `integer`, `default`).  The specs are registered in
//! a [`ParameterArena`] under the node's [`NodeHandle`]; nodes read their
//! values through the arena during evaluation and the optimizer writes new
//! values through [`ParameterArena::set`], the single validating setter.
//!
//! The setter clamps to `[min, max]` and rounds integer-constrained values
//! before storing them, so an out-of-range proposal can never reach a live
//! node.  Writes happen between ticks; the arena keeps a revision counter so
//! result caches can tell that parameters changed underneath them.
//!
//! # Example
//!
//! ```rust
//! use arbiter_nodes::params::{ParamSpec, ParameterArena};
//! use arbiter_types::{NodeHandle, NodeId, TreeId};
//!
//! let handle = NodeHandle::new(TreeId(1), NodeId(0));
//! let mut arena = ParameterArena::new();
//! arena
//!     .register(handle, vec![ParamSpec::integer("burst", 1.0, 5.0, 2.0)])
//!     .unwrap();
//!
//! // Out of range and fractional: clamped to 5 and kept whole.
//! assert_eq!(arena.set(handle, "burst", 7.6).unwrap(), 5.0);
//! assert_eq!(arena.value(handle, "burst"), Some(5.0));
//! ```

use std::collections::BTreeMap;

use arbiter_types::{ArbiterError, NodeHandle, TreeId};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ParamSpec
// ─────────────────────────────────────────────────────────────────────────────

/// Declared constraints for one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// Stored values are always whole numbers when set.
    pub integer: bool,
    pub default: f64,
}

impl ParamSpec {
    /// A continuous parameter.
    pub fn new(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            integer: false,
            default,
        }
    }

    /// An integer-constrained parameter.
    pub fn integer(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            integer: true,
            ..Self::new(name, min, max, default)
        }
    }

    /// Reject specs whose bounds are not finite, inverted, or (for integer
    /// parameters) contain no whole number.
    pub fn validate(&self) -> Result<(), ArbiterError> {
        let invalid = !self.min.is_finite()
            || !self.max.is_finite()
            || self.min > self.max
            || (self.integer && self.min.ceil() > self.max.floor());
        if invalid {
            return Err(ArbiterError::InvalidBounds {
                name: self.name.clone(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Clamp `value` into bounds, rounding integer parameters.
    ///
    /// The caller must reject NaN beforehand.
    pub fn constrain(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        if self.integer {
            clamped.round().clamp(self.min.ceil(), self.max.floor())
        } else {
            clamped
        }
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ParameterSet
// ─────────────────────────────────────────────────────────────────────────────

/// A parameter with its current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub spec: ParamSpec,
    value: f64,
}

impl Parameter {
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The named parameters owned by one node, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    /// Build a set from specs, starting every value at its (constrained)
    /// default.
    pub fn new(specs: Vec<ParamSpec>) -> Result<Self, ArbiterError> {
        let mut params: Vec<Parameter> = Vec::with_capacity(specs.len());
        for spec in specs {
            spec.validate()?;
            if params.iter().any(|p| p.spec.name == spec.name) {
                return Err(ArbiterError::InvalidValue {
                    name: spec.name.clone(),
                    reason: "duplicate parameter name".to_string(),
                });
            }
            if spec.default.is_nan() {
                return Err(ArbiterError::InvalidValue {
                    name: spec.name.clone(),
                    reason: "default is NaN".to_string(),
                });
            }
            let value = spec.constrain(spec.default);
            params.push(Parameter { spec, value });
        }
        Ok(Self { params })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.find(name).map(|p| p.value)
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.find(name).map(|p| &p.spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.spec.name == name)
    }

    // Only reachable through `ParameterArena::set`.
    fn write(&mut self, name: &str, value: f64) -> Option<f64> {
        let param = self.params.iter_mut().find(|p| p.spec.name == name)?;
        param.value = param.spec.constrain(value);
        Some(param.value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ParameterArena
// ─────────────────────────────────────────────────────────────────────────────

/// One pending parameter write, or a captured parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterWrite {
    pub handle: NodeHandle,
    pub name: String,
    pub value: f64,
}

/// All parameter sets of all trees, addressed by [`NodeHandle`].
#[derive(Debug, Clone, Default)]
pub struct ParameterArena {
    sets: BTreeMap<NodeHandle, ParameterSet>,
    revision: u64,
}

impl ParameterArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the parameter specs owned by `handle`.
    ///
    /// Re-registering a handle replaces its set.
    pub fn register(
        &mut self,
        handle: NodeHandle,
        specs: Vec<ParamSpec>,
    ) -> Result<(), ArbiterError> {
        let set = ParameterSet::new(specs)?;
        self.sets.insert(handle, set);
        self.revision += 1;
        Ok(())
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&ParameterSet> {
        self.sets.get(&handle)
    }

    pub fn value(&self, handle: NodeHandle, name: &str) -> Option<f64> {
        self.sets.get(&handle)?.get(name)
    }

    /// The single validating setter.
    ///
    /// Clamps `value` to the declared bounds (rounding integer parameters)
    /// and returns the value actually stored.
    ///
    /// # Errors
    ///
    /// - [`ArbiterError::UnknownParameter`] if `handle` or `name` is unknown.
    /// - [`ArbiterError::InvalidValue`] if `value` is NaN.
    pub fn set(&mut self, handle: NodeHandle, name: &str, value: f64) -> Result<f64, ArbiterError> {
        if value.is_nan() {
            return Err(ArbiterError::InvalidValue {
                name: name.to_string(),
                reason: "NaN".to_string(),
            });
        }
        let stored = self
            .sets
            .get_mut(&handle)
            .and_then(|set| set.write(name, value))
            .ok_or_else(|| ArbiterError::UnknownParameter {
                handle,
                name: name.to_string(),
            })?;
        self.revision += 1;
        Ok(stored)
    }

    /// Apply a batch of writes through [`set`][Self::set], stopping at the
    /// first error.  Returns the stored values in order.
    pub fn apply(&mut self, writes: &[ParameterWrite]) -> Result<Vec<f64>, ArbiterError> {
        writes
            .iter()
            .map(|w| self.set(w.handle, &w.name, w.value))
            .collect()
    }

    /// Current values of every parameter belonging to `tree`.
    pub fn snapshot_tree(&self, tree: TreeId) -> Vec<ParameterWrite> {
        self.sets
            .iter()
            .filter(|(handle, _)| handle.tree == tree)
            .flat_map(|(handle, set)| {
                set.iter().map(move |p| ParameterWrite {
                    handle: *handle,
                    name: p.spec.name.clone(),
                    value: p.value(),
                })
            })
            .collect()
    }

    /// Every `(handle, spec)` pair registered for `tree`, in handle order.
    pub fn specs_for_tree(&self, tree: TreeId) -> Vec<(NodeHandle, ParamSpec)> {
        self.sets
            .iter()
            .filter(|(handle, _)| handle.tree == tree)
            .flat_map(|(handle, set)| set.iter().map(move |p| (*handle, p.spec.clone())))
            .collect()
    }

    pub fn handles_for_tree(&self, tree: TreeId) -> Vec<NodeHandle> {
        self.sets
            .keys()
            .filter(|handle| handle.tree == tree)
            .copied()
            .collect()
    }

    pub fn remove_tree(&mut self, tree: TreeId) {
        self.sets.retain(|handle, _| handle.tree != tree);
        self.revision += 1;
    }

    /// Monotonic counter bumped by every successful write or registration.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_types::NodeId;

    fn handle(node: u32) -> NodeHandle {
        NodeHandle::new(TreeId(1), NodeId(node))
    }

    fn arena_with_range() -> ParameterArena {
        let mut arena = ParameterArena::new();
        arena
            .register(
                handle(0),
                vec![
                    ParamSpec::new("range", 0.5, 10.0, 2.0),
                    ParamSpec::integer("burst", 1.0, 4.0, 2.0),
                ],
            )
            .unwrap();
        arena
    }

    #[test]
    fn defaults_are_applied() {
        let arena = arena_with_range();
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
        assert_eq!(arena.value(handle(0), "burst"), Some(2.0));
    }

    #[test]
    fn out_of_range_writes_are_clamped() {
        let mut arena = arena_with_range();
        assert_eq!(arena.set(handle(0), "range", 99.0).unwrap(), 10.0);
        assert_eq!(arena.set(handle(0), "range", -3.0).unwrap(), 0.5);
        assert_eq!(arena.set(handle(0), "range", f64::INFINITY).unwrap(), 10.0);
    }

    #[test]
    fn integer_parameters_stay_whole_and_in_bounds() {
        let mut arena = arena_with_range();
        for proposal in [-5.0, 0.2, 1.49, 2.5, 3.51, 4.4, 100.0] {
            let stored = arena.set(handle(0), "burst", proposal).unwrap();
            assert_eq!(stored.fract(), 0.0, "{proposal} stored as {stored}");
            assert!((1.0..=4.0).contains(&stored));
        }
    }

    #[test]
    fn integer_rounding_respects_fractional_bounds() {
        let spec = ParamSpec::integer("n", 0.5, 3.5, 1.0);
        assert_eq!(spec.constrain(3.5), 3.0);
        assert_eq!(spec.constrain(0.5), 1.0);
    }

    #[test]
    fn nan_write_is_rejected_and_value_kept() {
        let mut arena = arena_with_range();
        assert!(matches!(
            arena.set(handle(0), "range", f64::NAN),
            Err(ArbiterError::InvalidValue { .. })
        ));
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let mut arena = arena_with_range();
        assert!(matches!(
            arena.set(handle(0), "speed", 1.0),
            Err(ArbiterError::UnknownParameter { .. })
        ));
        assert!(matches!(
            arena.set(handle(9), "range", 1.0),
            Err(ArbiterError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let mut arena = ParameterArena::new();
        assert!(
            arena
                .register(handle(0), vec![ParamSpec::new("x", 2.0, 1.0, 1.5)])
                .is_err()
        );
        assert!(
            arena
                .register(handle(0), vec![ParamSpec::integer("n", 0.2, 0.8, 0.5)])
                .is_err()
        );
        assert!(
            arena
                .register(
                    handle(0),
                    vec![
                        ParamSpec::new("x", 0.0, 1.0, 0.5),
                        ParamSpec::new("x", 0.0, 1.0, 0.5)
                    ]
                )
                .is_err()
        );
    }

    #[test]
    fn revision_bumps_on_write() {
        let mut arena = arena_with_range();
        let before = arena.revision();
        arena.set(handle(0), "range", 3.0).unwrap();
        assert!(arena.revision() > before);
    }

    #[test]
    fn snapshot_and_apply_roundtrip() {
        let mut arena = arena_with_range();
        let snapshot = arena.snapshot_tree(TreeId(1));
        arena.set(handle(0), "range", 7.0).unwrap();
        arena.apply(&snapshot).unwrap();
        assert_eq!(arena.value(handle(0), "range"), Some(2.0));
        assert!(arena.snapshot_tree(TreeId(2)).is_empty());
    }

    #[test]
    fn remove_tree_drops_only_that_tree() {
        let mut arena = arena_with_range();
        let other = NodeHandle::new(TreeId(2), NodeId(0));
        arena
            .register(other, vec![ParamSpec::new("x", 0.0, 1.0, 0.5)])
            .unwrap();
        arena.remove_tree(TreeId(1));
        assert_eq!(arena.len(), 1);
        assert!(arena.get(other).is_some());
    }
}
