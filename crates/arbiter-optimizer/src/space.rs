//! [`ParameterSpace`] – the tunable dimensions of one tree.
//!
//! A space is a flat, ordered view over every parameter the tree's nodes
//! registered in the [`ParameterArena`].  Candidate vectors produced by the
//! strategies index into it positionally.

use arbiter_nodes::{ParamSpec, ParameterArena, ParameterWrite};
use arbiter_types::{ArbiterError, NodeHandle, TreeId};
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub handle: NodeHandle,
    pub spec: ParamSpec,
}

/// One named parameter value, as reported in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TunedParameter {
    pub handle: NodeHandle,
    pub name: String,
    pub value: f64,
}

impl From<&ParameterWrite> for TunedParameter {
    fn from(w: &ParameterWrite) -> Self {
        Self {
            handle: w.handle,
            name: w.name.clone(),
            value: w.value,
        }
    }
}

impl From<&TunedParameter> for ParameterWrite {
    fn from(p: &TunedParameter) -> Self {
        Self {
            handle: p.handle,
            name: p.name.clone(),
            value: p.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpace {
    tree: TreeId,
    dims: Vec<Dimension>,
}

impl ParameterSpace {
    /// Build the space of `tree` from the arena.
    ///
    /// # Errors
    ///
    /// [`ArbiterError::Optimizer`] if the tree registered no parameters.
    pub fn from_arena(arena: &ParameterArena, tree: TreeId) -> Result<Self, ArbiterError> {
        let dims: Vec<Dimension> = arena
            .specs_for_tree(tree)
            .into_iter()
            .map(|(handle, spec)| Dimension { handle, spec })
            .collect();
        if dims.is_empty() {
            return Err(ArbiterError::Optimizer(format!("{tree} has no tunable parameters")));
        }
        Ok(Self { tree, dims })
    }

    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Current arena values in dimension order; unknown entries fall back to
    /// the spec default.
    pub fn current(&self, arena: &ParameterArena) -> Vec<f64> {
        self.dims
            .iter()
            .map(|d| arena.value(d.handle, &d.spec.name).unwrap_or(d.spec.default))
            .collect()
    }

    /// Clamp every component into its bounds; NaN becomes the default.
    pub fn constrain(&self, values: &[f64]) -> Vec<f64> {
        self.dims
            .iter()
            .zip(values)
            .map(|(d, &v)| {
                if v.is_nan() {
                    d.spec.constrain(d.spec.default)
                } else {
                    d.spec.constrain(v)
                }
            })
            .collect()
    }

    /// Uniform sample within bounds.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.dims.iter().map(|d| sample_dim(&d.spec, rng)).collect()
    }

    pub fn writes(&self, values: &[f64]) -> Vec<ParameterWrite> {
        self.dims
            .iter()
            .zip(values)
            .map(|(d, &value)| ParameterWrite {
                handle: d.handle,
                name: d.spec.name.clone(),
                value,
            })
            .collect()
    }

    pub fn tuned(&self, values: &[f64]) -> Vec<TunedParameter> {
        self.writes(values).iter().map(TunedParameter::from).collect()
    }

    /// Write `values` through the arena's validating setter and return what
    /// was stored.
    pub fn apply(&self, arena: &mut ParameterArena, values: &[f64]) -> Result<Vec<f64>, ArbiterError> {
        arena.apply(&self.writes(values))
    }
}

pub(crate) fn sample_dim<R: Rng + ?Sized>(spec: &ParamSpec, rng: &mut R) -> f64 {
    if spec.range() <= 0.0 {
        return spec.constrain(spec.min);
    }
    spec.constrain(rng.gen_range(spec.min..=spec.max))
}
