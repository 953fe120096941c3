//! Parameter-value / metric correlation samples.

use std::collections::{BTreeMap, VecDeque};

use arbiter_types::{NodeHandle, TreeId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pearson correlation of two equally long samples.
///
/// Returns `0.0` for fewer than two pairs, mismatched lengths or a
/// zero-variance input.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        (cov / denom).clamp(-1.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterCorrelation {
    pub handle: NodeHandle,
    pub parameter: String,
    pub samples: usize,
    pub correlation: f64,
}

/// Bounded `(parameter value, metric value)` samples per parameter.
#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    capacity: usize,
    samples: BTreeMap<(NodeHandle, String), VecDeque<(f64, f64)>>,
}

impl CorrelationTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            samples: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, handle: NodeHandle, parameter: &str, value: f64, metric: f64) {
        if !value.is_finite() || !metric.is_finite() {
            return;
        }
        let buf = self
            .samples
            .entry((handle, parameter.to_string()))
            .or_default();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back((value, metric));
    }

    pub fn correlation(&self, handle: NodeHandle, parameter: &str) -> Option<ParameterCorrelation> {
        let buf = self.samples.get(&(handle, parameter.to_string()))?;
        Some(summarize(handle, parameter, buf))
    }

    /// All tracked parameters of `tree`, strongest correlation first.
    pub fn for_tree(&self, tree: TreeId) -> Vec<ParameterCorrelation> {
        let mut out: Vec<ParameterCorrelation> = self
            .samples
            .iter()
            .filter(|((handle, _), _)| handle.tree == tree)
            .map(|((handle, name), buf)| summarize(*handle, name, buf))
            .collect();
        out.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));
        out
    }

    pub fn remove_tree(&mut self, tree: TreeId) {
        self.samples.retain(|(handle, _), _| handle.tree != tree);
    }
}

fn summarize(handle: NodeHandle, parameter: &str, buf: &VecDeque<(f64, f64)>) -> ParameterCorrelation {
    let (xs, ys): (Vec<f64>, Vec<f64>) = buf.iter().copied().unzip();
    ParameterCorrelation {
        handle,
        parameter: parameter.to_string(),
        samples: buf.len(),
        correlation: pearson(&xs, &ys),
    }
}
