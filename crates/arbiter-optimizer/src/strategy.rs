//! Candidate-generation strategies.
//!
//! | Strategy | Proposal |
//! |---|---|
//! | [`RandomSearch`] | Uniform sample within bounds |
//! | [`GridSearch`] | Walks a regular grid of `max(2, round(budget^(1/dims)))` points per dimension |
//! | [`HeuristicBayesian`] | Mean of the top 20 % samples plus ±10 % range noise |
//! | [`Genetic`] | Single-point crossover of two top-50 % parents, 10 % per-gene mutation |
//!
//! The "Bayesian" strategy is a mean-plus-noise heuristic; it keeps no
//! posterior model.

use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::space::{ParameterSpace, sample_dim};

/// An evaluated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sample {
    pub values: Vec<f64>,
    pub score: f64,
}

pub trait SearchStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Propose the next candidate.  `history` holds every sample evaluated
    /// so far in this run, oldest first.
    fn propose(&mut self, space: &ParameterSpace, history: &[Sample], rng: &mut ChaCha8Rng) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Grid,
    #[default]
    Bayesian,
    Genetic,
}

impl StrategyKind {
    pub fn build(self, budget: usize, dims: usize) -> Box<dyn SearchStrategy> {
        match self {
            StrategyKind::Random => Box::new(RandomSearch),
            StrategyKind::Grid => Box::new(GridSearch::new(budget, dims)),
            StrategyKind::Bayesian => Box::new(HeuristicBayesian::default()),
            StrategyKind::Genetic => Box::new(Genetic::default()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Random => "random",
            StrategyKind::Grid => "grid",
            StrategyKind::Bayesian => "bayesian",
            StrategyKind::Genetic => "genetic",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Samples sorted by descending score.
fn ranked(history: &[Sample]) -> Vec<&Sample> {
    let mut out: Vec<&Sample> = history.iter().filter(|s| s.score.is_finite()).collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Random
// ─────────────────────────────────────────────────────────────────────────────

pub struct RandomSearch;

impl SearchStrategy for RandomSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }

    fn propose(&mut self, space: &ParameterSpace, _history: &[Sample], rng: &mut ChaCha8Rng) -> Vec<f64> {
        space.sample(rng)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grid
// ─────────────────────────────────────────────────────────────────────────────

pub struct GridSearch {
    grid_size: usize,
    cursor: u64,
}

impl GridSearch {
    pub fn new(budget: usize, dims: usize) -> Self {
        Self {
            grid_size: grid_size(budget, dims),
            cursor: 0,
        }
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }
}

/// Points per dimension: `max(2, round(budget^(1/dims)))`.
pub fn grid_size(budget: usize, dims: usize) -> usize {
    if dims == 0 {
        return 2;
    }
    let per_dim = (budget.max(1) as f64).powf(1.0 / dims as f64).round() as usize;
    per_dim.max(2)
}

impl SearchStrategy for GridSearch {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Grid
    }

    /// Decode the cursor in mixed radix, first dimension fastest.  Wraps
    /// around once the grid is exhausted.
    fn propose(&mut self, space: &ParameterSpace, _history: &[Sample], _rng: &mut ChaCha8Rng) -> Vec<f64> {
        let g = self.grid_size as u64;
        let total = g.checked_pow(space.len() as u32).unwrap_or(u64::MAX);
        let mut index = self.cursor % total.max(1);
        self.cursor = self.cursor.wrapping_add(1);

        let steps = (g - 1) as f64;
        let values = space
            .dims()
            .iter()
            .map(|d| {
                let k = index % g;
                index /= g;
                d.spec.min + d.spec.range() * k as f64 / steps
            })
            .collect::<Vec<_>>();
        space.constrain(&values)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heuristic "Bayesian"
// ─────────────────────────────────────────────────────────────────────────────

pub struct HeuristicBayesian {
    /// Fraction of best samples averaged.
    pub top_fraction: f64,
    /// Noise half-width as a fraction of each dimension's range.
    pub noise: f64,
    /// Random proposals made before the heuristic kicks in.
    pub warmup: usize,
}

impl Default for HeuristicBayesian {
    fn default() -> Self {
        Self {
            top_fraction: 0.2,
            noise: 0.1,
            warmup: 3,
        }
    }
}

impl SearchStrategy for HeuristicBayesian {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bayesian
    }

    fn propose(&mut self, space: &ParameterSpace, history: &[Sample], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let ranked = ranked(history);
        if ranked.len() < self.warmup.max(1) {
            return space.sample(rng);
        }
        let top = ((ranked.len() as f64 * self.top_fraction).ceil() as usize).clamp(1, ranked.len());
        let elite = &ranked[..top];

        let values: Vec<f64> = space
            .dims()
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mean = elite.iter().map(|s| s.values[i]).sum::<f64>() / top as f64;
                let width = d.spec.range() * self.noise;
                let jitter = if width > 0.0 {
                    rng.gen_range(-width..=width)
                } else {
                    0.0
                };
                mean + jitter
            })
            .collect();
        space.constrain(&values)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Genetic
// ─────────────────────────────────────────────────────────────────────────────

pub struct Genetic {
    /// Fraction of best samples eligible as parents.
    pub elite_fraction: f64,
    pub mutation_rate: f64,
}

impl Default for Genetic {
    fn default() -> Self {
        Self {
            elite_fraction: 0.5,
            mutation_rate: 0.1,
        }
    }
}

impl SearchStrategy for Genetic {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Genetic
    }

    fn propose(&mut self, space: &ParameterSpace, history: &[Sample], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let ranked = ranked(history);
        if ranked.len() < 2 {
            return space.sample(rng);
        }
        let pool = ((ranked.len() as f64 * self.elite_fraction).ceil() as usize).clamp(2, ranked.len());
        let parents: Vec<&&Sample> = ranked[..pool].choose_multiple(rng, 2).collect();
        let (a, b) = (&parents[0].values, &parents[1].values);

        let n = space.len();
        let cut = if n > 1 { rng.gen_range(1..n) } else { 0 };
        let child: Vec<f64> = space
            .dims()
            .iter()
            .enumerate()
            .map(|(i, d)| {
                if rng.gen_bool(self.mutation_rate.clamp(0.0, 1.0)) {
                    sample_dim(&d.spec, rng)
                } else if i < cut {
                    a[i]
                } else {
                    b[i]
                }
            })
            .collect();
        space.constrain(&child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::test_support::arena;
    use arbiter_types::TreeId;
    use rand::SeedableRng;

    fn space() -> ParameterSpace {
        ParameterSpace::from_arena(&arena(), TreeId(1)).unwrap()
    }

    fn in_bounds(space: &ParameterSpace, v: &[f64]) -> bool {
        space
            .dims()
            .iter()
            .zip(v)
            .all(|(d, x)| (d.spec.min..=d.spec.max).contains(x) && (!d.spec.integer || x.fract() == 0.0))
    }

    #[test]
    fn grid_size_from_budget() {
        assert_eq!(grid_size(27, 3), 3);
        assert_eq!(grid_size(100, 2), 10);
        assert_eq!(grid_size(3, 4), 2);
        assert_eq!(grid_size(0, 1), 2);
    }

    #[test]
    fn grid_walks_corners_first() {
        let space = space();
        let mut grid = GridSearch::new(8, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(grid.grid_size(), 2);
        let first = grid.propose(&space, &[], &mut rng);
        assert_eq!(first, vec![0.5, 1.0, 0.0]);
        let second = grid.propose(&space, &[], &mut rng);
        assert_eq!(second, vec![10.0, 1.0, 0.0]);
        for _ in 0..6 {
            grid.propose(&space, &[], &mut rng);
        }
        // Wrapped around.
        assert_eq!(grid.propose(&space, &[], &mut rng), first);
    }

    #[test]
    fn bayesian_centres_on_best_samples() {
        let space = space();
        let history: Vec<Sample> = (0..10)
            .map(|i| Sample {
                values: if i == 9 { vec![8.0, 20.0, 0.8] } else { vec![1.0, 2.0, 0.1] },
                score: if i == 9 { 0.9 } else { 0.1 },
            })
            .collect();
        let mut strategy = HeuristicBayesian::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..50 {
            let v = strategy.propose(&space, &history, &mut rng);
            assert!(in_bounds(&space, &v));
            // Top 20 % of 10 is two samples: mean of best and one 0.1 sample.
            assert!((v[0] - 4.5).abs() <= 0.95 + 1e-9);
            assert!((v[2] - 0.45).abs() <= 0.1 + 1e-9);
        }
    }

    #[test]
    fn bayesian_warms_up_randomly() {
        let space = space();
        let mut strategy = HeuristicBayesian::default();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let v = strategy.propose(&space, &[], &mut rng);
        assert!(in_bounds(&space, &v));
    }

    #[test]
    fn genetic_children_mix_parent_genes() {
        let space = space();
        let history = vec![
            Sample { values: vec![1.0, 2.0, 0.1], score: 0.9 },
            Sample { values: vec![9.0, 29.0, 0.9], score: 0.8 },
            Sample { values: vec![5.0, 15.0, 0.5], score: 0.1 },
            Sample { values: vec![5.0, 15.0, 0.5], score: 0.0 },
        ];
        let mut strategy = Genetic {
            mutation_rate: 0.0,
            ..Genetic::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..30 {
            let child = strategy.propose(&space, &history, &mut rng);
            assert!(in_bounds(&space, &child));
            for (i, gene) in child.iter().enumerate() {
                assert!(*gene == history[0].values[i] || *gene == history[1].values[i]);
            }
        }
    }

    #[test]
    fn same_seed_same_proposals() {
        let space = space();
        let propose = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut s = RandomSearch;
            (0..5).map(|_| s.propose(&space, &[], &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(propose(42), propose(42));
        assert_ne!(propose(42), propose(43));
    }
}
