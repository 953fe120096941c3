//! `arbiter-optimizer` – closes the loop by retuning node parameters.
//!
//! A run is a tick-driven state machine (see [`run`]) that proposes a
//! candidate from the tree's [`ParameterSpace`], applies it through the
//! parameter arena, waits for telemetry to reflect it, scores it with an
//! [`Objective`] and stops at convergence, the iteration cap or
//! cancellation.  [`Experiment`] alternates two fixed parameter sets and
//! picks a winner with a two-sample t-test.
//!
//! ```
//! use arbiter_optimizer::{ExperimentGroup, ExperimentVerdict};
//!
//! let a: Vec<f64> = (0..20).map(|i| 0.9 + if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
//! let b: Vec<f64> = (0..20).map(|i| 0.6 + if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
//! let verdict = ExperimentVerdict::decide(&a, &b, 2.0);
//! assert_eq!(verdict.winner, Some(ExperimentGroup::GroupA));
//! ```

pub mod cancel;
pub mod engine;
pub mod experiment;
pub mod objective;
pub mod run;
pub mod space;
pub mod strategy;

pub use cancel::CancellationToken;
pub use engine::{OptimizationEngine, OptimizerConfig, OptimizerStepReport};
pub use experiment::{Experiment, ExperimentConfig, ExperimentGroup, ExperimentResult, ExperimentVerdict};
pub use objective::{CompositeWeights, Objective};
pub use run::{OptimizationPhase, OptimizationResult, OptimizationRun, RunSettings, has_converged};
pub use space::{Dimension, ParameterSpace, TunedParameter};
pub use strategy::{Genetic, GridSearch, HeuristicBayesian, RandomSearch, Sample, SearchStrategy, StrategyKind};
