//! Posterior sampling and MAP/MLE optimization for probabilistic models.
//!
//! The engine talks to a model only through the [`ProbabilisticModel`]
//! boundary (log-probability, gradients, cascade) and never inspects how
//! those numbers are computed. On top of that boundary it provides:
//!
//! - [`MetropolisHastings`]: random walk over pluggable proposal
//!   distributions, with an optional downstream-dependency rejection cache.
//! - [`Hamiltonian`]: fixed-trajectory-length HMC.
//! - [`Nuts`]: the No-U-Turn sampler with dual-averaging step-size
//!   adaptation and an adaptive diagonal mass matrix.
//! - [`NetworkSamplesGenerator`]: burn-in and down-sampling over any
//!   step-wise sampling algorithm, bounded or streaming.
//! - [`GradientOptimizer`] / [`NonGradientOptimizer`]: MAP and MLE point
//!   estimates through a generic external multivariate optimizer.
//!
//! Everything is single-threaded and deterministic given a seeded RNG.

pub(crate) mod convergence;
pub(crate) mod fitness;
pub(crate) mod generator;
pub(crate) mod hmc;
pub(crate) mod leapfrog;
pub(crate) mod math;
pub(crate) mod metropolis;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod optimizer;
pub(crate) mod potential;
pub(crate) mod proposal;
pub(crate) mod samples;
pub(crate) mod state;
pub(crate) mod stepsize;
pub(crate) mod tree;
pub(crate) mod variable;
pub(crate) mod variance;

pub mod testing;

pub use convergence::{ConvergenceChecker, Norm};
pub use fitness::FitnessKind;
pub use generator::{GeneratorSettings, NetworkSamplesGenerator, SampleStream, SamplingAlgorithm};
pub use hmc::{Hamiltonian, HamiltonianSettings};
pub use leapfrog::Direction;
pub use metropolis::{MetropolisHastings, MetropolisHastingsSettings, StepResult};
pub use model::{
    BuildError, LogpError, ModelWithPrior, ProbabilisticModel, ProbabilisticModelWithGradient,
    Result, SamplerError,
};
pub use nuts::{Nuts, NutsSettings};
pub use optimizer::{
    GradientOptimizer, GradientOptimizerSettings, NonGradientOptimizer,
    NonGradientOptimizerSettings, OptimizedResult, OptimizerError,
};
pub use potential::{AdaptiveDiagPotential, AdaptivePotentialSettings, Potential};
pub use proposal::{GaussianProposal, PriorProposal, Proposal, ProposalDistribution};
pub use samples::{metric, NetworkSample, NetworkSamples, Statistics};
pub use state::LeapfrogState;
pub use stepsize::{heuristic_initial_step, DualAverageStepSize, StepSizeSettings};
pub use variable::{Tensor, VariableReference, VariableValues};
pub use variance::VarianceCalculator;
