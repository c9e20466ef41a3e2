use rand::Rng;
use thiserror::Error;

use crate::variable::{Tensor, VariableReference, VariableValues};

/// Errors that happen when the model evaluates log-probability or gradients.
pub trait LogpError: std::error::Error {
    /// Unrecoverable errors stop sampling, recoverable errors are seen as
    /// divergences (NUTS/HMC) or rejections (Metropolis-Hastings).
    fn is_recoverable(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Model evaluation returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, SamplerError>;

/// Construction-time failures. All of these are fatal: a sampler or
/// optimizer is never built in a state that could corrupt the model.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("model has no latent variables, nothing to sample")]
    NoLatentVariables,
    #[error("initial state is impossible, log-probability is {0}")]
    ImpossibleStartState(f64),
    #[error("failed to evaluate the initial state")]
    StartStateEvaluation(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("gradient-based method requires continuous latents, {0} is discrete")]
    DiscreteLatent(VariableReference),
    #[error("{name} must be strictly positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("latent dimensionality overflows the addressable flat vector size")]
    DimensionOverflow,
}

/// The model boundary the engine samples and optimizes through.
///
/// The engine never inspects how log-probability is computed. `cascade`
/// atomically applies an assignment and propagates it through dependent
/// deterministic computation; the `evaluate_*` methods read the density at
/// the current (cascaded) assignment. The model's assignment is treated as
/// single-writer state: rollback after a rejected step is performed by
/// cascading the previous values, never by the model itself.
pub trait ProbabilisticModel {
    type LogpErr: LogpError + Send + Sync + 'static;

    /// All latent variables, in a fixed declaration order. This order
    /// defines the flattening used by the optimizers.
    fn latent_variables(&self) -> Vec<VariableReference>;

    /// The subset of latents that take discrete values. Gradient-based
    /// methods refuse to construct over these.
    fn discrete_latent_variables(&self) -> Vec<VariableReference> {
        Vec::new()
    }

    /// Current values of all latent variables.
    fn latent_values(&self) -> VariableValues;

    fn shape(&self, variable: &VariableReference) -> Vec<usize>;

    /// Atomically apply `assignment` and propagate through any dependent
    /// deterministic computation.
    fn cascade(&mut self, assignment: &VariableValues);

    /// Log-probability of the full model at the current assignment.
    fn evaluate_log_prob(&mut self) -> std::result::Result<f64, Self::LogpErr>;

    /// Log-likelihood (observed variables only) at the current assignment.
    fn evaluate_log_likelihood(&mut self) -> std::result::Result<f64, Self::LogpErr>;

    fn log_prob(&mut self, assignment: &VariableValues) -> std::result::Result<f64, Self::LogpErr> {
        self.cascade(assignment);
        self.evaluate_log_prob()
    }

    fn log_likelihood(
        &mut self,
        assignment: &VariableValues,
    ) -> std::result::Result<f64, Self::LogpErr> {
        self.cascade(assignment);
        self.evaluate_log_likelihood()
    }

    /// Variables whose density terms can change when `of` changes, for the
    /// Metropolis-Hastings rejection cache. `None` means the model has no
    /// dependency information and full re-evaluation is required.
    fn downstream_variables(&self, _of: &VariableReference) -> Option<Vec<VariableReference>> {
        None
    }

    /// Log-probability restricted to the density terms of `variables`, at
    /// the current assignment. The default falls back to the full density,
    /// which is correct (the extra terms cancel in acceptance differences)
    /// but gains nothing from caching.
    fn log_prob_of(
        &mut self,
        _variables: &[VariableReference],
    ) -> std::result::Result<f64, Self::LogpErr> {
        self.evaluate_log_prob()
    }
}

/// A model that can also provide per-variable gradients of its joint
/// log-probability with respect to the latent variables.
pub trait ProbabilisticModelWithGradient: ProbabilisticModel {
    /// Cascade `assignment`, then return the log-probability together with
    /// the gradient map. One call per leapfrog step.
    fn log_prob_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> std::result::Result<(f64, VariableValues), Self::LogpErr>;

    /// Cascade `assignment`, then return the log-likelihood together with
    /// its gradient map. Used by maximum-likelihood fitness.
    fn log_likelihood_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> std::result::Result<(f64, VariableValues), Self::LogpErr>;

    fn gradients(
        &mut self,
        assignment: &VariableValues,
    ) -> std::result::Result<VariableValues, Self::LogpErr> {
        self.log_prob_gradient(assignment).map(|(_, grad)| grad)
    }
}

/// Prior sampling capability, required by the default Metropolis-Hastings
/// proposal distribution.
pub trait ModelWithPrior: ProbabilisticModel {
    fn sample_prior<R: Rng + ?Sized>(
        &mut self,
        variable: &VariableReference,
        rng: &mut R,
    ) -> Tensor;

    fn prior_log_prob(&mut self, variable: &VariableReference, value: &Tensor) -> f64;
}

/// Check that the model has something to sample and a possible start state.
/// Returns the starting position and its log-probability.
pub(crate) fn validate_start_state<M: ProbabilisticModel>(
    model: &mut M,
) -> std::result::Result<(VariableValues, f64), BuildError> {
    if model.latent_variables().is_empty() {
        return Err(BuildError::NoLatentVariables);
    }
    let position = model.latent_values();
    let logp = model
        .log_prob(&position)
        .map_err(|e| BuildError::StartStateEvaluation(Box::new(e)))?;
    if !logp.is_finite() {
        return Err(BuildError::ImpossibleStartState(logp));
    }
    Ok((position, logp))
}

/// Gradient-based methods fail fast over discrete latents.
pub(crate) fn validate_differentiable<M: ProbabilisticModel>(
    model: &M,
) -> std::result::Result<(), BuildError> {
    if let Some(variable) = model.discrete_latent_variables().first() {
        return Err(BuildError::DiscreteLatent(*variable));
    }
    Ok(())
}

pub(crate) fn ensure_positive(name: &'static str, value: f64) -> std::result::Result<(), BuildError> {
    if value > 0. && value.is_finite() {
        Ok(())
    } else {
        Err(BuildError::NonPositive { name, value })
    }
}

pub(crate) fn ensure_positive_count(
    name: &'static str,
    value: usize,
) -> std::result::Result<(), BuildError> {
    if value > 0 {
        Ok(())
    } else {
        Err(BuildError::NonPositive {
            name,
            value: value as f64,
        })
    }
}
