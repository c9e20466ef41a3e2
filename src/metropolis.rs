use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;

use crate::generator::SamplingAlgorithm;
use crate::model::{
    validate_start_state, BuildError, LogpError, ProbabilisticModel, Result, SamplerError,
};
use crate::proposal::ProposalDistribution;
use crate::samples::NetworkSample;
use crate::variable::{VariableReference, VariableValues};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetropolisHastingsSettings {
    /// Evaluate only the density terms downstream of the changed variables
    /// instead of the full model, using a dependency cache built once at
    /// construction. Requires a model that reports `downstream_variables`;
    /// other models silently fall back to full evaluation.
    pub use_cache_on_rejection: bool,
}

/// Outcome of one Metropolis-Hastings step.
#[derive(Debug, Clone, Copy)]
pub struct StepResult {
    pub accepted: bool,
    /// Equals the pre-step log-probability when the step was rejected.
    pub log_probability_after_step: f64,
}

/// Random-walk sampler over any proposal distribution.
///
/// Step state machine: propose, evaluate, accept or reject. On rejection
/// the model is rolled back to the pre-proposal assignment before control
/// returns to the caller.
pub struct MetropolisHastings<M, Q, R>
where
    M: ProbabilisticModel,
    Q: ProposalDistribution<M>,
    R: Rng,
{
    model: M,
    proposal_distribution: Q,
    rng: R,
    latent_variables: Vec<VariableReference>,
    position: VariableValues,
    log_prob: f64,
    downstream_cache: Option<BTreeMap<VariableReference, Vec<VariableReference>>>,
}

impl<M, Q, R> MetropolisHastings<M, Q, R>
where
    M: ProbabilisticModel,
    Q: ProposalDistribution<M>,
    R: Rng,
{
    pub fn new(
        mut model: M,
        proposal_distribution: Q,
        settings: MetropolisHastingsSettings,
        rng: R,
    ) -> std::result::Result<Self, BuildError> {
        let (position, log_prob) = validate_start_state(&mut model)?;
        let latent_variables = model.latent_variables();

        let downstream_cache = if settings.use_cache_on_rejection {
            let mut cache = BTreeMap::new();
            let mut complete = true;
            for variable in &latent_variables {
                match model.downstream_variables(variable) {
                    Some(downstream) => {
                        cache.insert(*variable, downstream);
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                Some(cache)
            } else {
                log::debug!("model reports no dependency information, rejection cache disabled");
                None
            }
        } else {
            None
        };

        Ok(MetropolisHastings {
            model,
            proposal_distribution,
            rng,
            latent_variables,
            position,
            log_prob,
            downstream_cache,
        })
    }

    pub fn position(&self) -> &VariableValues {
        &self.position
    }

    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    /// One propose/evaluate/accept-or-reject cycle.
    pub fn step_once(&mut self) -> Result<StepResult> {
        let chosen = self.latent_variables[self.rng.random_range(0..self.latent_variables.len())];
        let selected = [chosen];
        let proposal =
            self.proposal_distribution
                .propose(&mut self.model, &selected, &self.position, &mut self.rng);
        let previous = self.position.select(proposal.values.variables());

        let log_prob_after = match &self.downstream_cache {
            Some(cache) => {
                let affected: BTreeSet<VariableReference> = proposal
                    .values
                    .variables()
                    .flat_map(|v| cache[v].iter().copied())
                    .collect();
                let affected: Vec<_> = affected.into_iter().collect();
                let section_before = recoverable(self.model.log_prob_of(&affected))?;
                self.model.cascade(&proposal.values);
                let section_after = recoverable(self.model.log_prob_of(&affected))?;
                self.log_prob - section_before + section_after
            }
            None => {
                self.model.cascade(&proposal.values);
                recoverable(self.model.evaluate_log_prob())?
            }
        };

        // an impossible proposal is always rejected, never an error
        let accepted = log_prob_after != f64::NEG_INFINITY && !log_prob_after.is_nan() && {
            let threshold = (log_prob_after - self.log_prob) + proposal.log_transition_ratio;
            self.rng.random::<f64>().ln() < threshold
        };

        if accepted {
            self.position.apply(&proposal.values);
            self.log_prob = log_prob_after;
            Ok(StepResult {
                accepted: true,
                log_probability_after_step: log_prob_after,
            })
        } else {
            // roll the model back to the pre-proposal assignment
            self.model.cascade(&previous);
            Ok(StepResult {
                accepted: false,
                log_probability_after_step: self.log_prob,
            })
        }
    }
}

/// A recoverable evaluation failure behaves like zero probability.
fn recoverable<E: LogpError + Send + Sync + 'static>(
    result: std::result::Result<f64, E>,
) -> Result<f64> {
    match result {
        Ok(logp) => Ok(logp),
        Err(err) if err.is_recoverable() => Ok(f64::NEG_INFINITY),
        Err(err) => Err(SamplerError::LogpFailure(Box::new(err))),
    }
}

impl<M, Q, R> SamplingAlgorithm for MetropolisHastings<M, Q, R>
where
    M: ProbabilisticModel,
    Q: ProposalDistribution<M>,
    R: Rng,
{
    fn step(&mut self) -> Result<()> {
        self.step_once().map(|_| ())
    }

    fn sample(&self) -> NetworkSample {
        NetworkSample {
            values: self.position.clone(),
            log_prob: self.log_prob,
        }
    }
}
