use rand_distr::{Distribution, StandardNormal};

use crate::model::{ModelWithPrior, ProbabilisticModel};
use crate::variable::{VariableReference, VariableValues};

/// A sparse map of proposed values plus the log of the proposal's
/// backward/forward transition-probability ratio,
/// `log q(from|to) - log q(to|from)`.
///
/// A proposal is applied to the model and then either fully committed or
/// fully rolled back; no partial update survives a rejection.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub values: VariableValues,
    pub log_transition_ratio: f64,
}

/// Draws candidate moves for the Metropolis-Hastings sampler.
pub trait ProposalDistribution<M: ProbabilisticModel> {
    /// Propose new values for `variables`, given the current position.
    fn propose<R: rand::Rng + ?Sized>(
        &mut self,
        model: &mut M,
        variables: &[VariableReference],
        current: &VariableValues,
        rng: &mut R,
    ) -> Proposal;
}

/// Resamples each selected variable from its prior. The default proposal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorProposal;

impl<M: ModelWithPrior> ProposalDistribution<M> for PriorProposal {
    fn propose<R: rand::Rng + ?Sized>(
        &mut self,
        model: &mut M,
        variables: &[VariableReference],
        current: &VariableValues,
        rng: &mut R,
    ) -> Proposal {
        let mut values = VariableValues::new();
        let mut log_transition_ratio = 0.;
        for variable in variables {
            let proposed = model.sample_prior(variable, rng);
            let previous = current
                .get(variable)
                .expect("proposal for a variable with no current value");
            log_transition_ratio += model.prior_log_prob(variable, previous)
                - model.prior_log_prob(variable, &proposed);
            values.insert(*variable, proposed);
        }
        Proposal {
            values,
            log_transition_ratio,
        }
    }
}

/// Symmetric Gaussian random walk around the current values.
#[derive(Debug, Clone, Copy)]
pub struct GaussianProposal {
    pub sigma: f64,
}

impl GaussianProposal {
    pub fn new(sigma: f64) -> Self {
        GaussianProposal { sigma }
    }
}

impl<M: ProbabilisticModel> ProposalDistribution<M> for GaussianProposal {
    fn propose<R: rand::Rng + ?Sized>(
        &mut self,
        _model: &mut M,
        variables: &[VariableReference],
        current: &VariableValues,
        rng: &mut R,
    ) -> Proposal {
        let mut values = VariableValues::new();
        for variable in variables {
            let previous = current
                .get(variable)
                .expect("proposal for a variable with no current value");
            let proposed = previous.mapv(|x| {
                let z: f64 = StandardNormal.sample(rng);
                x + self.sigma * z
            });
            values.insert(*variable, proposed);
        }
        // the walk is symmetric, the transition ratio cancels
        Proposal {
            values,
            log_transition_ratio: 0.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GaussianSumModel;
    use rand::SeedableRng;

    #[test]
    fn prior_proposal_reports_transition_ratio() {
        let mut model = GaussianSumModel::new(0., 0., 0.);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(2);
        let current = model.latent_values();
        let mut proposal_dist = PriorProposal;
        let proposal = proposal_dist.propose(
            &mut model,
            &[GaussianSumModel::A],
            &current,
            &mut rng,
        );
        assert_eq!(proposal.values.len(), 1);
        // current value sits at the prior mode, any move lowers the
        // proposal density of the new point
        assert!(proposal.log_transition_ratio >= 0.);
    }

    #[test]
    fn gaussian_proposal_is_symmetric() {
        let mut model = GaussianSumModel::new(1., 2., 3.);
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(7);
        let current = model.latent_values();
        let mut proposal_dist = GaussianProposal::new(0.5);
        let proposal = proposal_dist.propose(
            &mut model,
            &[GaussianSumModel::A, GaussianSumModel::B],
            &current,
            &mut rng,
        );
        assert_eq!(proposal.values.len(), 2);
        assert_eq!(proposal.log_transition_ratio, 0.);
    }
}
