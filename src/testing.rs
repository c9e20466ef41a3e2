//! Small reference models used by the unit and integration tests.

use ndarray::arr1;
use rand_distr::{Distribution, StandardNormal};
use thiserror::Error;

use crate::model::{
    LogpError, ModelWithPrior, ProbabilisticModel, ProbabilisticModelWithGradient,
};
use crate::variable::{Tensor, VariableReference, VariableValues};

const LN_2PI: f64 = 1.8378770664093453;

/// Error type for models that cannot fail.
#[derive(Error, Debug)]
pub enum ImpossibleError {}

impl LogpError for ImpossibleError {
    fn is_recoverable(&self) -> bool {
        match *self {}
    }
}

fn scalar(value: f64) -> Tensor {
    arr1(&[value]).into_dyn()
}

fn gaussian_log_density(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * z * z - sigma.ln() - 0.5 * LN_2PI
}

/// Independent standard-normal latents, each of shape `[2]`. No
/// observations, so the posterior equals the prior.
pub struct StandardGaussianModel {
    variables: Vec<VariableReference>,
    values: VariableValues,
}

impl StandardGaussianModel {
    pub fn new(num_variables: usize) -> Self {
        let variables: Vec<_> = (0..num_variables as u64).map(VariableReference::new).collect();
        let values = variables
            .iter()
            .map(|v| (*v, arr1(&[0.0, 0.0]).into_dyn()))
            .collect();
        StandardGaussianModel { variables, values }
    }
}

impl ProbabilisticModel for StandardGaussianModel {
    type LogpErr = ImpossibleError;

    fn latent_variables(&self) -> Vec<VariableReference> {
        self.variables.clone()
    }

    fn latent_values(&self) -> VariableValues {
        self.values.clone()
    }

    fn shape(&self, _variable: &VariableReference) -> Vec<usize> {
        vec![2]
    }

    fn cascade(&mut self, assignment: &VariableValues) {
        self.values.apply(assignment);
    }

    fn evaluate_log_prob(&mut self) -> Result<f64, Self::LogpErr> {
        let logp = self
            .values
            .iter()
            .map(|(_, t)| t.iter().map(|&x| -0.5 * x * x - 0.5 * LN_2PI).sum::<f64>())
            .sum();
        Ok(logp)
    }

    fn evaluate_log_likelihood(&mut self) -> Result<f64, Self::LogpErr> {
        Ok(0.0)
    }
}

impl ProbabilisticModelWithGradient for StandardGaussianModel {
    fn log_prob_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        let logp = self.evaluate_log_prob()?;
        let gradient = self.values.mapv(|x| -x);
        Ok((logp, gradient))
    }

    fn log_likelihood_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        // nothing is observed
        Ok((0.0, self.values.zeros_like()))
    }
}

impl ModelWithPrior for StandardGaussianModel {
    fn sample_prior<R: rand::Rng + ?Sized>(
        &mut self,
        variable: &VariableReference,
        rng: &mut R,
    ) -> Tensor {
        self.values
            .get(variable)
            .expect("unknown variable")
            .mapv(|_| StandardNormal.sample(rng))
    }

    fn prior_log_prob(&mut self, _variable: &VariableReference, value: &Tensor) -> f64 {
        value.iter().map(|&x| -0.5 * x * x - 0.5 * LN_2PI).sum()
    }
}

/// `A ~ N(mu_a, 1)`, `B ~ N(mu_b, 1)`, `C = A + B` observed through a
/// unit-variance Gaussian at `observed_sum`.
///
/// The posterior is Gaussian with mean
/// `A* = mu_a + (observed_sum - mu_a - mu_b) / 3` (and symmetrically for
/// `B`) and marginal variance `2/3`.
pub struct GaussianSumModel {
    mu_a: f64,
    mu_b: f64,
    observed_sum: f64,
    values: VariableValues,
}

impl GaussianSumModel {
    pub const A: VariableReference = VariableReference::new(0);
    pub const B: VariableReference = VariableReference::new(1);
    pub const SUM: VariableReference = VariableReference::new(2);

    pub fn new(mu_a: f64, mu_b: f64, observed_sum: f64) -> Self {
        let values = [
            (Self::A, scalar(mu_a)),
            (Self::B, scalar(mu_b)),
        ]
        .into_iter()
        .collect();
        GaussianSumModel {
            mu_a,
            mu_b,
            observed_sum,
            values,
        }
    }

    pub fn posterior_mean_a(&self) -> f64 {
        self.mu_a + (self.observed_sum - self.mu_a - self.mu_b) / 3.
    }

    pub fn posterior_mean_b(&self) -> f64 {
        self.mu_b + (self.observed_sum - self.mu_a - self.mu_b) / 3.
    }

    pub fn posterior_std(&self) -> f64 {
        (2f64 / 3.).sqrt()
    }

    fn a(&self) -> f64 {
        self.values.get(&Self::A).unwrap()[[0]]
    }

    fn b(&self) -> f64 {
        self.values.get(&Self::B).unwrap()[[0]]
    }

    fn prior_mean(&self, variable: &VariableReference) -> f64 {
        match *variable {
            v if v == Self::A => self.mu_a,
            v if v == Self::B => self.mu_b,
            v => panic!("{} has no prior", v),
        }
    }
}

impl ProbabilisticModel for GaussianSumModel {
    type LogpErr = ImpossibleError;

    fn latent_variables(&self) -> Vec<VariableReference> {
        vec![Self::A, Self::B]
    }

    fn latent_values(&self) -> VariableValues {
        self.values.clone()
    }

    fn shape(&self, _variable: &VariableReference) -> Vec<usize> {
        vec![1]
    }

    fn cascade(&mut self, assignment: &VariableValues) {
        self.values.apply(assignment);
    }

    fn evaluate_log_prob(&mut self) -> Result<f64, Self::LogpErr> {
        Ok(gaussian_log_density(self.a(), self.mu_a, 1.)
            + gaussian_log_density(self.b(), self.mu_b, 1.)
            + gaussian_log_density(self.observed_sum, self.a() + self.b(), 1.))
    }

    fn evaluate_log_likelihood(&mut self) -> Result<f64, Self::LogpErr> {
        Ok(gaussian_log_density(self.observed_sum, self.a() + self.b(), 1.))
    }

    fn downstream_variables(&self, of: &VariableReference) -> Option<Vec<VariableReference>> {
        match *of {
            v if v == Self::A => Some(vec![Self::A, Self::SUM]),
            v if v == Self::B => Some(vec![Self::B, Self::SUM]),
            _ => None,
        }
    }

    fn log_prob_of(
        &mut self,
        variables: &[VariableReference],
    ) -> Result<f64, Self::LogpErr> {
        let mut logp = 0.0;
        for variable in variables {
            logp += match *variable {
                v if v == Self::A => gaussian_log_density(self.a(), self.mu_a, 1.),
                v if v == Self::B => gaussian_log_density(self.b(), self.mu_b, 1.),
                v if v == Self::SUM => {
                    gaussian_log_density(self.observed_sum, self.a() + self.b(), 1.)
                }
                v => panic!("{} has no density term", v),
            };
        }
        Ok(logp)
    }
}

impl ProbabilisticModelWithGradient for GaussianSumModel {
    fn log_prob_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        let logp = self.evaluate_log_prob()?;
        let residual = self.observed_sum - self.a() - self.b();
        let gradient = [
            (Self::A, scalar((self.mu_a - self.a()) + residual)),
            (Self::B, scalar((self.mu_b - self.b()) + residual)),
        ]
        .into_iter()
        .collect();
        Ok((logp, gradient))
    }

    fn log_likelihood_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        let log_likelihood = self.evaluate_log_likelihood()?;
        let residual = self.observed_sum - self.a() - self.b();
        let gradient = [
            (Self::A, scalar(residual)),
            (Self::B, scalar(residual)),
        ]
        .into_iter()
        .collect();
        Ok((log_likelihood, gradient))
    }
}

/// A single discrete latent. Exists to exercise the construction-time
/// rejection of gradient-based methods over discrete variables.
pub struct CoinFlipModel {
    values: VariableValues,
}

impl CoinFlipModel {
    pub const FLIP: VariableReference = VariableReference::new(0);

    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        CoinFlipModel {
            values: [(Self::FLIP, scalar(0.0))].into_iter().collect(),
        }
    }
}

impl ProbabilisticModel for CoinFlipModel {
    type LogpErr = ImpossibleError;

    fn latent_variables(&self) -> Vec<VariableReference> {
        vec![Self::FLIP]
    }

    fn discrete_latent_variables(&self) -> Vec<VariableReference> {
        vec![Self::FLIP]
    }

    fn latent_values(&self) -> VariableValues {
        self.values.clone()
    }

    fn shape(&self, _variable: &VariableReference) -> Vec<usize> {
        vec![1]
    }

    fn cascade(&mut self, assignment: &VariableValues) {
        self.values.apply(assignment);
    }

    fn evaluate_log_prob(&mut self) -> Result<f64, Self::LogpErr> {
        Ok(0.5f64.ln())
    }

    fn evaluate_log_likelihood(&mut self) -> Result<f64, Self::LogpErr> {
        Ok(0.0)
    }
}

impl ProbabilisticModelWithGradient for CoinFlipModel {
    fn log_prob_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        Ok((0.5f64.ln(), self.values.zeros_like()))
    }

    fn log_likelihood_gradient(
        &mut self,
        assignment: &VariableValues,
    ) -> Result<(f64, VariableValues), Self::LogpErr> {
        self.cascade(assignment);
        Ok((0.0, self.values.zeros_like()))
    }
}

impl ModelWithPrior for GaussianSumModel {
    fn sample_prior<R: rand::Rng + ?Sized>(
        &mut self,
        variable: &VariableReference,
        rng: &mut R,
    ) -> Tensor {
        let mu = self.prior_mean(variable);
        let z: f64 = StandardNormal.sample(rng);
        scalar(mu + z)
    }

    fn prior_log_prob(&mut self, variable: &VariableReference, value: &Tensor) -> f64 {
        gaussian_log_density(value[[0]], self.prior_mean(variable), 1.)
    }
}
