use rand::Rng;

use crate::generator::SamplingAlgorithm;
use crate::leapfrog::{init_state, leapfrog_step, Direction};
use crate::model::{
    ensure_positive, ensure_positive_count, validate_differentiable, validate_start_state,
    BuildError, ProbabilisticModelWithGradient, Result,
};
use crate::potential::{AdaptiveDiagPotential, AdaptivePotentialSettings, Potential};
use crate::samples::NetworkSample;
use crate::stepsize::heuristic_initial_step;
use crate::variable::VariableValues;

#[derive(Debug, Clone, Copy)]
pub struct HamiltonianSettings {
    /// Leapfrog steps per proposed trajectory.
    pub leapfrog_steps: usize,
    /// Explicit step size; the `step_scale / dim^0.25` heuristic applies
    /// when unset.
    pub step_size: Option<f64>,
    pub step_scale: f64,
    pub potential: AdaptivePotentialSettings,
}

impl Default for HamiltonianSettings {
    fn default() -> Self {
        Self {
            leapfrog_steps: 20,
            step_size: None,
            step_scale: 0.25,
            potential: AdaptivePotentialSettings::default(),
        }
    }
}

/// Fixed-trajectory-length Hamiltonian Monte Carlo.
///
/// Each step draws a momentum from the potential, integrates a fixed
/// number of leapfrog steps forward and accepts or rejects the endpoint
/// with the standard Metropolis criterion on the energy difference.
pub struct Hamiltonian<M, R>
where
    M: ProbabilisticModelWithGradient,
    R: Rng,
{
    model: M,
    rng: R,
    settings: HamiltonianSettings,
    potential: AdaptiveDiagPotential,
    step_size: f64,
    position: VariableValues,
    log_prob: f64,
}

impl<M, R> Hamiltonian<M, R>
where
    M: ProbabilisticModelWithGradient,
    R: Rng,
{
    pub fn new(
        mut model: M,
        settings: HamiltonianSettings,
        rng: R,
    ) -> std::result::Result<Self, BuildError> {
        validate_differentiable(&model)?;
        ensure_positive_count("leapfrog_steps", settings.leapfrog_steps)?;
        let (position, log_prob) = validate_start_state(&mut model)?;

        let mut potential = AdaptiveDiagPotential::new(settings.potential)?;
        potential.initialize(&position);

        let step_size = match settings.step_size {
            Some(step) => step,
            None => heuristic_initial_step(settings.step_scale, position.total_dim()),
        };
        ensure_positive("step_size", step_size)?;

        Ok(Hamiltonian {
            model,
            rng,
            settings,
            potential,
            step_size,
            position,
            log_prob,
        })
    }

    pub fn position(&self) -> &VariableValues {
        &self.position
    }

    fn advance(&mut self) -> Result<()> {
        let momentum = self.potential.random_momentum(&mut self.rng);
        let start = init_state(
            &mut self.model,
            &self.potential,
            self.position.clone(),
            momentum,
        )?;
        let initial_energy = start.energy();

        let mut state = start;
        let mut failed = false;
        for _ in 0..self.settings.leapfrog_steps {
            match leapfrog_step(
                &mut self.model,
                &self.potential,
                &state,
                Direction::Forward,
                self.step_size,
            )? {
                Some(next) => state = next,
                None => {
                    failed = true;
                    break;
                }
            }
        }

        let accepted = if failed {
            false
        } else {
            let energy_delta = initial_energy - state.energy();
            energy_delta.is_finite() && self.rng.random::<f64>().ln() < energy_delta
        };

        if accepted {
            self.position = state.position().clone();
            self.log_prob = state.log_prob();
        }
        // leave the model's assignment at the (possibly unchanged) state
        self.model.cascade(&self.position);
        Ok(())
    }
}

impl<M, R> SamplingAlgorithm for Hamiltonian<M, R>
where
    M: ProbabilisticModelWithGradient,
    R: Rng,
{
    fn step(&mut self) -> Result<()> {
        self.advance()
    }

    fn sample(&self) -> NetworkSample {
        NetworkSample {
            values: self.position.clone(),
            log_prob: self.log_prob,
        }
    }
}
