use rand::Rng;

use crate::generator::SamplingAlgorithm;
use crate::leapfrog::{init_state, Direction};
use crate::model::{
    ensure_positive, ensure_positive_count, validate_differentiable, validate_start_state,
    BuildError, ProbabilisticModelWithGradient, Result,
};
use crate::potential::{AdaptiveDiagPotential, AdaptivePotentialSettings, Potential};
use crate::samples::{metric, NetworkSample, Statistics};
use crate::stepsize::{heuristic_initial_step, DualAverageStepSize, StepSizeSettings};
use crate::tree::{ExtendResult, Tree};
use crate::variable::VariableValues;

/// Settings for the No-U-Turn sampler.
#[derive(Debug, Clone, Copy)]
pub struct NutsSettings {
    /// Maximum tree depth per iteration.
    pub max_tree_height: u64,
    /// Energy error beyond which a trajectory counts as divergent. A
    /// tunable safety threshold, not a contract.
    pub max_energy_change: f64,
    /// Explicit initial step size; the `step_scale / dim^0.25` heuristic
    /// applies when unset.
    pub initial_step_size: Option<f64>,
    /// Step-size adaptation (`target_accept` defaults to 0.65).
    pub step_size: StepSizeSettings,
    /// Mass-matrix estimation.
    pub potential: AdaptivePotentialSettings,
    /// Record per-iteration diagnostics in `Statistics`.
    pub record_statistics: bool,
}

impl Default for NutsSettings {
    fn default() -> Self {
        Self {
            max_tree_height: 10,
            max_energy_change: 1000.,
            initial_step_size: None,
            step_size: StepSizeSettings::default(),
            potential: AdaptivePotentialSettings::default(),
            record_statistics: false,
        }
    }
}

/// Adaptive Hamiltonian sampler with dynamic trajectory lengths.
///
/// Each iteration draws a fresh momentum, grows a binary trajectory tree
/// by doubling until it turns back on itself (or diverges, or reaches the
/// height limit), and takes the tree's multinomial draw as the next state.
/// Within the adaptation window the step size and the diagonal mass matrix
/// are tuned from the tree statistics.
pub struct Nuts<M, R>
where
    M: ProbabilisticModelWithGradient,
    R: Rng,
{
    model: M,
    rng: R,
    settings: NutsSettings,
    potential: AdaptiveDiagPotential,
    step_size: DualAverageStepSize,
    position: VariableValues,
    log_prob: f64,
    iteration: u64,
    statistics: Statistics,
}

impl<M, R> Nuts<M, R>
where
    M: ProbabilisticModelWithGradient,
    R: Rng,
{
    pub fn new(mut model: M, settings: NutsSettings, rng: R) -> std::result::Result<Self, BuildError> {
        validate_differentiable(&model)?;
        ensure_positive_count("max_tree_height", settings.max_tree_height as usize)?;
        ensure_positive("max_energy_change", settings.max_energy_change)?;
        let (position, log_prob) = validate_start_state(&mut model)?;

        let mut potential = AdaptiveDiagPotential::new(settings.potential)?;
        potential.initialize(&position);

        let initial_step = match settings.initial_step_size {
            Some(step) => step,
            None => heuristic_initial_step(settings.step_size.step_scale, position.total_dim()),
        };
        let step_size = DualAverageStepSize::new(settings.step_size, initial_step)?;

        Ok(Nuts {
            model,
            rng,
            settings,
            potential,
            step_size,
            position,
            log_prob,
            iteration: 0,
            statistics: Statistics::new(),
        })
    }

    /// Per-iteration diagnostics; empty unless `record_statistics` is set.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn position(&self) -> &VariableValues {
        &self.position
    }

    fn advance(&mut self) -> Result<()> {
        let step_size = self.step_size.step_size();
        let momentum = self.potential.random_momentum(&mut self.rng);
        let init = init_state(
            &mut self.model,
            &self.potential,
            self.position.clone(),
            momentum,
        )?;

        let mut tree = Tree::new(init);
        let mut diverged = false;
        loop {
            if tree.depth() >= self.settings.max_tree_height {
                break;
            }
            let direction: Direction = self.rng.random();
            match tree.extend(
                &mut self.model,
                &self.potential,
                step_size,
                self.settings.max_energy_change,
                &mut self.rng,
                direction,
            ) {
                ExtendResult::Ok(grown) => tree = grown,
                ExtendResult::Turning(grown) => {
                    tree = grown;
                    break;
                }
                ExtendResult::Diverging(grown) => {
                    tree = grown;
                    diverged = true;
                    break;
                }
                ExtendResult::Err(err) => return Err(err),
            }
        }
        if diverged {
            log::debug!(
                "divergent trajectory at iteration {} (step size {})",
                self.iteration,
                step_size
            );
        }

        let accept_sum = tree.accept_sum();
        let leaf_count = tree.leaf_count();
        let draw = tree.into_draw();
        self.position = draw.position().clone();
        self.log_prob = draw.log_prob();
        // leave the model's assignment at the accepted state
        self.model.cascade(&self.position);

        if self.iteration < self.settings.step_size.adapt_count {
            self.step_size.advance(accept_sum, leaf_count as f64);
            self.potential.update(&self.position);
        }
        self.iteration += 1;

        if self.settings.record_statistics {
            self.statistics.append(metric::STEP_SIZE, step_size);
            self.statistics.append(metric::LOG_PROB, self.log_prob);
            let mean_accept = if leaf_count > 0 {
                accept_sum / leaf_count as f64
            } else {
                0.
            };
            self.statistics.append(metric::MEAN_TREE_ACCEPT, mean_accept);
            self.statistics.append(metric::TREE_SIZE, leaf_count as f64);
        }
        Ok(())
    }
}

impl<M, R> SamplingAlgorithm for Nuts<M, R>
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
