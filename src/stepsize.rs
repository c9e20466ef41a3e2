use crate::model::{ensure_positive, BuildError};

/// Settings for dual-averaging step-size adaptation.
///
/// `t0`, `gamma` and `kappa` are the standard stochastic-approximation
/// constants (Hoffman & Gelman 2014).
#[derive(Debug, Clone, Copy)]
pub struct StepSizeSettings {
    /// Acceptance probability the controller steers toward.
    pub target_accept: f64,
    /// Number of adaptation calls before the step size freezes.
    /// Zero disables adaptation entirely.
    pub adapt_count: u64,
    /// Scale of the heuristic initial step size.
    pub step_scale: f64,
    pub t0: f64,
    pub gamma: f64,
    pub kappa: f64,
}

impl Default for StepSizeSettings {
    fn default() -> StepSizeSettings {
        StepSizeSettings {
            target_accept: 0.65,
            adapt_count: 1000,
            step_scale: 0.25,
            t0: 10.,
            gamma: 0.05,
            kappa: 0.75,
        }
    }
}

/// A first step size before any adaptation has run.
pub fn heuristic_initial_step(step_scale: f64, total_dim: usize) -> f64 {
    step_scale / (total_dim as f64).powf(0.25)
}

/// Dual-averaging step-size controller.
///
/// While adapting, `step_size` returns the noisy per-iteration estimate;
/// once `adapt_count` calls have elapsed it freezes at the averaged value
/// and never moves again. With `adapt_count == 0` the initial step size is
/// returned unconditionally, forever.
#[derive(Debug, Clone)]
pub struct DualAverageStepSize {
    settings: StepSizeSettings,
    initial_step: f64,
    log_step: f64,
    log_step_frozen: f64,
    hbar: f64,
    mu: f64,
    count: u64,
}

impl DualAverageStepSize {
    pub fn new(settings: StepSizeSettings, initial_step: f64) -> Result<Self, BuildError> {
        ensure_positive("initial_step", initial_step)?;
        ensure_positive("target_accept", settings.target_accept)?;
        Ok(DualAverageStepSize {
            settings,
            initial_step,
            log_step: initial_step.ln(),
            log_step_frozen: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 0,
        })
    }

    /// Feed one tree's acceptance statistics into the controller.
    ///
    /// `accept_sum` is the sum of per-leaf Metropolis acceptance
    /// probabilities and `tree_size` the number of leaves it was summed
    /// over. Calls past the adaptation window are ignored.
    pub fn advance(&mut self, accept_sum: f64, tree_size: f64) {
        if self.frozen() {
            return;
        }
        let accept_prob = if tree_size > 0. {
            (accept_sum / tree_size).min(1.)
        } else {
            0.
        };
        self.count += 1;
        let iter = self.count as f64;
        let w = 1. / (iter + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (self.settings.target_accept - accept_prob);
        self.log_step = self.mu - self.hbar * iter.sqrt() / self.settings.gamma;
        let mk = iter.powf(-self.settings.kappa);
        self.log_step_frozen = mk * self.log_step + (1. - mk) * self.log_step_frozen;
        if self.frozen() {
            log::debug!(
                "step size adaptation finished after {} iterations at {}",
                self.count,
                self.log_step_frozen.exp()
            );
        }
    }

    pub fn step_size(&self) -> f64 {
        if self.settings.adapt_count == 0 {
            self.initial_step
        } else if self.frozen() {
            self.log_step_frozen.exp()
        } else {
            self.log_step.exp()
        }
    }

    fn frozen(&self) -> bool {
        self.settings.adapt_count == 0 || self.count >= self.settings.adapt_count
    }
}
