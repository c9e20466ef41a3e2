use rand_distr::StandardNormal;

use crate::model::{ensure_positive, ensure_positive_count, BuildError};
use crate::variable::VariableValues;
use crate::variance::VarianceCalculator;

const LOWER_LIMIT: f64 = 1e-10;
const UPPER_LIMIT: f64 = 1e10;

/// Estimator samples required before the metric moves off its initial scale.
const MIN_ESTIMATOR_SAMPLES: u64 = 10;
/// Shrinkage of the raw variance estimate, `n/(n+5)` toward a small floor.
const REGULARIZATION_WEIGHT: f64 = 5.0;
const REGULARIZATION_SCALE: f64 = 1e-3;

/// The kinetic-energy metric of the Hamiltonian, always diagonal here.
///
/// The estimated posterior variance per element defines the inverse mass:
/// momentum is drawn with standard deviation `1/sigma` and
/// `velocity = momentum * sigma^2` (division by the diagonal mass).
pub trait Potential {
    /// Set the initial diagonal scale from a starting position.
    fn initialize(&mut self, position: &VariableValues);

    /// Feed a new posterior sample into the variance estimator.
    fn update(&mut self, sample: &VariableValues);

    /// Draw a momentum map matching the current mass matrix.
    fn random_momentum<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) -> VariableValues;

    /// `momentum / mass`, elementwise.
    fn velocity(&self, momentum: &VariableValues) -> VariableValues;

    fn kinetic_energy(&self, momentum: &VariableValues, velocity: &VariableValues) -> f64 {
        0.5 * momentum.dot(velocity)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptivePotentialSettings {
    /// Variance-estimator window; halved (oldest half dropped) when full.
    pub window_size: usize,
    /// Uniform initial standard deviation before any samples arrived.
    pub initial_scale: f64,
}

impl Default for AdaptivePotentialSettings {
    fn default() -> Self {
        Self {
            window_size: 100,
            initial_scale: 1.0,
        }
    }
}

/// Diagonal mass matrix estimated online from the sample stream.
#[derive(Debug, Clone)]
pub struct AdaptiveDiagPotential {
    settings: AdaptivePotentialSettings,
    estimator: VarianceCalculator,
    variance: VariableValues,
    inv_stds: VariableValues,
}

impl AdaptiveDiagPotential {
    pub fn new(settings: AdaptivePotentialSettings) -> Result<Self, BuildError> {
        ensure_positive_count("window_size", settings.window_size)?;
        ensure_positive("initial_scale", settings.initial_scale)?;
        Ok(AdaptiveDiagPotential {
            settings,
            estimator: VarianceCalculator::new(settings.window_size),
            variance: VariableValues::new(),
            inv_stds: VariableValues::new(),
        })
    }

    /// Current per-element standard deviation estimate.
    pub fn standard_deviation(&self) -> VariableValues {
        self.variance.mapv(f64::sqrt)
    }

    fn set_variance(&mut self, variance: VariableValues) {
        let clamped = variance.mapv(|v| {
            assert!(v.is_finite(), "illegal value on mass matrix: {}", v);
            v.clamp(LOWER_LIMIT, UPPER_LIMIT)
        });
        self.inv_stds = clamped.mapv(|v| (1. / v).sqrt());
        self.variance = clamped;
    }
}

impl Potential for AdaptiveDiagPotential {
    fn initialize(&mut self, position: &VariableValues) {
        let scale = self.settings.initial_scale;
        self.estimator = VarianceCalculator::new(self.settings.window_size);
        self.set_variance(position.mapv(|_| scale * scale));
    }

    fn update(&mut self, sample: &VariableValues) {
        self.estimator.add_sample(sample);
        let count = self.estimator.count();
        if count < MIN_ESTIMATOR_SAMPLES {
            return;
        }
        if let Some(variance) = self.estimator.variance() {
            let weight = count as f64 / (count as f64 + REGULARIZATION_WEIGHT);
            self.set_variance(
                variance.mapv(|v| weight * v + (1. - weight) * REGULARIZATION_SCALE),
            );
        }
    }

    fn random_momentum<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) -> VariableValues {
        self.inv_stds
            .iter()
            .map(|(variable, inv_std)| {
                let momentum = inv_std.mapv(|s| {
                    let norm: f64 = rng.sample(StandardNormal);
                    s * norm
                });
                (*variable, momentum)
            })
            .collect()
    }

    fn velocity(&self, momentum: &VariableValues) -> VariableValues {
        momentum.mul(&self.variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableReference;
    use ndarray::arr1;
    use rand::SeedableRng;

    fn position() -> VariableValues {
        [(VariableReference::new(0), arr1(&[0.0, 0.0]).into_dyn())]
            .into_iter()
            .collect()
    }

    #[test]
    fn rejects_bad_settings() {
        let bad = AdaptivePotentialSettings {
            window_size: 0,
            ..Default::default()
        };
        assert!(AdaptiveDiagPotential::new(bad).is_err());
        let bad = AdaptivePotentialSettings {
            initial_scale: -1.0,
            ..Default::default()
        };
        assert!(AdaptiveDiagPotential::new(bad).is_err());
    }

    #[test]
    fn unit_scale_gives_identity_metric() {
        let mut potential = AdaptiveDiagPotential::new(Default::default()).unwrap();
        potential.initialize(&position());
        let momentum: VariableValues = [(VariableReference::new(0), arr1(&[1.0, -2.0]).into_dyn())]
            .into_iter()
            .collect();
        let velocity = potential.velocity(&momentum);
        assert_eq!(velocity, momentum);
        let kinetic = potential.kinetic_energy(&momentum, &velocity);
        assert!((kinetic - 0.5 * (1.0 + 4.0)).abs() < 1e-12);
    }

    #[test]
    fn update_narrows_the_metric() {
        let mut potential = AdaptiveDiagPotential::new(Default::default()).unwrap();
        potential.initialize(&position());
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(3);
        for i in 0..50 {
            let x = 0.01 * (i % 5) as f64;
            let sample: VariableValues =
                [(VariableReference::new(0), arr1(&[x, x]).into_dyn())]
                    .into_iter()
                    .collect();
            potential.update(&sample);
        }
        let sd = potential.standard_deviation();
        let sd0 = sd.get(&VariableReference::new(0)).unwrap()[[0]];
        assert!(sd0 < 0.1, "expected narrow metric, got {}", sd0);
        // momentum scale is the inverse of the position scale
        let momentum = potential.random_momentum(&mut rng);
        assert!(momentum.all_finite());
    }
}
