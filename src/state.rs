use crate::potential::Potential;
use crate::variable::VariableValues;

/// A point in phase space.
///
/// Position, momentum and gradient maps share one key set: the model's
/// latent variables. States are immutable once constructed; every leapfrog
/// step produces a new state, which keeps reversibility and energy
/// bookkeeping auditable.
#[derive(Debug, Clone)]
pub struct LeapfrogState {
    position: VariableValues,
    momentum: VariableValues,
    gradient: VariableValues,
    log_prob: f64,
    kinetic_energy: f64,
    index_in_trajectory: i64,
}

impl LeapfrogState {
    pub fn new<P: Potential>(
        position: VariableValues,
        momentum: VariableValues,
        gradient: VariableValues,
        log_prob: f64,
        potential: &P,
        index_in_trajectory: i64,
    ) -> Self {
        debug_assert_eq!(position.len(), momentum.len());
        debug_assert_eq!(position.len(), gradient.len());
        let velocity = potential.velocity(&momentum);
        let kinetic_energy = potential.kinetic_energy(&momentum, &velocity);
        LeapfrogState {
            position,
            momentum,
            gradient,
            log_prob,
            kinetic_energy,
            index_in_trajectory,
        }
    }

    pub fn position(&self) -> &VariableValues {
        &self.position
    }

    pub fn momentum(&self) -> &VariableValues {
        &self.momentum
    }

    pub fn gradient(&self) -> &VariableValues {
        &self.gradient
    }

    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.kinetic_energy
    }

    pub fn index_in_trajectory(&self) -> i64 {
        self.index_in_trajectory
    }

    /// Total energy, `-logp + kinetic`.
    pub fn energy(&self) -> f64 {
        -self.log_prob + self.kinetic_energy
    }

    /// The same point with the momentum sign flipped.
    pub fn reversed(&self) -> Self {
        LeapfrogState {
            position: self.position.clone(),
            momentum: self.momentum.negated(),
            gradient: self.gradient.clone(),
            log_prob: self.log_prob,
            kinetic_energy: self.kinetic_energy,
            index_in_trajectory: self.index_in_trajectory,
        }
    }
}

/// The Hoffman & Gelman U-turn criterion between two trajectory ends:
/// the trajectory is turning when the position delta opposes either
/// boundary momentum.
pub(crate) fn is_turning(left: &LeapfrogState, right: &LeapfrogState) -> bool {
    let mut delta = right.position.clone();
    delta.add_scaled(&left.position, -1.0);
    delta.dot(&left.momentum) < 0. || delta.dot(&right.momentum) < 0.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::{AdaptiveDiagPotential, AdaptivePotentialSettings};
    use crate::variable::VariableReference;
    use ndarray::arr1;

    fn values(data: &[f64]) -> VariableValues {
        [(VariableReference::new(0), arr1(data).into_dyn())]
            .into_iter()
            .collect()
    }

    fn state(position: &[f64], momentum: &[f64]) -> LeapfrogState {
        let mut potential =
            AdaptiveDiagPotential::new(AdaptivePotentialSettings::default()).unwrap();
        potential.initialize(&values(position));
        LeapfrogState::new(
            values(position),
            values(momentum),
            values(position).zeros_like(),
            0.0,
            &potential,
            0,
        )
    }

    #[test]
    fn energy_is_neg_logp_plus_kinetic() {
        let s = state(&[0.0], &[2.0]);
        assert!((s.energy() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn detects_a_u_turn() {
        // moving apart: not turning
        let left = state(&[0.0], &[-1.0]);
        let right = state(&[1.0], &[1.0]);
        assert!(!is_turning(&left, &right));
        // both momenta point back toward the other end
        let left = state(&[0.0], &[1.0]);
        let right = state(&[1.0], &[-1.0]);
        assert!(is_turning(&left, &right));
    }

    #[test]
    fn reversal_flips_momentum_only() {
        let s = state(&[1.0, 2.0], &[3.0, -4.0]);
        let r = s.reversed();
        assert_eq!(r.position(), s.position());
        assert_eq!(r.momentum(), &s.momentum().negated());
        assert_eq!(r.energy(), s.energy());
    }
}
