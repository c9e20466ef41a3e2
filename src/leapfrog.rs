use rand_distr::{Distribution, StandardUniform};

use crate::model::{LogpError, ProbabilisticModelWithGradient, Result, SamplerError};
use crate::potential::Potential;
use crate::state::LeapfrogState;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub(crate) fn sign(&self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// One symplectic step of Hamiltonian dynamics: half-kick, drift, half-kick.
///
/// The direction sign is folded into the step size. Returns `Ok(None)` when
/// the model failed recoverably at the new position; the caller treats that
/// as a divergence (NUTS) or a rejection (HMC).
pub(crate) fn leapfrog_step<M, P>(
    model: &mut M,
    potential: &P,
    start: &LeapfrogState,
    direction: Direction,
    step_size: f64,
) -> Result<Option<LeapfrogState>>
where
    M: ProbabilisticModelWithGradient,
    P: Potential,
{
    let sign = direction.sign();
    let epsilon = sign as f64 * step_size;

    let mut momentum = start.momentum().clone();
    momentum.add_scaled(start.gradient(), 0.5 * epsilon);

    let mut position = start.position().clone();
    position.add_scaled(&potential.velocity(&momentum), epsilon);

    let (log_prob, gradient) = match model.log_prob_gradient(&position) {
        Ok(out) => out,
        Err(err) if err.is_recoverable() => return Ok(None),
        Err(err) => return Err(SamplerError::LogpFailure(Box::new(err))),
    };

    momentum.add_scaled(&gradient, 0.5 * epsilon);

    Ok(Some(LeapfrogState::new(
        position,
        momentum,
        gradient,
        log_prob,
        potential,
        start.index_in_trajectory() + sign,
    )))
}

/// Build the initial state of a trajectory at `position` with fresh momentum.
pub(crate) fn init_state<M, P>(
    model: &mut M,
    potential: &P,
    position: crate::variable::VariableValues,
    momentum: crate::variable::VariableValues,
) -> Result<LeapfrogState>
where
    M: ProbabilisticModelWithGradient,
    P: Potential,
{
    let (log_prob, gradient) = model
        .log_prob_gradient(&position)
        .map_err(|e| SamplerError::LogpFailure(Box::new(e)))?;
    Ok(LeapfrogState::new(
        position, momentum, gradient, log_prob, potential, 0,
    ))
}
