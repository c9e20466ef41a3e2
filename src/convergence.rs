use itertools::izip;

use crate::model::{ensure_positive, BuildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Norm {
    MaxAbs,
    L2,
}

/// Decides whether two successive latent positions are close enough to
/// stop optimizing. The delta is taken either absolutely or relative to
/// the previous position, epsilon-regularized so that near-zero
/// coordinates cannot blow the ratio up.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceChecker {
    norm: Norm,
    threshold: f64,
    relative_epsilon: Option<f64>,
}

impl ConvergenceChecker {
    pub fn absolute(norm: Norm, threshold: f64) -> Result<Self, BuildError> {
        ensure_positive("threshold", threshold)?;
        Ok(ConvergenceChecker {
            norm,
            threshold,
            relative_epsilon: None,
        })
    }

    pub fn relative(norm: Norm, threshold: f64, epsilon: f64) -> Result<Self, BuildError> {
        ensure_positive("threshold", threshold)?;
        ensure_positive("epsilon", epsilon)?;
        Ok(ConvergenceChecker {
            norm,
            threshold,
            relative_epsilon: Some(epsilon),
        })
    }

    pub fn converged(&self, previous: &[f64], current: &[f64]) -> bool {
        debug_assert_eq!(previous.len(), current.len());
        let deltas = izip!(previous, current).map(|(&p, &c)| {
            let delta = c - p;
            match self.relative_epsilon {
                Some(eps) => delta / (p.abs() + eps),
                None => delta,
            }
        });
        let size = match self.norm {
            Norm::MaxAbs => deltas.fold(0f64, |acc, d| acc.max(d.abs())),
            Norm::L2 => deltas.map(|d| d * d).sum::<f64>().sqrt(),
        };
        size < self.threshold
    }
}

impl Default for ConvergenceChecker {
    fn default() -> Self {
        ConvergenceChecker {
            norm: Norm::MaxAbs,
            threshold: 1e-6,
            relative_epsilon: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_threshold() {
        assert!(ConvergenceChecker::absolute(Norm::L2, 0.).is_err());
        assert!(ConvergenceChecker::relative(Norm::L2, 1e-3, 0.).is_err());
    }

    #[test]
    fn max_abs_checks_the_worst_coordinate() {
        let checker = ConvergenceChecker::absolute(Norm::MaxAbs, 1e-3).unwrap();
        assert!(checker.converged(&[1.0, 2.0], &[1.0 + 1e-4, 2.0 - 1e-4]));
        assert!(!checker.converged(&[1.0, 2.0], &[1.0 + 1e-2, 2.0]));
    }

    #[test]
    fn l2_aggregates_coordinates() {
        let checker = ConvergenceChecker::absolute(Norm::L2, 1e-3).unwrap();
        // each coordinate below threshold, but not their norm
        let previous = vec![0.0; 4];
        let current = vec![9e-4; 4];
        assert!(!checker.converged(&previous, &current));
    }

    #[test]
    fn relative_delta_scales_with_magnitude() {
        let checker = ConvergenceChecker::relative(Norm::MaxAbs, 1e-3, 1e-12).unwrap();
        // a shift of 0.5 on a coordinate of a million is relatively tiny
        assert!(checker.converged(&[1e6], &[1e6 + 0.5]));
        assert!(!checker.converged(&[1.0], &[1.5]));
    }
}
