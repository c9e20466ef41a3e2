use crate::leapfrog::{leapfrog_step, Direction};
use crate::math::logaddexp;
use crate::model::{ProbabilisticModelWithGradient, SamplerError};
use crate::potential::Potential;
use crate::state::{is_turning, LeapfrogState};

/// A part of the trajectory tree during NUTS sampling.
///
/// Accumulates, across recursive doubling: the leftmost and rightmost
/// states explored so far, a multinomial draw from the trajectory (weights
/// combined with logaddexp), the sum of per-leaf acceptance probabilities
/// and the leaf count, and the tree depth.
pub(crate) struct Tree {
    /// The left side always has the smaller index in the trajectory;
    /// leapfrogs in backward direction replace the left.
    left: LeapfrogState,
    right: LeapfrogState,
    draw: LeapfrogState,
    log_size: f64,
    depth: u64,
    initial_energy: f64,
    accept_sum: f64,
    leaf_count: u64,
    /// A tree is the main tree if it contains the initial point of the
    /// trajectory.
    is_main: bool,
}

pub(crate) enum ExtendResult {
    /// The extension succeeded and the termination criterion was not hit.
    Ok(Tree),
    /// Extension succeeded and a U-turn was detected.
    Turning(Tree),
    /// A divergence invalidated the new subtree; the accumulated tree
    /// stays as it was.
    Diverging(Tree),
    /// An unrecoverable model error.
    Err(SamplerError),
}

enum LeafResult {
    Leaf(Tree),
    Diverging,
    Err(SamplerError),
}

impl Tree {
    pub(crate) fn new(state: LeapfrogState) -> Tree {
        let initial_energy = state.energy();
        Tree {
            right: state.clone(),
            left: state.clone(),
            draw: state,
            depth: 0,
            log_size: 0.,
            initial_energy,
            accept_sum: 0.,
            leaf_count: 0,
            is_main: true,
        }
    }

    pub(crate) fn depth(&self) -> u64 {
        self.depth
    }

    pub(crate) fn accept_sum(&self) -> f64 {
        self.accept_sum
    }

    pub(crate) fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub(crate) fn into_draw(self) -> LeapfrogState {
        self.draw
    }

    /// Double the trajectory: build a subtree of the current depth in
    /// `direction` and merge it in, unless it turns or diverges.
    pub(crate) fn extend<M, P, R>(
        mut self,
        model: &mut M,
        potential: &P,
        step_size: f64,
        max_energy_change: f64,
        rng: &mut R,
        direction: Direction,
    ) -> ExtendResult
    where
        M: ProbabilisticModelWithGradient,
        P: Potential,
        R: rand::Rng + ?Sized,
    {
        let mut other = match self.single_leaf(model, potential, step_size, max_energy_change, direction)
        {
            LeafResult::Leaf(tree) => tree,
            LeafResult::Diverging => {
                self.leaf_count += 1;
                return ExtendResult::Diverging(self);
            }
            LeafResult::Err(err) => return ExtendResult::Err(err),
        };

        while other.depth < self.depth {
            use ExtendResult::*;
            other = match other.extend(model, potential, step_size, max_energy_change, rng, direction)
            {
                Ok(tree) => tree,
                Turning(tree) => {
                    self.absorb_statistics(&tree);
                    return Turning(self);
                }
                Diverging(tree) => {
                    self.absorb_statistics(&tree);
                    return Diverging(self);
                }
                Err(err) => return Err(err),
            };
        }

        let (first, last) = match direction {
            Direction::Forward => (&self.left, &other.right),
            Direction::Backward => (&other.left, &self.right),
        };

        let mut turning = is_turning(first, last);
        if self.depth > 0 {
            if !turning {
                turning = is_turning(&self.right, &other.right);
            }
            if !turning {
                turning = is_turning(&self.left, &other.left);
            }
        }

        self.merge_into(other, rng, direction);

        if turning {
            ExtendResult::Turning(self)
        } else {
            ExtendResult::Ok(self)
        }
    }

    fn merge_into<R: rand::Rng + ?Sized>(&mut self, other: Tree, rng: &mut R, direction: Direction) {
        debug_assert!(self.depth == other.depth);
        debug_assert!(self.left.index_in_trajectory() <= self.right.index_in_trajectory());
        match direction {
            Direction::Forward => {
                self.right = other.right;
            }
            Direction::Backward => {
                self.left = other.left;
            }
        }

        let log_size = logaddexp(self.log_size, other.log_size);

        let self_log_size = if self.is_main {
            debug_assert!(self.left.index_in_trajectory() <= 0);
            debug_assert!(self.right.index_in_trajectory() >= 0);
            self.log_size
        } else {
            log_size
        };

        if other.log_size >= self_log_size {
            self.draw = other.draw;
        } else if rng.random_bool((other.log_size - self_log_size).exp()) {
            self.draw = other.draw;
        }

        self.depth += 1;
        self.log_size = log_size;
        self.accept_sum += other.accept_sum;
        self.leaf_count += other.leaf_count;
    }

    fn absorb_statistics(&mut self, other: &Tree) {
        self.accept_sum += other.accept_sum;
        self.leaf_count += other.leaf_count;
    }

    /// One leapfrog from the boundary of this tree, as a one-leaf tree.
    fn single_leaf<M, P>(
        &self,
        model: &mut M,
        potential: &P,
        step_size: f64,
        max_energy_change: f64,
        direction: Direction,
    ) -> LeafResult
    where
        M: ProbabilisticModelWithGradient,
        P: Potential,
    {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match leapfrog_step(model, potential, start, direction, step_size) {
            Ok(Some(end)) => end,
            Ok(None) => return LeafResult::Diverging,
            Err(err) => return LeafResult::Err(err),
        };

        let log_size = self.initial_energy - end.energy();
        if !log_size.is_finite() || log_size.abs() > max_energy_change {
            return LeafResult::Diverging;
        }
        let accept_prob = log_size.min(0.).exp();

        LeafResult::Leaf(Tree {
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            initial_energy: self.initial_energy,
            accept_sum: accept_prob,
            leaf_count: 1,
            is_main: false,
        })
    }
}
