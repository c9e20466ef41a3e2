use std::cell::RefCell;
use std::rc::Rc;

use argmin::core::{Executor, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use thiserror::Error;

use crate::convergence::ConvergenceChecker;
use crate::fitness::{
    FitnessKind, FitnessObserver, FitnessProblem, GradientObserver, LatentLayout,
};
use crate::model::{
    ensure_positive, ensure_positive_count, validate_differentiable, validate_start_state,
    BuildError, ProbabilisticModel, ProbabilisticModelWithGradient,
};
use crate::variable::VariableValues;

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Solver(#[from] argmin::core::Error),
}

/// The optimum found, with the model left cascaded to it.
#[derive(Debug, Clone)]
pub struct OptimizedResult {
    pub fitness: f64,
    pub values: VariableValues,
}

#[derive(Clone, Copy)]
pub struct GradientOptimizerSettings {
    /// Cap on inner optimizer iterations across all rounds.
    pub max_iterations: u64,
    /// Iterations per round; successive round endpoints are compared by
    /// the convergence checker.
    pub iterations_per_round: u64,
    /// L-BFGS history length.
    pub memory: usize,
    pub convergence: ConvergenceChecker,
}

impl Default for GradientOptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            iterations_per_round: 50,
            memory: 7,
            convergence: ConvergenceChecker::default(),
        }
    }
}

/// Maximizes fitness with a quasi-Newton line-search method (L-BFGS),
/// adapted to the latent-tensor space through flatten/unflatten adaptors.
pub struct GradientOptimizer<M> {
    model: Rc<RefCell<M>>,
    layout: LatentLayout,
    settings: GradientOptimizerSettings,
    start: VariableValues,
    fitness_observers: Rc<RefCell<Vec<FitnessObserver>>>,
    gradient_observers: Rc<RefCell<Vec<GradientObserver>>>,
}

impl<M: ProbabilisticModelWithGradient> GradientOptimizer<M> {
    pub fn new(mut model: M, settings: GradientOptimizerSettings) -> Result<Self, BuildError> {
        validate_differentiable(&model)?;
        ensure_positive_count("max_iterations", settings.max_iterations as usize)?;
        ensure_positive_count("iterations_per_round", settings.iterations_per_round as usize)?;
        ensure_positive_count("memory", settings.memory)?;
        let (start, _) = validate_start_state(&mut model)?;
        let layout = LatentLayout::of_model(&model)?;
        Ok(GradientOptimizer {
            model: Rc::new(RefCell::new(model)),
            layout,
            settings,
            start,
            fitness_observers: Rc::new(RefCell::new(Vec::new())),
            gradient_observers: Rc::new(RefCell::new(Vec::new())),
        })
    }

    /// Observe every fitness evaluation (flat point, fitness).
    pub fn add_fitness_observer(&mut self, observer: impl FnMut(&[f64], f64) + 'static) {
        self.fitness_observers.borrow_mut().push(Box::new(observer));
    }

    /// Observe every gradient evaluation (flat point, flat gradient).
    pub fn add_gradient_observer(&mut self, observer: impl FnMut(&[f64], &[f64]) + 'static) {
        self.gradient_observers
            .borrow_mut()
            .push(Box::new(observer));
    }

    pub fn max_a_posteriori(&mut self) -> Result<OptimizedResult, OptimizerError> {
        self.optimize(FitnessKind::MaxAPosteriori)
    }

    pub fn max_likelihood(&mut self) -> Result<OptimizedResult, OptimizerError> {
        self.optimize(FitnessKind::MaxLikelihood)
    }

    pub fn into_model(self) -> M {
        Rc::try_unwrap(self.model)
            .ok()
            .expect("no optimization running")
            .into_inner()
    }

    fn problem(&self, kind: FitnessKind) -> FitnessProblem<M> {
        FitnessProblem {
            model: self.model.clone(),
            layout: self.layout.clone(),
            kind,
            fitness_observers: self.fitness_observers.clone(),
            gradient_observers: self.gradient_observers.clone(),
        }
    }

    fn optimize(&mut self, kind: FitnessKind) -> Result<OptimizedResult, OptimizerError> {
        let mut current = self.layout.flatten(&self.start);
        let mut fitness = f64::NEG_INFINITY;
        let mut used = 0u64;

        while used < self.settings.max_iterations {
            let round = (self.settings.max_iterations - used).min(self.settings.iterations_per_round);
            let linesearch: MoreThuenteLineSearch<Vec<f64>, Vec<f64>, f64> =
                MoreThuenteLineSearch::new();
            let solver = LBFGS::new(linesearch, self.settings.memory);
            let result = Executor::new(self.problem(kind), solver)
                .configure(|state| state.param(current.clone()).max_iters(round))
                .run();
            let result = match result {
                Ok(result) => result,
                Err(err) if used > 0 => {
                    // a stalled line search near the optimum terminates the
                    // round loop instead of failing the whole optimization
                    log::debug!("inner optimizer stopped: {err}");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let iters = result.state().get_iter();
            used += iters.max(1);
            fitness = -result.state().get_best_cost();
            let next = match result.state().get_best_param() {
                Some(best) => best.clone(),
                None => break,
            };
            let converged = self.settings.convergence.converged(&current, &next);
            current = next;
            if converged || iters == 0 {
                break;
            }
        }

        let values = self.layout.unflatten(&current);
        self.model.borrow_mut().cascade(&values);
        Ok(OptimizedResult { fitness, values })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NonGradientOptimizerSettings {
    pub max_iterations: u64,
    /// Offset used to build the initial simplex around the start point.
    pub simplex_step: f64,
    /// Terminate when the simplex fitness standard deviation drops below
    /// this value.
    pub sd_tolerance: f64,
}

impl Default for NonGradientOptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            simplex_step: 0.1,
            sd_tolerance: 1e-10,
        }
    }
}

/// Derivative-free fitness maximization (Nelder-Mead simplex). Works on
/// models without gradients, discrete-free or not.
pub struct NonGradientOptimizer<M> {
    model: Rc<RefCell<M>>,
    layout: LatentLayout,
    settings: NonGradientOptimizerSettings,
    start: VariableValues,
    fitness_observers: Rc<RefCell<Vec<FitnessObserver>>>,
}

impl<M: ProbabilisticModel> NonGradientOptimizer<M> {
    pub fn new(mut model: M, settings: NonGradientOptimizerSettings) -> Result<Self, BuildError> {
        ensure_positive_count("max_iterations", settings.max_iterations as usize)?;
        ensure_positive("simplex_step", settings.simplex_step)?;
        ensure_positive("sd_tolerance", settings.sd_tolerance)?;
        let (start, _) = validate_start_state(&mut model)?;
        let layout = LatentLayout::of_model(&model)?;
        Ok(NonGradientOptimizer {
            model: Rc::new(RefCell::new(model)),
            layout,
            settings,
            start,
            fitness_observers: Rc::new(RefCell::new(Vec::new())),
        })
    }

    pub fn add_fitness_observer(&mut self, observer: impl FnMut(&[f64], f64) + 'static) {
        self.fitness_observers.borrow_mut().push(Box::new(observer));
    }

    pub fn max_a_posteriori(&mut self) -> Result<OptimizedResult, OptimizerError> {
        self.optimize(FitnessKind::MaxAPosteriori)
    }

    pub fn max_likelihood(&mut self) -> Result<OptimizedResult, OptimizerError> {
        self.optimize(FitnessKind::MaxLikelihood)
    }

    pub fn into_model(self) -> M {
        Rc::try_unwrap(self.model)
            .ok()
            .expect("no optimization running")
            .into_inner()
    }

    fn optimize(&mut self, kind: FitnessKind) -> Result<OptimizedResult, OptimizerError> {
        let start = self.layout.flatten(&self.start);
        let mut simplex = vec![start.clone()];
        for i in 0..start.len() {
            let mut vertex = start.clone();
            vertex[i] += self.settings.simplex_step;
            simplex.push(vertex);
        }

        let problem = FitnessProblem {
            model: self.model.clone(),
            layout: self.layout.clone(),
            kind,
            fitness_observers: self.fitness_observers.clone(),
            gradient_observers: Rc::new(RefCell::new(Vec::new())),
        };
        let solver = NelderMead::new(simplex).with_sd_tolerance(self.settings.sd_tolerance)?;
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.settings.max_iterations))
            .run()?;

        let best = result
            .state()
            .get_best_param()
            .cloned()
            .unwrap_or(start);
        let fitness = -result.state().get_best_cost();
        let values = self.layout.unflatten(&best);
        self.model.borrow_mut().cascade(&values);
        Ok(OptimizedResult { fitness, values })
    }
}
