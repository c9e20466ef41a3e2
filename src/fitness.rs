use std::cell::RefCell;
use std::rc::Rc;

use argmin::core::{CostFunction, Error, Gradient};
use ndarray::{Array, IxDyn};

use crate::model::{BuildError, ProbabilisticModel, ProbabilisticModelWithGradient};
use crate::variable::{VariableReference, VariableValues};

/// Which scalar the optimizer maximizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessKind {
    /// Joint log-probability (priors included).
    MaxAPosteriori,
    /// Log-likelihood of the observed variables only.
    MaxLikelihood,
}

/// Deterministic mapping between latent maps and one flat vector.
///
/// Order is the model's declared latent order; each variable contributes
/// `shape`-many scalars, row-major.
#[derive(Debug, Clone)]
pub(crate) struct LatentLayout {
    entries: Vec<(VariableReference, Vec<usize>, usize)>,
    total_dim: usize,
}

impl LatentLayout {
    pub(crate) fn of_model<M: ProbabilisticModel>(model: &M) -> Result<Self, BuildError> {
        let mut entries = Vec::new();
        let mut total_dim = 0usize;
        for variable in model.latent_variables() {
            let shape = model.shape(&variable);
            let len = shape
                .iter()
                .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
                .ok_or(BuildError::DimensionOverflow)?;
            total_dim = total_dim
                .checked_add(len)
                .ok_or(BuildError::DimensionOverflow)?;
            entries.push((variable, shape, len));
        }
        Ok(LatentLayout { entries, total_dim })
    }

    pub(crate) fn total_dim(&self) -> usize {
        self.total_dim
    }

    /// Flatten a variable map into vector order. A variable absent from
    /// the map contributes a zero block of its declared size.
    pub(crate) fn flatten(&self, values: &VariableValues) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.total_dim);
        for (variable, _, len) in &self.entries {
            match values.get(variable) {
                Some(tensor) => {
                    debug_assert_eq!(tensor.len(), *len);
                    out.extend(tensor.iter().copied());
                }
                None => out.extend(std::iter::repeat(0.0).take(*len)),
            }
        }
        out
    }

    pub(crate) fn unflatten(&self, point: &[f64]) -> VariableValues {
        debug_assert_eq!(point.len(), self.total_dim);
        let mut offset = 0;
        let mut values = VariableValues::new();
        for (variable, shape, len) in &self.entries {
            let data = point[offset..offset + len].to_vec();
            let tensor = Array::from_shape_vec(IxDyn(shape), data)
                .expect("layout shape and length agree");
            values.insert(*variable, tensor);
            offset += len;
        }
        values
    }
}

pub(crate) type FitnessObserver = Box<dyn FnMut(&[f64], f64)>;
pub(crate) type GradientObserver = Box<dyn FnMut(&[f64], &[f64])>;

/// Adapts the model boundary to the external multivariate optimizer.
///
/// The optimizer minimizes, so both the fitness value and its gradient are
/// negated on the way out. Observer callbacks fire on every evaluation.
pub(crate) struct FitnessProblem<M> {
    pub(crate) model: Rc<RefCell<M>>,
    pub(crate) layout: LatentLayout,
    pub(crate) kind: FitnessKind,
    pub(crate) fitness_observers: Rc<RefCell<Vec<FitnessObserver>>>,
    pub(crate) gradient_observers: Rc<RefCell<Vec<GradientObserver>>>,
}

impl<M: ProbabilisticModel> CostFunction for FitnessProblem<M> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let assignment = self.layout.unflatten(param);
        let mut model = self.model.borrow_mut();
        let fitness = match self.kind {
            FitnessKind::MaxAPosteriori => model.log_prob(&assignment),
            FitnessKind::MaxLikelihood => model.log_likelihood(&assignment),
        }
        .map_err(Error::new)?;
        for observer in self.fitness_observers.borrow_mut().iter_mut() {
            observer(param, fitness);
        }
        Ok(-fitness)
    }
}

impl<M: ProbabilisticModelWithGradient> Gradient for FitnessProblem<M> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        let assignment = self.layout.unflatten(param);
        let mut model = self.model.borrow_mut();
        let (_, gradients) = match self.kind {
            FitnessKind::MaxAPosteriori => model.log_prob_gradient(&assignment),
            FitnessKind::MaxLikelihood => model.log_likelihood_gradient(&assignment),
        }
        .map_err(Error::new)?;
        let flat = self.layout.flatten(&gradients);
        for observer in self.gradient_observers.borrow_mut().iter_mut() {
            observer(param, &flat);
        }
        Ok(flat.iter().map(|g| -g).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GaussianSumModel;
    use ndarray::arr1;

    #[test]
    fn layout_round_trips_in_declared_order() {
        let model = GaussianSumModel::new(0., 0., 0.);
        let layout = LatentLayout::of_model(&model).unwrap();
        assert_eq!(layout.total_dim(), 2);
        let values = layout.unflatten(&[3.5, -1.25]);
        assert_eq!(values.get(&GaussianSumModel::A).unwrap(), &arr1(&[3.5]).into_dyn());
        assert_eq!(
            values.get(&GaussianSumModel::B).unwrap(),
            &arr1(&[-1.25]).into_dyn()
        );
        assert_eq!(layout.flatten(&values), vec![3.5, -1.25]);
    }

    #[test]
    fn missing_gradient_entries_flatten_to_zero() {
        let model = GaussianSumModel::new(0., 0., 0.);
        let layout = LatentLayout::of_model(&model).unwrap();
        let partial: VariableValues = [(GaussianSumModel::B, arr1(&[2.0]).into_dyn())]
            .into_iter()
            .collect();
        assert_eq!(layout.flatten(&partial), vec![0.0, 2.0]);
    }

    #[test]
    fn cost_is_negated_fitness_and_fires_observers() {
        let model = GaussianSumModel::new(5., 2., 7.5);
        let layout = LatentLayout::of_model(&model).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let problem = FitnessProblem {
            model: Rc::new(RefCell::new(model)),
            layout,
            kind: FitnessKind::MaxAPosteriori,
            fitness_observers: Rc::new(RefCell::new(vec![Box::new(move |_: &[f64], f: f64| {
                sink.borrow_mut().push(f)
            }) as FitnessObserver])),
            gradient_observers: Rc::new(RefCell::new(Vec::new())),
        };
        let cost = problem.cost(&vec![5.0, 2.0]).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(cost, -seen.borrow()[0]);
    }
}
