//! End-to-end MAP/MLE optimization on `A ~ N(5,1)`, `B ~ N(2,1)`,
//! `C = A + B` observed at 7.5. The posterior mode is `A = 31/6`,
//! `B = 13/6`.

use approx::assert_abs_diff_eq;
use infera::testing::{CoinFlipModel, GaussianSumModel};
use infera::{
    GradientOptimizer, GradientOptimizerSettings, NonGradientOptimizer,
    NonGradientOptimizerSettings, Nuts, NutsSettings, ProbabilisticModel,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const MODE_A: f64 = 31. / 6.;
const MODE_B: f64 = 13. / 6.;

#[test]
fn gradient_optimizer_finds_the_map_estimate() {
    let model = GaussianSumModel::new(5., 2., 7.5);
    let mut optimizer =
        GradientOptimizer::new(model, GradientOptimizerSettings::default()).unwrap();
    let result = optimizer.max_a_posteriori().unwrap();
    assert_abs_diff_eq!(
        result.values.get(&GaussianSumModel::A).unwrap()[[0]],
        MODE_A,
        epsilon = 1e-4
    );
    assert_abs_diff_eq!(
        result.values.get(&GaussianSumModel::B).unwrap()[[0]],
        MODE_B,
        epsilon = 1e-4
    );
    assert!(result.fitness.is_finite());
    // the model is left cascaded to the optimum
    let model = optimizer.into_model();
    assert_abs_diff_eq!(
        model.latent_values().get(&GaussianSumModel::A).unwrap()[[0]],
        MODE_A,
        epsilon = 1e-4
    );
}

#[test]
fn gradient_and_derivative_free_optimizers_agree() -> anyhow::Result<()> {
    let gradient = {
        let model = GaussianSumModel::new(5., 2., 7.5);
        GradientOptimizer::new(model, GradientOptimizerSettings::default())?.max_a_posteriori()?
    };
    let simplex = {
        let model = GaussianSumModel::new(5., 2., 7.5);
        NonGradientOptimizer::new(model, NonGradientOptimizerSettings::default())?
            .max_a_posteriori()?
    };
    for variable in [GaussianSumModel::A, GaussianSumModel::B] {
        let a = gradient.values.get(&variable).unwrap()[[0]];
        let b = simplex.values.get(&variable).unwrap()[[0]];
        assert_abs_diff_eq!(a, b, epsilon = 0.05);
    }
    assert_abs_diff_eq!(gradient.fitness, simplex.fitness, epsilon = 1e-3);
    Ok(())
}

#[test]
fn max_likelihood_fits_the_observation_exactly() {
    let model = GaussianSumModel::new(5., 2., 7.5);
    let mut optimizer =
        GradientOptimizer::new(model, GradientOptimizerSettings::default()).unwrap();
    let result = optimizer.max_likelihood().unwrap();
    let a = result.values.get(&GaussianSumModel::A).unwrap()[[0]];
    let b = result.values.get(&GaussianSumModel::B).unwrap()[[0]];
    // the likelihood alone only constrains the sum
    assert_abs_diff_eq!(a + b, 7.5, epsilon = 1e-4);
}

#[test]
fn observers_see_every_evaluation() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let model = GaussianSumModel::new(5., 2., 7.5);
    let mut optimizer =
        GradientOptimizer::new(model, GradientOptimizerSettings::default()).unwrap();
    let fitness_calls = Rc::new(RefCell::new(0u64));
    let gradient_calls = Rc::new(RefCell::new(0u64));
    {
        let fitness_calls = fitness_calls.clone();
        optimizer.add_fitness_observer(move |point, fitness| {
            assert_eq!(point.len(), 2);
            assert!(fitness.is_finite());
            *fitness_calls.borrow_mut() += 1;
        });
    }
    {
        let gradient_calls = gradient_calls.clone();
        optimizer.add_gradient_observer(move |point, gradient| {
            assert_eq!(point.len(), gradient.len());
            *gradient_calls.borrow_mut() += 1;
        });
    }
    optimizer.max_a_posteriori().unwrap();
    assert!(*fitness_calls.borrow() > 0);
    assert!(*gradient_calls.borrow() > 0);
}

#[test]
fn gradient_methods_reject_discrete_latents() {
    assert!(GradientOptimizer::new(CoinFlipModel::new(), GradientOptimizerSettings::default())
        .is_err());
    assert!(Nuts::new(
        CoinFlipModel::new(),
        NutsSettings::default(),
        ChaCha8Rng::seed_from_u64(0)
    )
    .is_err());
    // the derivative-free optimizer does not care
    assert!(
        NonGradientOptimizer::new(CoinFlipModel::new(), NonGradientOptimizerSettings::default())
            .is_ok()
    );
}
