//! End-to-end posterior recovery on a conjugate Gaussian model:
//! `A, B ~ N(0, 1)`, `C = A + B` observed at 0. The posterior for each
//! latent is Gaussian with mean 0 and standard deviation `sqrt(2/3)`.

use approx::assert_abs_diff_eq;
use infera::testing::GaussianSumModel;
use infera::{
    GeneratorSettings, Hamiltonian, HamiltonianSettings, MetropolisHastings,
    MetropolisHastingsSettings, NetworkSamples, NetworkSamplesGenerator, Nuts, NutsSettings,
    PriorProposal, SamplingAlgorithm, StepSizeSettings, metric,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn check_posterior(samples: &NetworkSamples, tolerance: f64) {
    let model = GaussianSumModel::new(0., 0., 0.);
    for variable in [GaussianSumModel::A, GaussianSumModel::B] {
        let mean = samples.mean(&variable).unwrap()[[0]];
        let std = samples.std(&variable).unwrap()[[0]];
        assert_abs_diff_eq!(mean, model.posterior_mean_a(), epsilon = tolerance);
        assert_abs_diff_eq!(std, model.posterior_std(), epsilon = tolerance);
    }
}

fn burn_in(drop_count: usize) -> GeneratorSettings {
    GeneratorSettings {
        drop_count,
        down_sample_interval: 1,
    }
}

#[test]
fn nuts_recovers_gaussian_posterior() {
    let model = GaussianSumModel::new(0., 0., 0.);
    let settings = NutsSettings {
        record_statistics: true,
        ..Default::default()
    };
    let mut nuts = Nuts::new(model, settings, ChaCha8Rng::seed_from_u64(42)).unwrap();
    let samples = NetworkSamplesGenerator::new(&mut nuts, burn_in(1000))
        .unwrap()
        .generate(3500)
        .unwrap();
    assert_eq!(samples.len(), 2500);
    check_posterior(&samples, 0.1);

    let stats = nuts.statistics();
    assert_eq!(stats.get(metric::STEP_SIZE).unwrap().len(), 3500);
    assert!(stats.get(metric::TREE_SIZE).unwrap().iter().all(|&s| s >= 1.));
    let accepts = stats.get(metric::MEAN_TREE_ACCEPT).unwrap();
    let late_mean: f64 = accepts[1000..].iter().sum::<f64>() / (accepts.len() - 1000) as f64;
    // dual averaging should have steered acceptance toward the target
    assert!(late_mean > 0.4, "mean tree acceptance was {late_mean}");
}

#[test]
fn nuts_is_deterministic_given_a_seed() {
    let run = || {
        let model = GaussianSumModel::new(0., 0., 0.);
        let mut nuts = Nuts::new(
            model,
            NutsSettings::default(),
            ChaCha8Rng::seed_from_u64(7),
        )
        .unwrap();
        nuts.posterior_samples(&[GaussianSumModel::A], 50)
            .unwrap()
            .scalars_for(&GaussianSumModel::A)
    };
    assert_eq!(run(), run());
}

#[test]
fn hmc_recovers_gaussian_posterior() {
    let model = GaussianSumModel::new(0., 0., 0.);
    let settings = HamiltonianSettings {
        leapfrog_steps: 20,
        step_size: Some(0.2),
        ..Default::default()
    };
    let mut hmc = Hamiltonian::new(model, settings, ChaCha8Rng::seed_from_u64(31)).unwrap();
    let samples = NetworkSamplesGenerator::new(&mut hmc, burn_in(1000))
        .unwrap()
        .generate(5000)
        .unwrap();
    assert_eq!(samples.len(), 4000);
    check_posterior(&samples, 0.1);
}

#[test]
fn metropolis_hastings_recovers_gaussian_posterior() {
    let model = GaussianSumModel::new(0., 0., 0.);
    let mut mh = MetropolisHastings::new(
        model,
        PriorProposal,
        MetropolisHastingsSettings::default(),
        ChaCha8Rng::seed_from_u64(23),
    )
    .unwrap();
    let samples = NetworkSamplesGenerator::new(&mut mh, burn_in(1000))
        .unwrap()
        .generate(21_000)
        .unwrap();
    check_posterior(&samples, 0.1);
}

#[test]
fn metropolis_hastings_with_rejection_cache_matches() {
    let model = GaussianSumModel::new(0., 0., 0.);
    let settings = MetropolisHastingsSettings {
        use_cache_on_rejection: true,
    };
    let mut mh = MetropolisHastings::new(
        model,
        PriorProposal,
        settings,
        ChaCha8Rng::seed_from_u64(23),
    )
    .unwrap();
    let samples = NetworkSamplesGenerator::new(&mut mh, burn_in(1000))
        .unwrap()
        .generate(21_000)
        .unwrap();
    check_posterior(&samples, 0.1);
}

#[test]
fn stream_yields_the_same_chain_as_generate() {
    let make = || {
        let model = GaussianSumModel::new(0., 0., 0.);
        Nuts::new(
            model,
            NutsSettings::default(),
            ChaCha8Rng::seed_from_u64(99),
        )
        .unwrap()
    };
    let settings = GeneratorSettings {
        drop_count: 5,
        down_sample_interval: 3,
    };
    let bounded: Vec<f64> = NetworkSamplesGenerator::new(make(), settings)
        .unwrap()
        .generate(35)
        .unwrap()
        .scalars_for(&GaussianSumModel::A);
    let streamed: Vec<f64> = NetworkSamplesGenerator::new(make(), settings)
        .unwrap()
        .stream()
        .take(bounded.len())
        .map(|s| s.unwrap().scalar(&GaussianSumModel::A).unwrap())
        .collect();
    assert_eq!(bounded, streamed);
}

#[test]
fn zero_adapt_count_disables_step_size_adaptation() {
    let model = GaussianSumModel::new(0., 0., 0.);
    let settings = NutsSettings {
        initial_step_size: Some(0.3),
        step_size: StepSizeSettings {
            adapt_count: 0,
            ..Default::default()
        },
        record_statistics: true,
        ..Default::default()
    };
    let mut nuts = Nuts::new(model, settings, ChaCha8Rng::seed_from_u64(3)).unwrap();
    nuts.posterior_samples(&[GaussianSumModel::A], 100).unwrap();
    let steps = nuts.statistics().get(metric::STEP_SIZE).unwrap();
    assert!(steps.iter().all(|&s| s == 0.3));
}
