use crate::model::{ensure_positive_count, BuildError, Result};
use crate::samples::{NetworkSample, NetworkSamples};
use crate::variable::VariableReference;

/// One step-wise sampling algorithm, as consumed by the sample pipeline.
pub trait SamplingAlgorithm {
    /// Advance the chain by one step.
    fn step(&mut self) -> Result<()>;

    /// Snapshot of the current state. Does not advance the chain.
    fn sample(&self) -> NetworkSample;

    /// Collect `sample_count` posterior samples of the given variables,
    /// with no burn-in and no down-sampling.
    fn posterior_samples(
        &mut self,
        variables_to_record: &[VariableReference],
        sample_count: usize,
    ) -> Result<NetworkSamples>
    where
        Self: Sized,
    {
        NetworkSamplesGenerator::new(self, GeneratorSettings::default())
            .expect("default generator settings are valid")
            .record_variables(variables_to_record.to_vec())
            .generate(sample_count)
    }
}

impl<S: SamplingAlgorithm + ?Sized> SamplingAlgorithm for &mut S {
    fn step(&mut self) -> Result<()> {
        (**self).step()
    }

    fn sample(&self) -> NetworkSample {
        (**self).sample()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneratorSettings {
    /// Number of leading steps whose states are discarded (burn-in).
    pub drop_count: usize,
    /// Collect every n-th state after the burn-in.
    pub down_sample_interval: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            drop_count: 0,
            down_sample_interval: 1,
        }
    }
}

/// Turns a step-wise sampling algorithm into a bounded or streaming
/// sequence of collected samples.
pub struct NetworkSamplesGenerator<S> {
    algorithm: S,
    settings: GeneratorSettings,
    variables_to_record: Option<Vec<VariableReference>>,
}

impl<S: SamplingAlgorithm> NetworkSamplesGenerator<S> {
    pub fn new(algorithm: S, settings: GeneratorSettings) -> std::result::Result<Self, BuildError> {
        ensure_positive_count("down_sample_interval", settings.down_sample_interval)?;
        Ok(NetworkSamplesGenerator {
            algorithm,
            settings,
            variables_to_record: None,
        })
    }

    /// Restrict collected snapshots to the given variables.
    pub fn record_variables(mut self, variables: Vec<VariableReference>) -> Self {
        self.variables_to_record = Some(variables);
        self
    }

    fn collect_at(&self, index: usize) -> bool {
        index >= self.settings.drop_count
            && (index - self.settings.drop_count) % self.settings.down_sample_interval == 0
    }

    fn snapshot(&self) -> NetworkSample {
        let sample = self.algorithm.sample();
        match &self.variables_to_record {
            Some(variables) => NetworkSample {
                values: sample.values.select(variables),
                log_prob: sample.log_prob,
            },
            None => sample,
        }
    }

    /// Run exactly `total` steps, collecting
    /// `ceil((total - drop_count) / down_sample_interval)` samples.
    pub fn generate(&mut self, total: usize) -> Result<NetworkSamples> {
        let mut collected = Vec::new();
        for index in 0..total {
            self.algorithm.step()?;
            if self.collect_at(index) {
                collected.push(self.snapshot());
            }
        }
        Ok(NetworkSamples::new(collected))
    }

    /// A lazy, potentially infinite sample sequence with the same
    /// drop/down-sample semantics. The stream can only be restarted by
    /// constructing a new generator.
    pub fn stream(self) -> SampleStream<S> {
        SampleStream {
            generator: self,
            index: 0,
            failed: false,
        }
    }
}

pub struct SampleStream<S> {
    generator: NetworkSamplesGenerator<S>,
    index: usize,
    failed: bool,
}

impl<S: SamplingAlgorithm> Iterator for SampleStream<S> {
    type Item = Result<NetworkSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let index = self.index;
            self.index += 1;
            if let Err(err) = self.generator.algorithm.step() {
                self.failed = true;
                return Some(Err(err));
            }
            if self.generator.collect_at(index) {
                return Some(Ok(self.generator.snapshot()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableValues;
    use ndarray::arr1;

    /// Counts steps; its "state" is the number of steps taken so far.
    struct CountingAlgorithm {
        steps: usize,
    }

    impl SamplingAlgorithm for CountingAlgorithm {
        fn step(&mut self) -> Result<()> {
            self.steps += 1;
            Ok(())
        }

        fn sample(&self) -> NetworkSample {
            let values: VariableValues = [(
                VariableReference::new(0),
                arr1(&[self.steps as f64]).into_dyn(),
            )]
            .into_iter()
            .collect();
            NetworkSample {
                values,
                log_prob: 0.0,
            }
        }
    }

    #[test]
    fn generate_steps_and_collects_exactly() {
        let settings = GeneratorSettings {
            drop_count: 3,
            down_sample_interval: 2,
        };
        let mut generator =
            NetworkSamplesGenerator::new(CountingAlgorithm { steps: 0 }, settings).unwrap();
        let samples = generator.generate(12).unwrap();
        assert_eq!(generator.algorithm.steps, 12);
        assert_eq!(samples.len(), 5);
        // collected after steps 4, 6, 8, 10, 12
        let collected = samples.scalars_for(&VariableReference::new(0));
        assert_eq!(collected, vec![4., 6., 8., 10., 12.]);
    }

    #[test]
    fn stream_matches_bounded_generation() {
        let settings = GeneratorSettings {
            drop_count: 3,
            down_sample_interval: 2,
        };
        let generator =
            NetworkSamplesGenerator::new(CountingAlgorithm { steps: 0 }, settings).unwrap();
        let collected: Vec<f64> = generator
            .stream()
            .take(5)
            .map(|s| s.unwrap().scalar(&VariableReference::new(0)).unwrap())
            .collect();
        assert_eq!(collected, vec![4., 6., 8., 10., 12.]);
    }

    #[test]
    fn rejects_zero_interval() {
        let settings = GeneratorSettings {
            drop_count: 0,
            down_sample_interval: 0,
        };
        assert!(NetworkSamplesGenerator::new(CountingAlgorithm { steps: 0 }, settings).is_err());
    }
}
