use std::collections::BTreeMap;

use ndarray::Zip;

use crate::variable::{Tensor, VariableReference, VariableValues};

/// An immutable snapshot of variable values at one accepted step.
#[derive(Debug, Clone)]
pub struct NetworkSample {
    pub values: VariableValues,
    pub log_prob: f64,
}

impl NetworkSample {
    pub fn get(&self, variable: &VariableReference) -> Option<&Tensor> {
        self.values.get(variable)
    }

    /// The value of a single-element variable as a scalar.
    pub fn scalar(&self, variable: &VariableReference) -> Option<f64> {
        self.get(variable).and_then(|t| {
            debug_assert_eq!(t.len(), 1);
            t.iter().next().copied()
        })
    }
}

/// An ordered, possibly filtered sequence of snapshots.
#[derive(Debug, Clone, Default)]
pub struct NetworkSamples {
    samples: Vec<NetworkSample>,
}

impl NetworkSamples {
    pub(crate) fn new(samples: Vec<NetworkSample>) -> Self {
        NetworkSamples { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkSample> {
        self.samples.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NetworkSample> {
        self.samples.get(index)
    }

    /// All recorded values of one variable, in sample order.
    pub fn values_for(&self, variable: &VariableReference) -> Vec<&Tensor> {
        self.samples
            .iter()
            .filter_map(|s| s.get(variable))
            .collect()
    }

    /// All recorded values of a single-element variable as scalars.
    pub fn scalars_for(&self, variable: &VariableReference) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.scalar(variable))
            .collect()
    }

    /// Elementwise mean over all samples of one variable.
    pub fn mean(&self, variable: &VariableReference) -> Option<Tensor> {
        let values = self.values_for(variable);
        let first = values.first()?;
        let mut out = Tensor::zeros(first.raw_dim());
        for value in &values {
            out += *value;
        }
        out /= values.len() as f64;
        Some(out)
    }

    /// Elementwise sample standard deviation over all samples of one variable.
    pub fn std(&self, variable: &VariableReference) -> Option<Tensor> {
        let values = self.values_for(variable);
        if values.len() < 2 {
            return None;
        }
        let mean = self.mean(variable)?;
        let mut m2 = Tensor::zeros(mean.raw_dim());
        for value in &values {
            Zip::from(&mut m2).and(*value).and(&mean).for_each(|m2, &x, &mu| {
                let d = x - mu;
                *m2 += d * d;
            });
        }
        let denom = (values.len() - 1) as f64;
        Some(m2.mapv(|x| (x / denom).sqrt()))
    }
}

/// Metric keys recorded by the samplers when diagnostics are enabled.
pub mod metric {
    pub const STEP_SIZE: &str = "step_size";
    pub const LOG_PROB: &str = "log_prob";
    pub const MEAN_TREE_ACCEPT: &str = "mean_tree_accept";
    pub const TREE_SIZE: &str = "tree_size";
}

/// Named per-iteration diagnostics: append-only during a run, read-only
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    metrics: BTreeMap<&'static str, Vec<f64>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, key: &'static str, value: f64) {
        self.metrics.entry(key).or_default().push(value);
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.metrics.get(key).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn sample(a: f64, b: f64) -> NetworkSample {
        NetworkSample {
            values: [(VariableReference::new(0), arr1(&[a, b]).into_dyn())]
                .into_iter()
                .collect(),
            log_prob: 0.0,
        }
    }

    #[test]
    fn mean_and_std_are_elementwise() {
        let samples = NetworkSamples::new(vec![sample(1., 10.), sample(3., 30.)]);
        let v = VariableReference::new(0);
        let mean = samples.mean(&v).unwrap();
        assert_eq!(mean, arr1(&[2., 20.]).into_dyn());
        let std = samples.std(&v).unwrap();
        let expected = arr1(&[2f64.sqrt(), 200f64.sqrt()]).into_dyn();
        assert!((std[[0]] - expected[[0]]).abs() < 1e-12);
        assert!((std[[1]] - expected[[1]]).abs() < 1e-12);
    }

    #[test]
    fn statistics_keep_insertion_order_per_metric() {
        let mut stats = Statistics::new();
        stats.append(metric::STEP_SIZE, 0.1);
        stats.append(metric::STEP_SIZE, 0.2);
        assert_eq!(stats.get(metric::STEP_SIZE), Some(&[0.1, 0.2][..]));
        assert_eq!(stats.get(metric::LOG_PROB), None);
    }
}
