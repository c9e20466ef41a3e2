use ndarray::Zip;

use crate::variable::VariableValues;

/// Running per-element mean and sum of squared deviations (Welford).
#[derive(Debug, Clone)]
struct RunningMoments {
    mean: VariableValues,
    m2: VariableValues,
    count: u64,
}

impl RunningMoments {
    fn empty() -> Self {
        RunningMoments {
            mean: VariableValues::new(),
            m2: VariableValues::new(),
            count: 0,
        }
    }

    fn add(&mut self, sample: &VariableValues) {
        if self.count == 0 {
            self.mean = sample.clone();
            self.m2 = sample.zeros_like();
            self.count = 1;
            return;
        }
        self.count += 1;
        let count = self.count as f64;
        for (variable, value) in sample.iter() {
            let mean = self
                .mean
                .get_mut(variable)
                .expect("sample key set changed mid-run");
            let m2 = self.m2.get_mut(variable).expect("sample key set changed mid-run");
            Zip::from(mean).and(m2).and(value).for_each(|mean, m2, &x| {
                let delta = x - *mean;
                *mean += delta / count;
                *m2 += delta * (x - *mean);
            });
        }
    }

    fn variance(&self) -> Option<VariableValues> {
        if self.count < 2 {
            return None;
        }
        let denom = (self.count - 1) as f64;
        Some(self.m2.mapv(|m2| m2 / denom))
    }
}

/// Windowed variance estimator over variable maps.
///
/// Maintains running mean and sum of squared deviations over a window of
/// fixed size. When the window fills it is halved: the older half is
/// discarded and the newer half retained. Implemented as a pair of
/// accumulators, the background one seeded once the foreground passes half
/// the window, so no sample older than two window lengths ever influences
/// the current estimate.
#[derive(Debug, Clone)]
pub struct VarianceCalculator {
    window_size: u64,
    foreground: RunningMoments,
    background: RunningMoments,
}

impl VarianceCalculator {
    pub fn new(window_size: usize) -> Self {
        VarianceCalculator {
            window_size: window_size as u64,
            foreground: RunningMoments::empty(),
            background: RunningMoments::empty(),
        }
    }

    pub fn add_sample(&mut self, sample: &VariableValues) {
        self.foreground.add(sample);
        if 2 * self.foreground.count > self.window_size {
            self.background.add(sample);
        }
        if self.foreground.count >= self.window_size {
            self.foreground = std::mem::replace(&mut self.background, RunningMoments::empty());
        }
    }

    pub fn count(&self) -> u64 {
        self.foreground.count
    }

    /// Per-element sample variance, or `None` before two samples arrived.
    pub fn variance(&self) -> Option<VariableValues> {
        self.foreground.variance()
    }

    pub fn standard_deviation(&self) -> Option<VariableValues> {
        self.variance().map(|v| v.mapv(f64::sqrt))
    }
}
