//! Running means of training losses

use crate::context::MetricsWriter;
use std::collections::BTreeMap;
use train_core::Step;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RunningMean {
    sum: f64,
    count: u64,
}

/// Per-name running means, weighted by the number of records they cover
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    values: BTreeMap<String, RunningMean>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value computed over `count` records
    pub fn add(&mut self, name: impl Into<String>, value: f64, count: u64) {
        let entry = self.values.entry(name.into()).or_default();
        entry.sum += value * count as f64;
        entry.count += count;
    }

    pub fn merge(&mut self, other: &Metrics) {
        for (name, mean) in &other.values {
            let entry = self.values.entry(name.clone()).or_default();
            entry.sum += mean.sum;
            entry.count += mean.count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .get(name)
            .filter(|mean| mean.count > 0)
            .map(|mean| mean.sum / mean.count as f64)
    }

    pub fn means(&self) -> BTreeMap<String, f64> {
        self.values
            .keys()
            .filter_map(|name| Some((name.clone(), self.get(name)?)))
            .collect()
    }

    /// Write every mean as a scalar under `prefix/`
    pub fn report(&self, writer: &dyn MetricsWriter, prefix: &str, step: Step) {
        for (name, value) in self.means() {
            writer.add_scalar(&format!("{}/{}", prefix, name), value, step);
        }
    }
}
