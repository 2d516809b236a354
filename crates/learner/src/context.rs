//! Telemetry writers and the context handed to listeners

use crate::trainer::Trainer;
use parking_lot::Mutex;
use std::sync::Arc;
use storage::LocalStorage;
use train_core::Step;

/// Sink for scalar and distribution telemetry
pub trait MetricsWriter: Send + Sync {
    fn add_scalar(&self, tag: &str, value: f64, step: Step);

    fn add_histogram(&self, tag: &str, values: &[f64], step: Step);
}

/// Emits telemetry as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsWriter;

impl MetricsWriter for TracingMetricsWriter {
    fn add_scalar(&self, tag: &str, value: f64, step: Step) {
        tracing::info!(tag, value, step, "scalar");
    }

    fn add_histogram(&self, tag: &str, values: &[f64], step: Step) {
        let (min, max, mean) = summary(values);
        tracing::info!(tag, count = values.len(), min, max, mean, step, "histogram");
    }
}

fn summary(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (min, max, mean)
}

/// A telemetry event kept by [`MemoryMetricsWriter`]
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Scalar {
        tag: String,
        value: f64,
        step: Step,
    },
    Histogram {
        tag: String,
        values: Vec<f64>,
        step: Step,
    },
}

/// Keeps telemetry in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricsWriter {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl MemoryMetricsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Scalar values recorded under `tag`, in order
    pub fn scalars(&self, tag: &str) -> Vec<(Step, f64)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MetricEvent::Scalar {
                    tag: t,
                    value,
                    step,
                } if t == tag => Some((*step, *value)),
                _ => None,
            })
            .collect()
    }
}

impl MetricsWriter for MemoryMetricsWriter {
    fn add_scalar(&self, tag: &str, value: f64, step: Step) {
        self.events.lock().push(MetricEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
        });
    }

    fn add_histogram(&self, tag: &str, values: &[f64], step: Step) {
        self.events.lock().push(MetricEvent::Histogram {
            tag: tag.to_string(),
            values: values.to_vec(),
            step,
        });
    }
}

/// What a listener can reach while it runs
pub struct ListenerContext<'a> {
    /// The run directory
    pub storage: &'a Arc<LocalStorage>,

    pub writer: &'a dyn MetricsWriter,

    /// The trainer, e.g. to switch or refresh its sampler
    pub trainer: &'a mut dyn Trainer,
}
