//! Learner - resumable epoch loop for ranking models
//!
//! A [`Learner`] drives a [`Trainer`] (which owns a sampler and computes the
//! loss over an external [`train_core::Scorer`]) and calls its listeners at
//! the end of each epoch:
//!
//! - [`ValidationListener`] tracks the best value of each metric, keeps the
//!   matching model snapshots and votes for early stopping
//! - [`NegativeSamplerListener`] switches to and refreshes hard negatives
//! - [`IndexRebuildListener`] rebuilds the retrieval index
//!
//! Every epoch is checkpointed; a learner built over the same run directory
//! resumes from the last committed epoch.

pub mod context;
pub mod learner;
pub mod listener;
pub mod losses;
pub mod metrics;
pub mod trainer;

pub use context::{
    ListenerContext, MemoryMetricsWriter, MetricEvent, MetricsWriter, TracingMetricsWriter,
};
pub use learner::{
    Completion, Learner, LearnerBuilder, LearnerPhase, LearnerReport, MetricsRecord, METRICS_KEY,
};
pub use listener::{
    listener_key, BestRecord, IndexRebuildListener, Listener, ListenerDecision, ListenerOutputs,
    ListenerPhase, NegativeSamplerListener, ValidationListener,
};
pub use losses::{BatchwiseLoss, DistillationPairwiseLoss, LossOutput, PairwiseLoss, PointwiseLoss};
pub use metrics::Metrics;
pub use trainer::{
    BatchPosition, BatchwiseTrainer, DistillationPairwiseTrainer, PairwiseTrainer,
    PointwiseTrainer, Trainer,
};
