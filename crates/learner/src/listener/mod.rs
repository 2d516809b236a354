//! Per-epoch hooks of the learner
//!
//! Listeners run in registration order after every epoch. Each returns a
//! [`ListenerDecision`]; the learner stops as soon as one of them says
//! [`ListenerDecision::Stop`].

mod index_rebuild;
mod negative_sampler;
mod validation;

pub use index_rebuild::IndexRebuildListener;
pub use negative_sampler::NegativeSamplerListener;
pub use validation::{BestRecord, ValidationListener};

use crate::context::ListenerContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use train_core::{ListenerId, MetricName, Result, TrainState};

/// Vote of a listener at the end of an epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListenerDecision {
    /// Training should stop
    Stop,

    /// Training may go on
    DontStop,

    /// The listener has no opinion
    NoDecision,
}

impl ListenerDecision {
    /// Stop if any of the decisions says so; abstentions never override
    pub fn aggregate(decisions: impl IntoIterator<Item = ListenerDecision>) -> ListenerDecision {
        let mut result = ListenerDecision::NoDecision;
        for decision in decisions {
            match decision {
                ListenerDecision::Stop => return ListenerDecision::Stop,
                ListenerDecision::DontStop => result = ListenerDecision::DontStop,
                ListenerDecision::NoDecision => {}
            }
        }
        result
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, ListenerDecision::Stop)
    }
}

/// Lifecycle of a registered listener
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListenerPhase {
    /// Registered, `initialize` not called yet
    Uninitialized,

    /// Ready to be called at the end of an epoch
    Ready,

    /// Voted to stop training
    Stopped,
}

/// A named output of a listener: where a model snapshot was stored
pub type ListenerOutputs = BTreeMap<String, String>;

#[async_trait]
pub trait Listener: Send {
    /// Unique id, also the name of the listener's storage directory
    fn id(&self) -> &ListenerId;

    /// Called once before the first epoch (and again after a restart);
    /// restores whatever state the listener persisted
    async fn initialize(&mut self, context: &mut ListenerContext<'_>) -> Result<()>;

    /// Called once at the end of every epoch
    async fn on_epoch_end(
        &mut self,
        state: &TrainState,
        context: &mut ListenerContext<'_>,
    ) -> Result<ListenerDecision>;

    /// Contribute final values to the learner metrics
    fn update_metrics(&self, _metrics: &mut BTreeMap<MetricName, f64>) {}

    /// Named storage keys produced by this listener
    fn outputs(&self) -> ListenerOutputs {
        ListenerOutputs::new()
    }
}

/// Storage key of a listener's own directory
pub fn listener_key(id: &str) -> String {
    format!("listeners/{}", id)
}
