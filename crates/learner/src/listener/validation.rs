use super::{listener_key, Listener, ListenerDecision, ListenerOutputs};
use crate::context::ListenerContext;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use storage::StorageBackend;
use tracing::{debug, info, instrument, warn};
use train_core::config::ValidationConfig;
use train_core::{
    AdhocDataset, Epoch, Error, Evaluator, ListenerId, MetricName, Result, Retriever, TrainState,
};

/// Best value of a metric and the epoch that reached it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BestRecord {
    pub value: f64,
    pub epoch: Epoch,
}

/// Periodic validation with best-checkpoint tracking and early stopping
///
/// The best-table is stored in `listeners/<id>/info.json`; the best model for
/// each kept metric in `listeners/<id>/best/<metric>/`.
pub struct ValidationListener {
    id: ListenerId,
    config: ValidationConfig,
    dataset: AdhocDataset,
    retriever: Arc<dyn Retriever>,
    evaluator: Arc<dyn Evaluator>,
    top: BTreeMap<MetricName, BestRecord>,
}

impl ValidationListener {
    /// # Errors
    /// `InvalidConfig` if `early_stop` is not a multiple of
    /// `validation_interval`
    pub fn new(
        id: impl Into<ListenerId>,
        config: ValidationConfig,
        dataset: AdhocDataset,
        retriever: Arc<dyn Retriever>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: id.into(),
            config,
            dataset,
            retriever,
            evaluator,
            top: BTreeMap::new(),
        })
    }

    fn info_key(&self) -> String {
        format!("{}/info.json", listener_key(&self.id))
    }

    /// Storage key of the best model for `metric`
    pub fn best_key(&self, metric: &str) -> String {
        format!("{}/best/{}", listener_key(&self.id), metric)
    }

    pub fn last_checkpoint_key(&self) -> String {
        format!("{}/last_checkpoint", listener_key(&self.id))
    }

    pub fn best(&self, metric: &str) -> Option<BestRecord> {
        self.top.get(metric).copied()
    }

    /// Early-stop vote at `epoch`, against the recorded bests
    ///
    /// Stops once `early_stop` epochs have passed since the most recent
    /// improvement of any monitored metric.
    pub fn should_stop(&self, epoch: Epoch) -> ListenerDecision {
        if self.config.early_stop == 0 {
            return ListenerDecision::DontStop;
        }

        let last_improvement = self
            .top
            .iter()
            .filter(|(metric, _)| self.config.metrics.contains_key(*metric))
            .map(|(_, best)| best.epoch)
            .max();

        match last_improvement {
            Some(best_epoch) if epoch.saturating_sub(best_epoch) >= self.config.early_stop => {
                info!(
                    epoch,
                    best_epoch,
                    early_stop = self.config.early_stop,
                    "No improvement, stopping"
                );
                ListenerDecision::Stop
            }
            _ => ListenerDecision::DontStop,
        }
    }

    async fn load_top(&mut self, storage: &dyn StorageBackend) {
        let key = self.info_key();
        self.top = match storage.read(&key).await {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(top) => top,
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring unreadable validation state");
                    BTreeMap::new()
                }
            },
            Err(Error::StoragePathNotFound { .. }) => BTreeMap::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable validation state");
                BTreeMap::new()
            }
        };
        debug!(listener = %self.id, metrics = self.top.len(), "Loaded best values");
    }

    #[instrument(skip(self, state, context), fields(listener = %self.id, epoch = state.epoch))]
    async fn validate(&mut self, state: &TrainState, context: &mut ListenerContext<'_>) -> Result<()> {
        let metric_names: Vec<MetricName> = self.config.metrics.keys().cloned().collect();
        let evaluation = self
            .evaluator
            .evaluate(self.retriever.as_ref(), &self.dataset, &metric_names)
            .await?;

        let warm = self.config.warmup.map_or(true, |warmup| state.epoch >= warmup);
        for (metric, &keep) in &self.config.metrics {
            let value = *evaluation
                .means
                .get(metric)
                .ok_or_else(|| Error::Evaluation {
                    message: format!("evaluator returned no value for {}", metric),
                })?;

            context
                .writer
                .add_scalar(&format!("{}/{}/mean", self.id, metric), value, state.step);
            if let Some(per_query) = evaluation.per_query.get(metric) {
                let values: Vec<f64> = per_query.values().copied().collect();
                context
                    .writer
                    .add_histogram(&format!("{}/{}", self.id, metric), &values, state.step);
            }

            if !warm {
                continue;
            }
            let improved = self.top.get(metric).map_or(true, |best| value > best.value);
            if improved {
                self.top.insert(
                    metric.clone(),
                    BestRecord {
                        value,
                        epoch: state.epoch,
                    },
                );
                if keep {
                    info!(metric = %metric, value, "Saving the checkpoint {}", state.epoch);
                    context
                        .storage
                        .copy_prefix(&state.model_path(), &self.best_key(metric))
                        .await?;
                }
            }
        }

        if self.config.store_last_checkpoint {
            info!("Saving the last checkpoint {}", state.epoch);
            context
                .storage
                .copy_prefix(&state.model_path(), &self.last_checkpoint_key())
                .await?;
        }

        let info = serde_json::to_vec(&self.top)?;
        context
            .storage
            .write(&self.info_key(), Bytes::from(info))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Listener for ValidationListener {
    fn id(&self) -> &ListenerId {
        &self.id
    }

    async fn initialize(&mut self, context: &mut ListenerContext<'_>) -> Result<()> {
        self.retriever.initialize().await?;
        self.load_top(context.storage.as_ref()).await;
        Ok(())
    }

    async fn on_epoch_end(
        &mut self,
        state: &TrainState,
        context: &mut ListenerContext<'_>,
    ) -> Result<ListenerDecision> {
        // Already over the limit, e.g. when resuming a stopped run
        if self.should_stop(state.epoch.saturating_sub(1)).is_stop() {
            return Ok(ListenerDecision::Stop);
        }

        if state.epoch % self.config.validation_interval == 0 {
            self.validate(state, context).await?;
        }

        Ok(self.should_stop(state.epoch))
    }

    fn update_metrics(&self, metrics: &mut BTreeMap<MetricName, f64>) {
        for metric in self.config.metrics.keys() {
            if let Some(best) = self.top.get(metric) {
                metrics.insert(format!("{}/final/{}", self.id, metric), best.value);
            }
        }
    }

    fn outputs(&self) -> ListenerOutputs {
        let mut outputs: ListenerOutputs = self
            .config
            .metrics
            .iter()
            .filter(|(_, &keep)| keep)
            .map(|(metric, _)| (metric.clone(), self.best_key(metric)))
            .collect();
        if self.config.store_last_checkpoint {
            outputs.insert("last_checkpoint".to_string(), self.last_checkpoint_key());
        }
        outputs
    }
}
