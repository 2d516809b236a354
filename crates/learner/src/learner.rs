//! The epoch loop
//!
//! Each epoch draws `steps_per_epoch` batches through the trainer, snapshots
//! the model, runs the listeners in registration order, writes the metrics and
//! commits the epoch checkpoint. A restarted learner resumes from the newest
//! committed checkpoint as if it had never been interrupted.

use crate::context::{ListenerContext, MetricsWriter, TracingMetricsWriter};
use crate::listener::{Listener, ListenerDecision, ListenerOutputs, ListenerPhase};
use crate::metrics::Metrics;
use crate::trainer::{BatchPosition, Trainer};
use bytes::Bytes;
use checkpoint::{epoch_key, CheckpointManager, CheckpointManagerHandle};
use chrono::Utc;
use sampling::RandomStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use storage::{LocalStorage, StorageBackend};
use tracing::{debug, info, instrument};
use train_core::config::LearnerConfig;
use train_core::{Epoch, Error, MetricName, Result, Scorer, Step, TrainerCheckpoint};

/// Storage key of the learner metrics
pub const METRICS_KEY: &str = "metrics.json";

/// Lifecycle of a learner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LearnerPhase {
    Init,
    Running,

    /// A listener voted to stop
    Stopping,

    /// `max_epochs` reached
    Exhausted,
    Done,
}

/// How a run ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Completion {
    Stopped,
    Exhausted,
}

/// Outcome of [`Learner::run`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearnerReport {
    pub completion: Completion,
    pub epoch: Epoch,
    pub step: Step,

    /// Named outputs of every listener, keyed `<listener id>/<name>`
    pub outputs: ListenerOutputs,

    /// Last written learner metrics
    pub metrics: BTreeMap<MetricName, f64>,
}

/// Content of `metrics.json`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub epoch: Epoch,
    pub step: Step,
    pub metrics: BTreeMap<MetricName, f64>,
}

struct ListenerSlot {
    listener: Box<dyn Listener>,
    phase: ListenerPhase,
}

/// Drives a trainer and its listeners over epochs
pub struct Learner {
    config: LearnerConfig,
    storage: Arc<LocalStorage>,
    checkpoints: CheckpointManagerHandle,
    trainer: Box<dyn Trainer>,
    scorer: Box<dyn Scorer>,
    listeners: Vec<ListenerSlot>,
    writer: Arc<dyn MetricsWriter>,
    phase: LearnerPhase,
    epoch: Epoch,
    step: Step,
    metrics: BTreeMap<MetricName, f64>,
}

impl Learner {
    pub fn builder(trainer: Box<dyn Trainer>, scorer: Box<dyn Scorer>) -> LearnerBuilder {
        LearnerBuilder::new(trainer, scorer)
    }

    pub fn phase(&self) -> LearnerPhase {
        self.phase
    }

    /// Last completed epoch
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.storage
    }

    pub fn checkpoints(&self) -> CheckpointManagerHandle {
        Arc::clone(&self.checkpoints)
    }

    /// Phase of the listener registered under `id`
    pub fn listener_phase(&self, id: &str) -> Option<ListenerPhase> {
        self.listeners
            .iter()
            .find(|slot| slot.listener.id() == id)
            .map(|slot| slot.phase)
    }

    /// Train until a listener votes to stop or `max_epochs` is reached
    ///
    /// # Errors
    /// Every error is fatal and ends the run; the epoch in progress is not
    /// committed, so a new run resumes from the previous epoch.
    #[instrument(skip(self), fields(max_epochs = self.config.max_epochs))]
    pub async fn run(&mut self) -> Result<LearnerReport> {
        if self.phase != LearnerPhase::Init {
            return Err(Error::UnsupportedOperation {
                operation: "running a learner twice".to_string(),
            });
        }

        self.trainer
            .initialize(RandomStream::from_seed(self.config.seed))
            .await?;
        self.recover().await?;
        self.initialize_listeners().await?;

        self.phase = LearnerPhase::Running;
        while self.epoch < self.config.max_epochs {
            let decision = self.run_epoch().await?;
            if decision.is_stop() {
                info!(epoch = self.epoch, "Stopping on listener request");
                self.phase = LearnerPhase::Stopping;
                break;
            }
        }

        let completion = if self.phase == LearnerPhase::Stopping {
            Completion::Stopped
        } else {
            info!(epoch = self.epoch, "Reached the maximum number of epochs");
            self.phase = LearnerPhase::Exhausted;
            Completion::Exhausted
        };

        let report = LearnerReport {
            completion,
            epoch: self.epoch,
            step: self.step,
            outputs: self.outputs(),
            metrics: self.metrics.clone(),
        };
        self.phase = LearnerPhase::Done;
        Ok(report)
    }

    /// Restore trainer, model and counters from the newest committed epoch
    async fn recover(&mut self) -> Result<()> {
        let Some(checkpoint) = self.checkpoints.find_recovery_checkpoint().await else {
            return Ok(());
        };

        self.trainer.restore(&checkpoint.sampler)?;
        let model_dir = self
            .storage
            .resolve(&format!("{}/model", epoch_key(checkpoint.epoch)));
        self.scorer.load(&model_dir).await?;

        self.epoch = checkpoint.epoch;
        self.step = checkpoint.step;
        info!(epoch = self.epoch, step = self.step, "Resuming training");
        Ok(())
    }

    async fn initialize_listeners(&mut self) -> Result<()> {
        for slot in &mut self.listeners {
            let mut context = ListenerContext {
                storage: &self.storage,
                writer: self.writer.as_ref(),
                trainer: self.trainer.as_mut(),
            };
            slot.listener.initialize(&mut context).await?;
            slot.phase = ListenerPhase::Ready;
            debug!(listener = %slot.listener.id(), "Listener ready");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(epoch = self.epoch + 1))]
    async fn run_epoch(&mut self) -> Result<ListenerDecision> {
        let epoch = self.epoch + 1;

        let mut losses = Metrics::new();
        for batch in 1..=self.config.steps_per_epoch {
            let at = BatchPosition {
                epoch,
                step: self.step + 1,
                batch,
            };
            let metrics = self.trainer.train_batch(self.scorer.as_mut(), at).await?;
            losses.merge(&metrics);
            self.step += 1;
        }
        losses.report(self.writer.as_ref(), "train", self.step);

        // The model snapshot must exist before listeners look at it
        let (state, model_dir) = self.checkpoints.prepare_epoch(epoch, self.step).await?;
        self.scorer.save(&model_dir).await?;

        let mut decisions = Vec::with_capacity(self.listeners.len());
        for slot in &mut self.listeners {
            let mut context = ListenerContext {
                storage: &self.storage,
                writer: self.writer.as_ref(),
                trainer: self.trainer.as_mut(),
            };
            let decision = slot.listener.on_epoch_end(&state, &mut context).await?;
            if decision.is_stop() {
                slot.phase = ListenerPhase::Stopped;
            }
            decisions.push(decision);
        }

        for (name, value) in losses.means() {
            self.metrics.insert(format!("train/{}", name), value);
        }
        for slot in &self.listeners {
            slot.listener.update_metrics(&mut self.metrics);
        }
        self.write_metrics(epoch).await?;

        // Committed last, so that sampler switches made by listeners are kept
        self.checkpoints
            .commit(&TrainerCheckpoint {
                epoch,
                step: self.step,
                created_at: Utc::now(),
                sampler: self.trainer.state()?,
            })
            .await?;
        self.epoch = epoch;

        Ok(ListenerDecision::aggregate(decisions))
    }

    async fn write_metrics(&self, epoch: Epoch) -> Result<()> {
        let record = MetricsRecord {
            epoch,
            step: self.step,
            metrics: self.metrics.clone(),
        };
        let data = serde_json::to_vec_pretty(&record)?;
        self.storage.write(METRICS_KEY, Bytes::from(data)).await?;
        Ok(())
    }

    fn outputs(&self) -> ListenerOutputs {
        let mut outputs = ListenerOutputs::new();
        for slot in &self.listeners {
            for (name, key) in slot.listener.outputs() {
                outputs.insert(format!("{}/{}", slot.listener.id(), name), key);
            }
        }
        outputs
    }
}

/// Builder for [`Learner`]
pub struct LearnerBuilder {
    config: LearnerConfig,
    run_dir: Option<PathBuf>,
    trainer: Box<dyn Trainer>,
    scorer: Box<dyn Scorer>,
    listeners: Vec<Box<dyn Listener>>,
    writer: Arc<dyn MetricsWriter>,
}

impl LearnerBuilder {
    pub fn new(trainer: Box<dyn Trainer>, scorer: Box<dyn Scorer>) -> Self {
        Self {
            config: LearnerConfig::default(),
            run_dir: None,
            trainer,
            scorer,
            listeners: Vec::new(),
            writer: Arc::new(TracingMetricsWriter),
        }
    }

    pub fn config(mut self, config: LearnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory holding checkpoints, listener state and metrics
    pub fn run_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(path.into());
        self
    }

    pub fn max_epochs(mut self, max_epochs: u64) -> Self {
        self.config.max_epochs = max_epochs;
        self
    }

    pub fn steps_per_epoch(mut self, steps: u64) -> Self {
        self.config.steps_per_epoch = steps;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn writer(mut self, writer: Arc<dyn MetricsWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Register a listener; listeners run in registration order
    pub fn listener(mut self, listener: impl Listener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn boxed_listener(mut self, listener: Box<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and open the checkpoints of the run
    /// directory
    pub async fn build(self) -> Result<Learner> {
        self.config.validate()?;
        let run_dir = self.run_dir.ok_or_else(|| Error::InvalidConfig {
            message: "learner needs a run directory".to_string(),
        })?;

        let mut ids = HashSet::new();
        for listener in &self.listeners {
            if !ids.insert(listener.id().clone()) {
                return Err(Error::InvalidConfig {
                    message: format!("duplicate listener id {}", listener.id()),
                });
            }
        }

        let storage = Arc::new(LocalStorage::new(run_dir));
        let checkpoints =
            Arc::new(CheckpointManager::open(Arc::clone(&storage), &self.config.checkpoint).await?);

        Ok(Learner {
            config: self.config,
            storage,
            checkpoints,
            trainer: self.trainer,
            scorer: self.scorer,
            listeners: self
                .listeners
                .into_iter()
                .map(|listener| ListenerSlot {
                    listener,
                    phase: ListenerPhase::Uninitialized,
                })
                .collect(),
            writer: self.writer,
            phase: LearnerPhase::Init,
            epoch: 0,
            step: 0,
            metrics: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryMetricsWriter;
    use crate::losses::PairwiseLoss;
    use crate::trainer::PairwiseTrainer;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sampling::TripletBasedSampler;
    use std::path::Path;
    use tempfile::TempDir;
    use train_core::memory::MemoryTriplets;
    use train_core::{Document, ListenerId, ScoringBatch, TrainState, Triplet};

    /// Scores by text length; saves a weights file, records loads
    #[derive(Default)]
    struct TestScorer {
        calls: u64,
        nan_at: Option<u64>,
        loads: Arc<Mutex<Vec<PathBuf>>>,
    }

    #[async_trait]
    impl Scorer for TestScorer {
        async fn score(&mut self, batch: &ScoringBatch) -> Result<Vec<f32>> {
            self.calls += 1;
            let length = |d: &Document| d.text.as_deref().map_or(0, str::len) as f32;
            let mut scores: Vec<f32> = match batch {
                ScoringBatch::Pairs(pairs) => pairs.iter().map(|(_, d)| length(d)).collect(),
                ScoringBatch::Product { queries, documents } => queries
                    .iter()
                    .flat_map(|_| documents.iter().map(length))
                    .collect(),
            };
            if self.nan_at == Some(self.calls) {
                scores[0] = f32::NAN;
            }
            Ok(scores)
        }

        async fn backward(&mut self, _gradients: &[f32]) -> Result<()> {
            Ok(())
        }

        async fn save(&self, dir: &Path) -> Result<()> {
            tokio::fs::write(dir.join("weights.bin"), self.calls.to_le_bytes()).await?;
            Ok(())
        }

        async fn load(&mut self, dir: &Path) -> Result<()> {
            self.loads.lock().push(dir.to_path_buf());
            Ok(())
        }
    }

    /// Votes to stop at a given epoch
    struct StopAt {
        id: ListenerId,
        epoch: Epoch,
        seen: Arc<Mutex<Vec<Epoch>>>,
    }

    impl StopAt {
        fn new(id: &str, epoch: Epoch) -> Self {
            Self {
                id: id.to_string(),
                epoch,
                seen: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Listener for StopAt {
        fn id(&self) -> &ListenerId {
            &self.id
        }

        async fn initialize(&mut self, _context: &mut ListenerContext<'_>) -> Result<()> {
            Ok(())
        }

        async fn on_epoch_end(
            &mut self,
            state: &TrainState,
            context: &mut ListenerContext<'_>,
        ) -> Result<ListenerDecision> {
            assert!(context.storage.resolve(&state.model_path()).join("weights.bin").exists());
            self.seen.lock().push(state.epoch);
            if state.epoch >= self.epoch {
                Ok(ListenerDecision::Stop)
            } else {
                Ok(ListenerDecision::NoDecision)
            }
        }

        fn outputs(&self) -> ListenerOutputs {
            ListenerOutputs::from([("marker".to_string(), "listeners/marker".to_string())])
        }
    }

    fn trainer() -> Box<dyn Trainer> {
        let triplets = (0..5)
            .map(|i| Triplet {
                query: format!("query {}", i),
                positive: "a relevant passage".to_string(),
                negative: format!("noise {}", i),
            })
            .collect();
        let source = Arc::new(MemoryTriplets::new(triplets, false));
        let sampler = TripletBasedSampler::new(source, None).unwrap();
        Box::new(PairwiseTrainer::new(Box::new(sampler), PairwiseLoss::Softmax, 2).unwrap())
    }

    fn builder(dir: &TempDir, scorer: TestScorer) -> LearnerBuilder {
        Learner::builder(trainer(), Box::new(scorer))
            .run_dir(dir.path())
            .steps_per_epoch(2)
    }

    #[tokio::test]
    async fn test_exhausted_run() {
        let dir = TempDir::new().unwrap();
        let writer = Arc::new(MemoryMetricsWriter::new());
        let mut learner = builder(&dir, TestScorer::default())
            .max_epochs(3)
            .writer(writer.clone())
            .build()
            .await
            .unwrap();

        let report = learner.run().await.unwrap();
        assert_eq!(report.completion, Completion::Exhausted);
        assert_eq!((report.epoch, report.step), (3, 6));
        assert!(report.metrics.contains_key("train/softmax"));
        assert_eq!(learner.phase(), LearnerPhase::Done);

        // Default retention keeps the last two epochs
        assert_eq!(learner.checkpoints().committed_epochs(), vec![2, 3]);
        let checkpoint = learner.checkpoints().load(3).await.unwrap();
        // Six batches of two records over five triplets
        assert_eq!(checkpoint.sampler, train_core::IteratorState::position(12));

        let data = learner.storage().read(METRICS_KEY).await.unwrap();
        let record: MetricsRecord = serde_json::from_slice(&data).unwrap();
        assert_eq!((record.epoch, record.step), (3, 6));
        assert_eq!(writer.scalars("train/softmax").len(), 3);

        assert!(matches!(
            learner.run().await,
            Err(Error::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_vote() {
        let dir = TempDir::new().unwrap();
        let stop = StopAt::new("stop", 2);
        let seen = stop.seen.clone();
        let mut learner = builder(&dir, TestScorer::default())
            .max_epochs(10)
            .listener(stop)
            .build()
            .await
            .unwrap();
        assert_eq!(learner.listener_phase("stop"), Some(ListenerPhase::Uninitialized));

        let report = learner.run().await.unwrap();
        assert_eq!(report.completion, Completion::Stopped);
        assert_eq!(report.epoch, 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(learner.listener_phase("stop"), Some(ListenerPhase::Stopped));
        assert_eq!(
            report.outputs.get("stop/marker").map(String::as_str),
            Some("listeners/marker")
        );
        // The stopping epoch is committed too
        assert_eq!(learner.checkpoints().latest_epoch(), Some(2));
    }

    #[tokio::test]
    async fn test_duplicate_listener_ids() {
        let dir = TempDir::new().unwrap();
        let result = builder(&dir, TestScorer::default())
            .listener(StopAt::new("same", 1))
            .listener(StopAt::new("same", 2))
            .build()
            .await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_resume_from_committed_epoch() {
        let dir = TempDir::new().unwrap();
        let mut first = builder(&dir, TestScorer::default())
            .max_epochs(2)
            .build()
            .await
            .unwrap();
        first.run().await.unwrap();

        let scorer = TestScorer::default();
        let loads = scorer.loads.clone();
        let mut resumed = builder(&dir, scorer).max_epochs(4).build().await.unwrap();
        let report = resumed.run().await.unwrap();

        assert_eq!(*loads.lock(), vec![dir.path().join(epoch_key(2)).join("model")]);
        assert_eq!((report.epoch, report.step), (4, 8));
        let checkpoint = resumed.checkpoints().load(4).await.unwrap();
        assert_eq!(checkpoint.sampler, train_core::IteratorState::position(16));
    }

    #[tokio::test]
    async fn test_nan_leaves_epoch_uncommitted() {
        let dir = TempDir::new().unwrap();
        let scorer = TestScorer {
            nan_at: Some(3),
            ..Default::default()
        };
        let mut learner = builder(&dir, scorer).max_epochs(5).build().await.unwrap();

        let err = learner.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::NumericalFailure {
                epoch: 2,
                step: 3,
                batch: 1
            }
        ));
        assert_eq!(learner.checkpoints().committed_epochs(), vec![1]);
        assert!(!dir.path().join(epoch_key(2)).exists());
    }
}
