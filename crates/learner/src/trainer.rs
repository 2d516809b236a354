//! TrainStep: one optimization step over a batch of sampled records
//!
//! A trainer owns its sampler and the record iterator drawn from it. Each
//! `train_batch` pulls `batch_size` records, asks the external scorer for
//! scores, checks them, computes the loss and hands the gradients back to
//! the scorer.

use crate::losses::{BatchwiseLoss, DistillationPairwiseLoss, PairwiseLoss, PointwiseLoss};
use crate::metrics::Metrics;
use async_trait::async_trait;
use sampling::{
    BatchwiseSampler, BoxedIterator, DistillationPairwiseSampler, PairwiseListSamplers,
    PairwiseSampler, PointwiseSampler, RandomStream, SerializableIterator,
};
use tracing::error;
use train_core::{
    BatchwiseRecords, Epoch, Error, IteratorState, PairwiseDistillationSample, PairwiseRecord,
    PointwiseRecord, Result, Scorer, ScoringBatch, Step,
};

/// Where a batch sits in the run, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub epoch: Epoch,

    /// Step the batch is about to become
    pub step: Step,

    /// 1-based index of the batch within its epoch
    pub batch: u64,
}

#[async_trait]
pub trait Trainer: Send {
    fn batch_size(&self) -> usize;

    /// Initialize the sampler and open the record stream
    async fn initialize(&mut self, random: RandomStream) -> Result<()>;

    /// Cursor of the record stream
    fn state(&self) -> Result<IteratorState>;

    /// Move the record stream back to a saved cursor
    fn restore(&mut self, state: &IteratorState) -> Result<()>;

    /// Run one optimization step
    ///
    /// # Errors
    /// `NumericalFailure` if any score is NaN or infinite; nothing is
    /// back-propagated in that case.
    async fn train_batch(&mut self, scorer: &mut dyn Scorer, at: BatchPosition) -> Result<Metrics>;

    /// The switchable sampler list behind this trainer, if any
    fn sampler_list(&mut self) -> Option<&mut PairwiseListSamplers> {
        None
    }
}

fn not_ready() -> Error {
    Error::SamplerNotReady {
        message: "trainer was not initialized".to_string(),
    }
}

fn check_batch_size(batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig {
            message: "batch size must be positive".to_string(),
        });
    }
    Ok(batch_size)
}

fn next_records<T>(
    records: &mut Option<BoxedIterator<T>>,
    count: usize,
    sampler: &str,
) -> Result<Vec<T>> {
    let records = records.as_mut().ok_or_else(not_ready)?;
    let batch: Vec<T> = records.take(count).collect();
    if batch.len() < count {
        return Err(Error::SamplerExhausted {
            sampler: sampler.to_string(),
        });
    }
    Ok(batch)
}

fn iterator_state<T>(records: &Option<BoxedIterator<T>>) -> Result<IteratorState> {
    Ok(records.as_ref().ok_or_else(not_ready)?.state())
}

fn restore_iterator<T>(records: &mut Option<BoxedIterator<T>>, state: &IteratorState) -> Result<()> {
    records.as_mut().ok_or_else(not_ready)?.restore(state)
}

/// Score a batch and reject non-finite scores
async fn score_checked(
    scorer: &mut dyn Scorer,
    batch: &ScoringBatch,
    at: BatchPosition,
) -> Result<Vec<f32>> {
    let scores = scorer.score(batch).await?;
    if scores.len() != batch.expected_scores() {
        return Err(Error::Scorer {
            message: format!(
                "expected {} scores, got {}",
                batch.expected_scores(),
                scores.len()
            ),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        error!(
            epoch = at.epoch,
            step = at.step,
            batch = at.batch,
            "NaN or inf relevance score detected. Aborting."
        );
        return Err(Error::NumericalFailure {
            epoch: at.epoch,
            step: at.step,
            batch: at.batch,
        });
    }
    Ok(scores)
}

/// Trains on (query, document, relevance) records
pub struct PointwiseTrainer {
    sampler: Box<dyn PointwiseSampler>,
    loss: PointwiseLoss,
    batch_size: usize,
    records: Option<BoxedIterator<PointwiseRecord>>,
}

impl PointwiseTrainer {
    pub fn new(
        sampler: Box<dyn PointwiseSampler>,
        loss: PointwiseLoss,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            sampler,
            loss,
            batch_size: check_batch_size(batch_size)?,
            records: None,
        })
    }
}

#[async_trait]
impl Trainer for PointwiseTrainer {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.sampler.initialize(random).await?;
        self.records = Some(self.sampler.pointwise_iter()?);
        Ok(())
    }

    fn state(&self) -> Result<IteratorState> {
        iterator_state(&self.records)
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        restore_iterator(&mut self.records, state)
    }

    async fn train_batch(&mut self, scorer: &mut dyn Scorer, at: BatchPosition) -> Result<Metrics> {
        let records = next_records(&mut self.records, self.batch_size, "pointwise")?;
        let targets: Vec<f32> = records
            .iter()
            .map(|r| r.relevance.unwrap_or(0).max(0) as f32)
            .collect();
        let batch = ScoringBatch::Pairs(
            records
                .into_iter()
                .map(|r| (r.query, r.document))
                .collect(),
        );

        let scores = score_checked(scorer, &batch, at).await?;
        let output = self.loss.compute(&scores, &targets);
        scorer.backward(&output.gradients).await?;

        let mut metrics = Metrics::new();
        metrics.add(self.loss.name(), output.loss, targets.len() as u64);
        Ok(metrics)
    }
}

/// Trains on (query, positive, negative) triples
pub struct PairwiseTrainer {
    sampler: Box<dyn PairwiseSampler>,
    loss: PairwiseLoss,
    batch_size: usize,
    records: Option<BoxedIterator<PairwiseRecord>>,
}

impl PairwiseTrainer {
    pub fn new(
        sampler: Box<dyn PairwiseSampler>,
        loss: PairwiseLoss,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            sampler,
            loss,
            batch_size: check_batch_size(batch_size)?,
            records: None,
        })
    }
}

#[async_trait]
impl Trainer for PairwiseTrainer {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.sampler.initialize(random).await?;
        self.records = Some(self.sampler.pairwise_iter()?);
        Ok(())
    }

    fn state(&self) -> Result<IteratorState> {
        iterator_state(&self.records)
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        restore_iterator(&mut self.records, state)
    }

    async fn train_batch(&mut self, scorer: &mut dyn Scorer, at: BatchPosition) -> Result<Metrics> {
        let records = next_records(&mut self.records, self.batch_size, "pairwise")?;
        let batch = ScoringBatch::from_pairwise(&records);

        let scores = score_checked(scorer, &batch, at).await?;
        let output = self.loss.compute(&scores);
        scorer.backward(&output.gradients).await?;

        let mut metrics = Metrics::new();
        metrics.add(self.loss.name(), output.loss, records.len() as u64);
        Ok(metrics)
    }

    fn sampler_list(&mut self) -> Option<&mut PairwiseListSamplers> {
        self.sampler.as_list()
    }
}

/// Trains on whole batches scored as a (queries x documents) product
pub struct BatchwiseTrainer {
    sampler: Box<dyn BatchwiseSampler>,
    loss: BatchwiseLoss,
    batch_size: usize,
    batches: Option<BoxedIterator<BatchwiseRecords>>,
}

impl BatchwiseTrainer {
    pub fn new(
        sampler: Box<dyn BatchwiseSampler>,
        loss: BatchwiseLoss,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            sampler,
            loss,
            batch_size: check_batch_size(batch_size)?,
            batches: None,
        })
    }
}

#[async_trait]
impl Trainer for BatchwiseTrainer {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.sampler.initialize(random).await?;
        self.batches = Some(self.sampler.batchwise_iter(self.batch_size)?);
        Ok(())
    }

    fn state(&self) -> Result<IteratorState> {
        iterator_state(&self.batches)
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        restore_iterator(&mut self.batches, state)
    }

    async fn train_batch(&mut self, scorer: &mut dyn Scorer, at: BatchPosition) -> Result<Metrics> {
        let records = next_records(&mut self.batches, 1, "batchwise")?
            .pop()
            .ok_or_else(not_ready)?;
        let queries = records.queries.len();
        let batch = ScoringBatch::Product {
            queries: records.queries,
            documents: records.documents,
        };

        let scores = score_checked(scorer, &batch, at).await?;
        let output = self.loss.compute(&scores, &records.relevances);
        scorer.backward(&output.gradients).await?;

        let mut metrics = Metrics::new();
        metrics.add(self.loss.name(), output.loss, queries as u64);
        Ok(metrics)
    }
}

/// Trains a student to reproduce the score margins of a teacher
pub struct DistillationPairwiseTrainer {
    sampler: Box<dyn DistillationPairwiseSampler>,
    loss: DistillationPairwiseLoss,
    batch_size: usize,
    samples: Option<BoxedIterator<PairwiseDistillationSample>>,
}

impl DistillationPairwiseTrainer {
    pub fn new(
        sampler: Box<dyn DistillationPairwiseSampler>,
        loss: DistillationPairwiseLoss,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            sampler,
            loss,
            batch_size: check_batch_size(batch_size)?,
            samples: None,
        })
    }
}

#[async_trait]
impl Trainer for DistillationPairwiseTrainer {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.sampler.initialize(random).await?;
        self.samples = Some(self.sampler.distillation_iter()?);
        Ok(())
    }

    fn state(&self) -> Result<IteratorState> {
        iterator_state(&self.samples)
    }

    fn restore(&mut self, state: &IteratorState) -> Result<()> {
        restore_iterator(&mut self.samples, state)
    }

    async fn train_batch(&mut self, scorer: &mut dyn Scorer, at: BatchPosition) -> Result<Metrics> {
        let samples = next_records(&mut self.samples, self.batch_size, "distillation")?;

        // Teacher scores and pairs, positives first
        let mut teacher = Vec::with_capacity(2 * samples.len());
        let mut pairs = Vec::with_capacity(2 * samples.len());
        for side in 0..2 {
            for sample in &samples {
                let document = &sample.documents[side];
                teacher.push(document.score.ok_or_else(|| Error::Internal {
                    message: "distillation sample without teacher score".to_string(),
                })?);
                pairs.push((sample.query.clone(), document.clone()));
            }
        }

        let scores = score_checked(scorer, &ScoringBatch::Pairs(pairs), at).await?;
        let output = self.loss.compute(&scores, &teacher);
        scorer.backward(&output.gradients).await?;

        let mut metrics = Metrics::new();
        metrics.add(self.loss.name(), output.loss, samples.len() as u64);
        Ok(metrics)
    }
}
