use super::{BatchwiseSampler, PairwiseSampler, Sampler};
use crate::{BoxedIterator, RandomStream, SerializableIteratorAdapter};
use async_trait::async_trait;
use train_core::{BatchwiseRecords, Error, RelevanceMatrix, Result};

/// Batches of pairwise records where every query is scored against all the
/// documents of the batch; the other queries' documents act as negatives
pub struct PairwiseInBatchNegativesSampler {
    sampler: Box<dyn PairwiseSampler>,
}

impl PairwiseInBatchNegativesSampler {
    pub fn new(sampler: Box<dyn PairwiseSampler>) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl Sampler for PairwiseInBatchNegativesSampler {
    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.sampler.initialize(random).await
    }

    async fn update(&mut self) -> Result<()> {
        self.sampler.update().await
    }
}

impl BatchwiseSampler for PairwiseInBatchNegativesSampler {
    fn batchwise_iter(&self, batch_size: usize) -> Result<BoxedIterator<BatchwiseRecords>> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig {
                message: "batch size must be positive".to_string(),
            });
        }

        // Same matrix for every batch of this iterator
        let relevances = RelevanceMatrix::in_batch(batch_size);

        Ok(Box::new(SerializableIteratorAdapter::new(
            self.sampler.pairwise_iter()?,
            move |pairs: &mut BoxedIterator<_>| {
                let mut queries = Vec::with_capacity(batch_size);
                let mut positives = Vec::with_capacity(batch_size);
                let mut negatives = Vec::with_capacity(batch_size);
                for record in pairs.take(batch_size) {
                    queries.push(record.query);
                    positives.push(record.positive);
                    negatives.push(record.negative);
                }
                if queries.len() < batch_size {
                    return None;
                }

                positives.append(&mut negatives);
                Some(BatchwiseRecords {
                    queries,
                    documents: positives,
                    relevances: relevances.clone(),
                })
            },
        )))
    }
}
