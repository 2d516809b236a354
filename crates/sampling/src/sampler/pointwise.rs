use super::{not_initialized, Candidate, ModelBasedSource, PointwiseSampler, Sampler};
use crate::{BoxedIterator, Pool, RandomSerializableIterator, RandomStream, SharedPool};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use train_core::config::SamplerConfig;
use train_core::{
    document_text, AdhocDataset, Document, PointwiseRecord, Query, Result, Retriever,
};

struct PointwisePools {
    positives: Pool<PointwiseRecord>,
    negatives: Pool<PointwiseRecord>,
}

/// Draws relevant documents with probability `relevant_ratio`, retrieved
/// non-relevant ones otherwise
pub struct PointwiseModelBasedSampler {
    source: ModelBasedSource,
    random: Option<RandomStream>,
    pools: SharedPool<PointwisePools>,
}

impl PointwiseModelBasedSampler {
    pub fn new(
        dataset: AdhocDataset,
        retriever: Arc<dyn Retriever>,
        config: SamplerConfig,
    ) -> Result<Self> {
        Ok(Self {
            source: ModelBasedSource::new(dataset, retriever, config)?,
            random: None,
            pools: SharedPool::default(),
        })
    }

    /// Number of (positive, negative) records, once built
    pub fn pool_sizes(&self) -> Option<(usize, usize)> {
        self.pools
            .current()
            .map(|pools| (pools.positives.len(), pools.negatives.len()))
    }

    async fn read_records(&mut self) -> Result<()> {
        let random = self
            .random
            .as_mut()
            .ok_or_else(|| not_initialized("PointwiseModelBasedSampler"))?;
        let (topics, _) = self.source.collect_topics(random, false).await?;

        let mut positives = Vec::new();
        let mut negatives = Vec::new();
        for topic in topics {
            let query = Query::new(Some(topic.query_id), Some(topic.text));
            for candidate in topic.positives {
                positives.push(to_record(&query, candidate));
            }
            for candidate in topic.negatives {
                negatives.push(to_record(&query, candidate));
            }
        }

        info!(
            positives = positives.len(),
            negatives = negatives.len(),
            "Loaded pos/neg records"
        );
        self.pools.replace(PointwisePools {
            positives: Pool::new("pointwise positives", positives)?,
            negatives: Pool::new("pointwise negatives", negatives)?,
        });
        Ok(())
    }
}

fn to_record(query: &Query, candidate: Candidate) -> PointwiseRecord {
    PointwiseRecord {
        query: query.clone(),
        document: Document::new(Some(candidate.doc_id), None, Some(candidate.score)),
        score: candidate.score,
        relevance: Some(candidate.relevance),
    }
}

#[async_trait]
impl Sampler for PointwiseModelBasedSampler {
    async fn initialize(&mut self, random: RandomStream) -> Result<()> {
        self.random = Some(random);
        self.source.initialize_retriever().await?;
        if self.source.config().require_initialization {
            self.read_records().await?;
        }
        Ok(())
    }

    async fn update(&mut self) -> Result<()> {
        self.read_records().await
    }
}

impl PointwiseSampler for PointwiseModelBasedSampler {
    fn pointwise_iter(&self) -> Result<BoxedIterator<PointwiseRecord>> {
        let random = self
            .random
            .clone()
            .ok_or_else(|| not_initialized("PointwiseModelBasedSampler"))?;
        let pools = self.pools.clone();
        let store = self.source.store();
        let relevant_ratio = self.source.config().relevant_ratio;

        Ok(Box::new(RandomSerializableIterator::new(
            random,
            move |random| {
                let Some(pools) = pools.current() else {
                    error!("Pointwise sampler has no records yet, update() was never called");
                    return None;
                };
                let pool = if random.next_f64() < relevant_ratio {
                    &pools.positives
                } else {
                    &pools.negatives
                };

                let mut record = pool.draw(random).clone();
                if record.document.text.is_none() {
                    if let Some(doc_id) = &record.document.id {
                        record.document.text = document_text(store.as_ref(), doc_id);
                    }
                }
                Some(record)
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SerializableIterator;
    use train_core::memory::{
        MemoryAssessments, MemoryDocumentStore, MemoryRetriever, MemoryTopics,
    };
    use train_core::{Error, Judgements, ScoredDocument};

    fn sampler(require_initialization: bool) -> PointwiseModelBasedSampler {
        let topics = MemoryTopics::from_pairs([("q1", "first"), ("q2", "second")]);

        let mut assessments = MemoryAssessments::default();
        assessments.insert("q1", Judgements::from([("d1".to_string(), 1)]));
        assessments.insert("q2", Judgements::from([("d2".to_string(), 2)]));

        let mut store = MemoryDocumentStore::default();
        for doc in ["d1", "d2", "d3", "d4"] {
            store.insert(doc, format!("content of {}", doc));
        }

        let mut retriever = MemoryRetriever::new(Some(Arc::new(store)));
        retriever.insert("first", vec![ScoredDocument::new("d3", 1.5)]);
        retriever.insert(
            "second",
            vec![ScoredDocument::new("d2", 3.0), ScoredDocument::new("d4", 0.5)],
        );

        PointwiseModelBasedSampler::new(
            AdhocDataset::new(Arc::new(topics), Arc::new(assessments)),
            Arc::new(retriever),
            SamplerConfig {
                require_initialization,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pools_and_text_backfill() {
        let mut sampler = sampler(true);
        sampler.initialize(RandomStream::from_seed(3)).await.unwrap();
        assert_eq!(sampler.pool_sizes(), Some((2, 2)));

        let records: Vec<_> = sampler.pointwise_iter().unwrap().take(50).collect();
        for record in &records {
            let doc_id = record.document.id.clone().unwrap();
            assert_eq!(
                record.document.text.as_deref(),
                Some(format!("content of {}", doc_id).as_str())
            );
            let relevant = record.relevance.unwrap() > 0;
            assert_eq!(relevant, doc_id == "d1" || doc_id == "d2");
        }
        assert!(records.iter().any(|r| r.relevance.unwrap() > 0));
        assert!(records.iter().any(|r| r.relevance.unwrap() <= 0));
    }

    #[tokio::test]
    async fn test_resume_matches_uninterrupted() {
        let mut sampler = sampler(true);
        sampler.initialize(RandomStream::from_seed(8)).await.unwrap();

        let expected: Vec<_> = sampler.pointwise_iter().unwrap().take(20).collect();

        let mut first = sampler.pointwise_iter().unwrap();
        let mut produced: Vec<_> = first.by_ref().take(10).collect();
        let state = first.state();

        let mut resumed = sampler.pointwise_iter().unwrap();
        resumed.restore(&state).unwrap();
        produced.extend(resumed.take(10));

        assert_eq!(produced, expected);
    }

    #[tokio::test]
    async fn test_deferred_initialization() {
        let mut sampler = sampler(false);
        assert!(matches!(
            sampler.pointwise_iter(),
            Err(Error::SamplerNotReady { .. })
        ));

        sampler.initialize(RandomStream::from_seed(0)).await.unwrap();
        assert_eq!(sampler.pool_sizes(), None);
        let mut iter = sampler.pointwise_iter().unwrap();
        assert!(iter.next().is_none());

        sampler.update().await.unwrap();
        assert!(iter.next().is_some());
    }
}
