use super::{not_initialized, Candidate, ModelBasedSource, PairwiseSampler, Sampler};
use crate::{
    BoxedIterator, Pool, RandomSerializableIterator, RandomStream, SharedPool, SwitchHandle,
    SwitchableIterator,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};
use train_core::config::SamplerConfig;
use train_core::{
    document_text, AdhocDataset, Document, DocumentStore, Error, PairwiseRecord, Query, Result,
    Retriever,
};

/// Draws made before giving up on finding a document with content
const MAX_TEXT_ATTEMPTS: usize = 64;

struct PairwiseTopic {
    query: Query,
    positives: Vec<Candidate>,
    negatives: Vec<Candidate>,
}

/// Draws a topic, then one of its positives and one of its hard negatives
pub struct PairwiseModelBasedSampler {
    source: ModelBasedSource,
    random: Option<RandomStream>,
    topics: SharedPool<Pool<PairwiseTopic>>,
}

impl PairwiseModelBasedSampler {
    pub fn new(
        dataset: AdhocDataset,
        retriever: Arc<dyn Retriever>,
        config: SamplerConfig,
    ) -> Result<Self> {
        Ok(Self {
            source: ModelBasedSource::new(dataset, retriever, config)?,
            random: None,
            topics: SharedPool::default(),
        })
    }

    /// Number of topics to draw from, once built
    pub fn topic_count(&self) -> Option<usize> {
        self.topics.current().map(|topics| topics.len())
    }

    async fn read_records(&mut self) -> Result<()> {
        let random = self
            .random
            .as_mut()
            .ok_or_else(|| not_initialized("PairwiseModelBasedSampler"))?;
        let (topics, _) = self.source.collect_topics(random, true).await?;

        let topics: Vec<PairwiseTopic> = topics
            .into_iter()
            .map(|topic| PairwiseTopic {
                query: Query::new(Some(topic.query_id), Some(topic.text)),
                positives: topic.positives,
                negatives: topic.negatives,
            })
            .collect();

        info!(topics = topics.len(), "Loaded pairwise topics");
        self.topics.replace(Pool::new("pairwise topics", topics)?);
        Ok(())
    }
}

/// Draw a candidate, redrawing while the document has no content
fn sample_document(
    candidates: &[Candidate],
    store: &dyn DocumentStore,
    random: &mut RandomStream,
) -> Document {
    let mut candidate = &candidates[random.below(candidates.len())];
    for _ in 0..MAX_TEXT_ATTEMPTS {
        if let Some(text) = document_text(store, &candidate.doc_id) {
            return Document::new(
                Some(candidate.doc_id.clone()),
                Some(text),
                Some(candidate.score),
            );
        }
        candidate = &candidates[random.below(candidates.len())];
    }

    warn!(
        doc_id = %candidate.doc_id,
        attempts = MAX_TEXT_ATTEMPTS,
        "No candidate with content found, yielding a document without text"
    );
    Document::new(Some(candidate.doc_id.clone()), None, Some(candidate.score))
}

#[async_trait]
impl Sampler for PairwiseModelBasedSampler {
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

impl PairwiseSampler for PairwiseModelBasedSampler {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>> {
        let random = self
            .random
            .clone()
            .ok_or_else(|| not_initialized("PairwiseModelBasedSampler"))?;
        let topics = self.topics.clone();
        let store = self.source.store();

        Ok(Box::new(RandomSerializableIterator::new(
            random,
            move |random| {
                let Some(topics) = topics.current() else {
                    error!("Pairwise sampler has no topics yet, update() was never called");
                    return None;
                };
                let topic = topics.draw(random);
                let positive = sample_document(&topic.positives, store.as_ref(), random);
                let negative = sample_document(&topic.negatives, store.as_ref(), random);
                Some(PairwiseRecord {
                    query: topic.query.clone(),
                    positive,
                    negative,
                })
            },
        )))
    }
}

/// An ordered list of pairwise samplers, one of which is active
///
/// The active index is changed from the orchestration loop (see the negative
/// sampler listener); iterators created by [`PairwiseSampler::pairwise_iter`]
/// follow it.
pub struct PairwiseListSamplers {
    samplers: Vec<Box<dyn PairwiseSampler>>,
    current: SwitchHandle,
}

impl PairwiseListSamplers {
    pub fn new(samplers: Vec<Box<dyn PairwiseSampler>>) -> Result<Self> {
        if samplers.is_empty() {
            return Err(Error::InvalidConfig {
                message: "a sampler list needs at least one sampler".to_string(),
            });
        }
        Ok(Self {
            samplers,
            current: SwitchHandle::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    pub fn current(&self) -> usize {
        self.current.get()
    }

    pub fn set_current(&mut self, index: usize) -> Result<()> {
        if index >= self.samplers.len() {
            return Err(Error::InvalidSamplerIndex {
                index,
                count: self.samplers.len(),
            });
        }
        info!(sampler = index, "Switching active sampler");
        self.current.set(index);
        Ok(())
    }

    /// Refresh the sampler at `index`
    pub async fn update_sampler(&mut self, index: usize) -> Result<()> {
        let count = self.samplers.len();
        self.samplers
            .get_mut(index)
            .ok_or(Error::InvalidSamplerIndex { index, count })?
            .update()
            .await
    }
}

#[async_trait]
impl Sampler for PairwiseListSamplers {
    async fn initialize(&mut self, mut random: RandomStream) -> Result<()> {
        for sampler in &mut self.samplers {
            sampler.initialize(random.fork()).await?;
        }
        Ok(())
    }

    /// Refresh the active sampler
    async fn update(&mut self) -> Result<()> {
        self.update_sampler(self.current.get()).await
    }
}

impl PairwiseSampler for PairwiseListSamplers {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>> {
        let iterators = self
            .samplers
            .iter()
            .map(|sampler| sampler.pairwise_iter())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(SwitchableIterator::new(
            iterators,
            self.current.clone(),
        )))
    }

    fn as_list(&mut self) -> Option<&mut PairwiseListSamplers> {
        Some(self)
    }
}
