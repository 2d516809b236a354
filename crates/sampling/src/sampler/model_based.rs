//! Retrieval pass shared by the model-based samplers

use crate::RandomStream;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use train_core::config::SamplerConfig;
use train_core::{
    AdhocDataset, DocId, DocumentStore, Error, Judgements, QueryId, Result, Retriever,
    SamplingReport, ScoredDocument, Topic,
};

/// A candidate document for one query
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub doc_id: DocId,
    pub relevance: i32,

    /// Retriever score (0 for judged positives)
    pub score: f32,
}

/// A topic with its positive and negative candidates
#[derive(Debug, Clone, PartialEq)]
pub struct TopicCandidates {
    pub query_id: QueryId,
    pub text: String,
    pub positives: Vec<Candidate>,
    pub negatives: Vec<Candidate>,
}

/// Split candidates: judged positives (relevance > 0) on one side, retrieved
/// documents that are not positive on the other
pub fn split_candidates(
    judgements: &Judgements,
    retrieved: &[ScoredDocument],
) -> (Vec<Candidate>, Vec<Candidate>) {
    let positives = judgements
        .iter()
        .filter(|(_, &rel)| rel > 0)
        .map(|(doc_id, &relevance)| Candidate {
            doc_id: doc_id.clone(),
            relevance,
            score: 0.0,
        })
        .collect();

    let negatives = retrieved
        .iter()
        .filter_map(|sd| {
            let relevance = judgements.get(&sd.doc_id).copied().unwrap_or(0);
            (relevance <= 0).then(|| Candidate {
                doc_id: sd.doc_id.clone(),
                relevance,
                score: sd.score,
            })
        })
        .collect();

    (positives, negatives)
}

/// Dataset and retriever of a model-based sampler
#[derive(Clone)]
pub struct ModelBasedSource {
    dataset: AdhocDataset,
    retriever: Arc<dyn Retriever>,
    store: Arc<dyn DocumentStore>,
    config: SamplerConfig,
}

impl ModelBasedSource {
    /// The retriever must expose a document store
    pub fn new(
        dataset: AdhocDataset,
        retriever: Arc<dyn Retriever>,
        config: SamplerConfig,
    ) -> Result<Self> {
        let store = retriever
            .document_store()
            .ok_or(Error::MissingDocumentStore)?;
        Ok(Self {
            dataset,
            retriever,
            store,
            config,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    pub async fn initialize_retriever(&self) -> Result<()> {
        self.retriever.initialize().await
    }

    /// Topics to sample from, restricted to `max_query` of them if set
    fn select_topics(&self, random: &mut RandomStream) -> Vec<Topic> {
        let topics = self.dataset.read_topics();
        match self.config.max_query {
            Some(max_query) if max_query < topics.len() => {
                let mut selected: Vec<Option<Topic>> = topics.into_iter().map(Some).collect();
                random
                    .sample_indices(selected.len(), max_query)
                    .into_iter()
                    .filter_map(|ix| selected[ix].take())
                    .collect()
            }
            _ => topics,
        }
    }

    /// Retrieve documents for every topic and split them into candidates
    ///
    /// Topics without judgements or without positives are skipped and
    /// counted, as are topics without negatives when `require_negatives`.
    #[instrument(skip(self, random))]
    pub async fn collect_topics(
        &self,
        random: &mut RandomStream,
        require_negatives: bool,
    ) -> Result<(Vec<TopicCandidates>, SamplingReport)> {
        info!("Reading assessments");
        let assessments = self.dataset.read_assessments();
        info!(topics = assessments.len(), "Read assessments");

        let topics = self.select_topics(random);
        let mut report = SamplingReport::default();

        // Topics that can be sampled from, with their judgements
        let mut pending: Vec<(Topic, &Judgements)> = Vec::with_capacity(topics.len());
        for topic in topics {
            match assessments.get(&topic.id) {
                Some(judgements) if !judgements.is_empty() => {
                    if judgements.values().any(|&rel| rel > 0) {
                        pending.push((topic, judgements));
                    } else {
                        debug!(query_id = %topic.id, "Skipping topic (no relevant documents)");
                        report.skipped += 1;
                    }
                }
                _ => {
                    warn!(query_id = %topic.id, "Skipping topic (no assessments)");
                    report.skipped += 1;
                }
            }
        }

        info!(topics = pending.len(), "Retrieving documents for each topic");
        let mut candidates = Vec::with_capacity(pending.len());
        let batch_size = self.config.retrieval_batch_size;

        if batch_size == 0 {
            for (topic, judgements) in pending {
                let retrieved = self.retriever.retrieve(&topic.text).await?;
                push_topic(
                    &mut candidates,
                    &mut report,
                    topic,
                    judgements,
                    &retrieved,
                    require_negatives,
                );
            }
        } else {
            for chunk in pending.chunks(batch_size) {
                let queries: BTreeMap<QueryId, String> = chunk
                    .iter()
                    .map(|(topic, _)| (topic.id.clone(), topic.text.clone()))
                    .collect();
                let mut results = self.retriever.retrieve_all(&queries).await?;

                for (topic, judgements) in chunk {
                    let retrieved = results.remove(&topic.id).unwrap_or_default();
                    push_topic(
                        &mut candidates,
                        &mut report,
                        topic.clone(),
                        judgements,
                        &retrieved,
                        require_negatives,
                    );
                }
            }
        }

        info!(
            "Processed {} topics ({} skipped)",
            report.total(),
            report.skipped
        );
        Ok((candidates, report))
    }
}

fn push_topic(
    candidates: &mut Vec<TopicCandidates>,
    report: &mut SamplingReport,
    topic: Topic,
    judgements: &Judgements,
    retrieved: &[ScoredDocument],
    require_negatives: bool,
) {
    let (positives, negatives) = split_candidates(judgements, retrieved);
    if require_negatives && negatives.is_empty() {
        debug!(query_id = %topic.id, "Skipping topic (no negative documents)");
        report.skipped += 1;
        return;
    }

    report.processed += 1;
    candidates.push(TopicCandidates {
        query_id: topic.id,
        text: topic.text,
        positives,
        negatives,
    });
}
