//! Contracts of the external collaborators
//!
//! Retrieval, evaluation, scoring and document storage live outside this
//! engine. Samplers, trainers and listeners only talk to them through the
//! traits below.

use crate::{
    Document, DocId, Judgements, Query, QueryId, Result, ScoredDocument, ScoringBatch, Topic,
    TopicAssessments,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// A collection of topics (queries)
pub trait TopicSource: Send + Sync {
    fn iter(&self) -> Box<dyn Iterator<Item = Topic> + Send + '_>;
}

/// Relevance assessments, one entry per query
pub trait AssessmentSource: Send + Sync {
    fn iter(&self) -> Box<dyn Iterator<Item = TopicAssessments> + Send + '_>;
}

/// Topics with their assessments
#[derive(Clone)]
pub struct AdhocDataset {
    pub topics: Arc<dyn TopicSource>,
    pub assessments: Arc<dyn AssessmentSource>,
}

impl AdhocDataset {
    pub fn new(topics: Arc<dyn TopicSource>, assessments: Arc<dyn AssessmentSource>) -> Self {
        Self {
            topics,
            assessments,
        }
    }

    /// Reads all assessments into memory, keyed by query id
    pub fn read_assessments(&self) -> BTreeMap<QueryId, Judgements> {
        self.assessments
            .iter()
            .map(|qrels| (qrels.id, qrels.judgements))
            .collect()
    }

    pub fn read_topics(&self) -> Vec<Topic> {
        self.topics.iter().collect()
    }
}

impl std::fmt::Debug for AdhocDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdhocDataset").finish_non_exhaustive()
    }
}

/// Access to document contents
pub trait DocumentStore: Send + Sync {
    fn document_text(&self, doc_id: &str) -> Option<String>;
}

/// Access to query texts by id
pub trait TextStore: Send + Sync {
    fn text(&self, id: &str) -> Option<String>;
}

/// First-stage retrieval
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Prepare the retriever before first use
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Retrieve documents for one query, best first
    async fn retrieve(&self, text: &str) -> Result<Vec<ScoredDocument>>;

    /// Retrieve documents for a group of queries in one call
    ///
    /// The default implementation issues one `retrieve` call per query.
    async fn retrieve_all(
        &self,
        queries: &BTreeMap<QueryId, String>,
    ) -> Result<BTreeMap<QueryId, Vec<ScoredDocument>>> {
        let mut results = BTreeMap::new();
        for (id, text) in queries {
            results.insert(id.clone(), self.retrieve(text).await?);
        }
        Ok(results)
    }

    /// The document store backing this retriever, if any
    fn document_store(&self) -> Option<Arc<dyn DocumentStore>>;
}

/// Metric values computed by an evaluator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Mean value per metric
    pub means: BTreeMap<String, f64>,

    /// Per-query values per metric
    pub per_query: BTreeMap<String, BTreeMap<QueryId, f64>>,
}

/// Computes ranking metrics of a retriever on a dataset
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        retriever: &dyn Retriever,
        dataset: &AdhocDataset,
        metrics: &[String],
    ) -> Result<Evaluation>;
}

/// Rebuilds an auxiliary index (e.g. a dense index) from the current model
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    async fn rebuild(&self, path: &Path) -> Result<()>;
}

/// The model being trained (or a frozen teacher)
///
/// Forward and backward passes are external; the engine only hands over
/// batches and gradients with respect to the returned scores.
#[async_trait]
pub trait Scorer: Send {
    /// Score a batch, one score per pair (or per combination for products)
    async fn score(&mut self, batch: &ScoringBatch) -> Result<Vec<f32>>;

    /// Back-propagate the loss gradient w.r.t. the last scores and take an
    /// optimization step
    async fn backward(&mut self, gradients: &[f32]) -> Result<()>;

    /// Write a model snapshot into `dir`
    async fn save(&self, dir: &Path) -> Result<()>;

    /// Load a model snapshot from `dir`
    async fn load(&mut self, dir: &Path) -> Result<()>;
}

/// A training triplet, as texts or as ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    pub query: String,
    pub positive: String,
    pub negative: String,
}

/// A re-iterable source of training triplets
pub trait TripletSource: Send + Sync {
    /// Whether documents are given by id (rather than by text)
    fn ids(&self) -> bool;

    /// Start a fresh pass over the triplets
    fn iter(&self) -> Result<Box<dyn Iterator<Item = Triplet> + Send>>;
}

/// A query with its positives and groups of negatives
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseSample {
    pub query: Query,
    pub positives: Vec<Document>,

    /// Negatives grouped by the algorithm that produced them
    pub negatives: BTreeMap<String, Vec<Document>>,
}

/// A re-iterable source of pairwise samples
pub trait PairwiseSampleSource: Send + Sync {
    fn iter(&self) -> Result<Box<dyn Iterator<Item = PairwiseSample> + Send>>;
}

/// Looks up a document, logging when it has no content
pub fn document_text(store: &dyn DocumentStore, doc_id: &DocId) -> Option<String> {
    let text = store.document_text(doc_id);
    if text.is_none() {
        tracing::warn!(doc_id = %doc_id, "Document has no content");
    }
    text
}
