//! In-memory collaborators and dataset folds
//!
//! Handy for small datasets, tests and benchmarks.

use crate::{
    AssessmentSource, DocumentStore, Judgements, PairwiseSample, PairwiseSampleSource, QueryId,
    Result, Retriever, ScoredDocument, TextStore, Topic, TopicAssessments, TopicSource, Triplet,
    TripletSource,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Topics held in a vector
#[derive(Debug, Clone, Default)]
pub struct MemoryTopics {
    topics: Vec<Topic>,
}

impl MemoryTopics {
    pub fn new(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    /// Build from `(id, text)` pairs
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(id, text)| Topic {
                    id: id.into(),
                    text: text.into(),
                })
                .collect(),
        )
    }
}

impl TopicSource for MemoryTopics {
    fn iter(&self) -> Box<dyn Iterator<Item = Topic> + Send + '_> {
        Box::new(self.topics.iter().cloned())
    }
}

/// Assessments held in a map
#[derive(Debug, Clone, Default)]
pub struct MemoryAssessments {
    assessments: BTreeMap<QueryId, Judgements>,
}

impl MemoryAssessments {
    pub fn new(assessments: BTreeMap<QueryId, Judgements>) -> Self {
        Self { assessments }
    }

    pub fn insert(&mut self, query_id: impl Into<String>, judgements: Judgements) {
        self.assessments.insert(query_id.into(), judgements);
    }
}

impl AssessmentSource for MemoryAssessments {
    fn iter(&self) -> Box<dyn Iterator<Item = TopicAssessments> + Send + '_> {
        Box::new(
            self.assessments
                .iter()
                .map(|(id, judgements)| TopicAssessments {
                    id: id.clone(),
                    judgements: judgements.clone(),
                }),
        )
    }
}

/// Document contents held in a map
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    documents: HashMap<String, String>,
}

impl MemoryDocumentStore {
    pub fn new(documents: HashMap<String, String>) -> Self {
        Self { documents }
    }

    pub fn insert(&mut self, doc_id: impl Into<String>, text: impl Into<String>) {
        self.documents.insert(doc_id.into(), text.into());
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn document_text(&self, doc_id: &str) -> Option<String> {
        self.documents.get(doc_id).cloned()
    }
}

/// Query texts held in a map
#[derive(Debug, Clone, Default)]
pub struct MemoryTextStore {
    texts: HashMap<String, String>,
}

impl MemoryTextStore {
    pub fn new(texts: HashMap<String, String>) -> Self {
        Self { texts }
    }
}

impl TextStore for MemoryTextStore {
    fn text(&self, id: &str) -> Option<String> {
        self.texts.get(id).cloned()
    }
}

/// Retriever answering from a fixed table keyed by query text
///
/// Unknown queries retrieve nothing. Counts the calls it receives.
#[derive(Clone, Default)]
pub struct MemoryRetriever {
    results: HashMap<String, Vec<ScoredDocument>>,
    store: Option<Arc<dyn DocumentStore>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryRetriever {
    pub fn new(store: Option<Arc<dyn DocumentStore>>) -> Self {
        Self {
            store,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, text: impl Into<String>, documents: Vec<ScoredDocument>) {
        self.results.insert(text.into(), documents);
    }

    /// Number of `retrieve` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Retriever for MemoryRetriever {
    async fn retrieve(&self, text: &str) -> Result<Vec<ScoredDocument>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.results.get(text).cloned().unwrap_or_default())
    }

    fn document_store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.store.clone()
    }
}

/// Triplets held in a vector
#[derive(Debug, Clone)]
pub struct MemoryTriplets {
    triplets: Arc<Vec<Triplet>>,
    ids: bool,
}

impl MemoryTriplets {
    pub fn new(triplets: Vec<Triplet>, ids: bool) -> Self {
        Self {
            triplets: Arc::new(triplets),
            ids,
        }
    }
}

impl TripletSource for MemoryTriplets {
    fn ids(&self) -> bool {
        self.ids
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Triplet> + Send>> {
        let triplets = self.triplets.clone();
        Ok(Box::new(
            (0..triplets.len()).map(move |ix| triplets[ix].clone()),
        ))
    }
}

/// Pairwise samples held in a vector
#[derive(Debug, Clone)]
pub struct MemoryPairwiseSamples {
    samples: Arc<Vec<PairwiseSample>>,
}

impl MemoryPairwiseSamples {
    pub fn new(samples: Vec<PairwiseSample>) -> Self {
        Self {
            samples: Arc::new(samples),
        }
    }
}

impl PairwiseSampleSource for MemoryPairwiseSamples {
    fn iter(&self) -> Result<Box<dyn Iterator<Item = PairwiseSample> + Send>> {
        let samples = self.samples.clone();
        Ok(Box::new((0..samples.len()).map(move |ix| samples[ix].clone())))
    }
}

/// Restricts a topic source to a set of query ids
pub struct TopicFold {
    ids: BTreeSet<QueryId>,
    topics: Arc<dyn TopicSource>,
}

impl TopicFold {
    pub fn new(ids: impl IntoIterator<Item = QueryId>, topics: Arc<dyn TopicSource>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            topics,
        }
    }
}

impl TopicSource for TopicFold {
    fn iter(&self) -> Box<dyn Iterator<Item = Topic> + Send + '_> {
        Box::new(
            self.topics
                .iter()
                .filter(move |topic| self.ids.contains(&topic.id)),
        )
    }
}

/// Restricts an assessment source to a set of query ids
pub struct AssessmentFold {
    ids: BTreeSet<QueryId>,
    assessments: Arc<dyn AssessmentSource>,
}

impl AssessmentFold {
    pub fn new(
        ids: impl IntoIterator<Item = QueryId>,
        assessments: Arc<dyn AssessmentSource>,
    ) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            assessments,
        }
    }
}

impl AssessmentSource for AssessmentFold {
    fn iter(&self) -> Box<dyn Iterator<Item = TopicAssessments> + Send + '_> {
        Box::new(
            self.assessments
                .iter()
                .filter(move |qrels| self.ids.contains(&qrels.id)),
        )
    }
}
