//! Fixtures shared by the end-to-end tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use train_core::memory::{
    MemoryAssessments, MemoryDocumentStore, MemoryPairwiseSamples, MemoryRetriever, MemoryTopics,
};
use train_core::{
    AdhocDataset, Document, Evaluation, Evaluator, Judgements, PairwiseSample, Query, Result,
    Retriever, ScoredDocument, Scorer, ScoringBatch,
};

pub fn init_tracing() {
    train_core::logging::init_tracing("warn");
}

/// Scores documents by text length and records what it was asked to score
///
/// Clones share the recordings.
#[derive(Clone, Default)]
pub struct RecordingScorer {
    calls: u64,
    pub nan_at: Option<u64>,
    seen: Arc<Mutex<Vec<String>>>,
    backwards: Arc<Mutex<u64>>,
    loads: Arc<Mutex<Vec<PathBuf>>>,
}

impl RecordingScorer {
    pub fn failing_at(call: u64) -> Self {
        Self {
            nan_at: Some(call),
            ..Default::default()
        }
    }

    /// `query|document` for every scored pair
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    pub fn backwards(&self) -> u64 {
        *self.backwards.lock()
    }

    pub fn loads(&self) -> Vec<PathBuf> {
        self.loads.lock().clone()
    }
}

fn text(document: &Document) -> &str {
    document.text.as_deref().unwrap_or("")
}

#[async_trait]
impl Scorer for RecordingScorer {
    async fn score(&mut self, batch: &ScoringBatch) -> Result<Vec<f32>> {
        self.calls += 1;
        let mut scores = Vec::with_capacity(batch.expected_scores());
        let mut seen = self.seen.lock();
        match batch {
            ScoringBatch::Pairs(pairs) => {
                for (query, document) in pairs {
                    let query = query.text.as_deref().unwrap_or("");
                    seen.push(format!("{}|{}", query, text(document)));
                    scores.push(text(document).len() as f32);
                }
            }
            ScoringBatch::Product { queries, documents } => {
                for query in queries {
                    for document in documents {
                        let query = query.text.as_deref().unwrap_or("");
                        seen.push(format!("{}|{}", query, text(document)));
                        scores.push(text(document).len() as f32);
                    }
                }
            }
        }
        if self.nan_at == Some(self.calls) {
            scores[0] = f32::NAN;
        }
        Ok(scores)
    }

    async fn backward(&mut self, _gradients: &[f32]) -> Result<()> {
        *self.backwards.lock() += 1;
        Ok(())
    }

    async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::write(dir.join("weights.bin"), self.calls.to_le_bytes()).await?;
        Ok(())
    }

    async fn load(&mut self, dir: &Path) -> Result<()> {
        let weights = tokio::fs::read(dir.join("weights.bin")).await?;
        let mut calls = [0u8; 8];
        calls.copy_from_slice(&weights[..8]);
        self.calls = u64::from_le_bytes(calls);
        self.loads.lock().push(dir.to_path_buf());
        Ok(())
    }
}

/// Pre-computed samples with two groups of negatives
pub fn pairwise_samples(count: usize) -> Arc<MemoryPairwiseSamples> {
    let samples = (0..count)
        .map(|i| PairwiseSample {
            query: Query::new(Some(format!("q{}", i)), Some(format!("query {}", i))),
            positives: vec![
                Document::from_text(format!("relevant {}", i)),
                Document::from_text(format!("also relevant {}", i)),
            ],
            negatives: BTreeMap::from([
                (
                    "bm25".to_string(),
                    (0..3)
                        .map(|j| Document::from_text(format!("bm25 negative {} {}", i, j)))
                        .collect(),
                ),
                (
                    "random".to_string(),
                    vec![Document::from_text(format!("random negative {}", i))],
                ),
            ]),
        })
        .collect();
    Arc::new(MemoryPairwiseSamples::new(samples))
}

/// Four topics whose retrieved documents are one positive and two hard
/// negatives each
pub fn adhoc_collection() -> (AdhocDataset, Arc<MemoryRetriever>) {
    let mut assessments = MemoryAssessments::default();
    let mut store = MemoryDocumentStore::default();
    let mut runs = Vec::new();
    let mut topics = Vec::new();

    for i in 0..4 {
        let query_id = format!("q{}", i);
        let text = format!("topic {}", i);
        let positive = format!("d{}", i);
        let negatives = [format!("h{}a", i), format!("h{}b", i)];

        assessments.insert(query_id.clone(), Judgements::from([(positive.clone(), 1)]));
        store.insert(positive.clone(), format!("relevant document {}", i));
        for negative in &negatives {
            store.insert(negative.clone(), format!("hard negative {}", negative));
        }

        runs.push((
            text.clone(),
            vec![
                ScoredDocument::new(negatives[0].clone(), 3.0),
                ScoredDocument::new(positive, 2.0),
                ScoredDocument::new(negatives[1].clone(), 1.0),
            ],
        ));
        topics.push((query_id, text));
    }

    let mut retriever = MemoryRetriever::new(Some(Arc::new(store)));
    for (text, documents) in runs {
        retriever.insert(text, documents);
    }

    let dataset = AdhocDataset::new(
        Arc::new(MemoryTopics::from_pairs(topics)),
        Arc::new(assessments),
    );
    (dataset, Arc::new(retriever))
}

/// Returns scripted `map` values, one per evaluation, then zeros
pub struct ScriptedEvaluator {
    values: Mutex<VecDeque<f64>>,
}

impl ScriptedEvaluator {
    pub fn new(values: &[f64]) -> Self {
        Self {
            values: Mutex::new(values.iter().copied().collect()),
        }
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        _retriever: &dyn Retriever,
        dataset: &AdhocDataset,
        _metrics: &[String],
    ) -> Result<Evaluation> {
        let value = self.values.lock().pop_front().unwrap_or(0.0);
        let per_query = dataset
            .read_topics()
            .into_iter()
            .map(|topic| (topic.id, value))
            .collect();
        Ok(Evaluation {
            means: BTreeMap::from([("map".to_string(), value)]),
            per_query: BTreeMap::from([("map".to_string(), per_query)]),
        })
    }
}
