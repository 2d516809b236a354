//! Training records produced by samplers and consumed by trainers

use serde::{Deserialize, Serialize};

/// A query, identified by id, text, or both
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Option<String>,
    pub text: Option<String>,
}

impl Query {
    pub fn new(id: Option<String>, text: Option<String>) -> Self {
        Self { id, text }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: Some(text.into()),
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: None,
        }
    }
}

/// A document with optional text and score
///
/// `score` is the retriever score, or the teacher score for distillation
/// samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Option<String>,
    pub text: Option<String>,
    pub score: Option<f32>,
}

impl Document {
    pub fn new(id: Option<String>, text: Option<String>, score: Option<f32>) -> Self {
        Self { id, text, score }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: Some(text.into()),
            score: None,
        }
    }
}

/// One (query, document) pair with its relevance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointwiseRecord {
    pub query: Query,
    pub document: Document,
    pub score: f32,
    pub relevance: Option<i32>,
}

/// A (query, positive, negative) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseRecord {
    pub query: Query,
    pub positive: Document,
    pub negative: Document,
}

/// A pairwise sample whose documents carry teacher scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseDistillationSample {
    pub query: Query,

    /// `[positive, negative]`
    pub documents: [Document; 2],
}

/// Dense row-major relevance matrix (queries x documents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl RelevanceMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    /// Matrix for in-batch negatives: `(batch_size, 2 * batch_size)` where row
    /// `i` has a single 1 at column `i` (its own positive)
    pub fn in_batch(batch_size: usize) -> Self {
        let mut matrix = Self::zeros(batch_size, 2 * batch_size);
        for i in 0..batch_size {
            matrix.set(i, i, 1.0);
        }
        matrix
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.values[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }
}

/// Queries and documents scored as a full product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchwiseRecords {
    pub queries: Vec<Query>,
    pub documents: Vec<Document>,
    pub relevances: RelevanceMatrix,
}

/// What a trainer asks the scorer to score
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringBatch {
    /// One score per pair, in order
    Pairs(Vec<(Query, Document)>),

    /// One score per (query, document) combination, row-major
    Product {
        queries: Vec<Query>,
        documents: Vec<Document>,
    },
}

impl ScoringBatch {
    /// Number of scores the scorer must return
    pub fn expected_scores(&self) -> usize {
        match self {
            ScoringBatch::Pairs(pairs) => pairs.len(),
            ScoringBatch::Product { queries, documents } => queries.len() * documents.len(),
        }
    }

    /// Pairs in `[positives..., negatives...]` order for pairwise records
    pub fn from_pairwise<'a>(records: impl IntoIterator<Item = &'a PairwiseRecord>) -> Self {
        let records: Vec<&PairwiseRecord> = records.into_iter().collect();
        let mut pairs = Vec::with_capacity(records.len() * 2);
        for record in &records {
            pairs.push((record.query.clone(), record.positive.clone()));
        }
        for record in &records {
            pairs.push((record.query.clone(), record.negative.clone()));
        }
        ScoringBatch::Pairs(pairs)
    }
}
