//! Core type definitions for the training engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier types
pub type QueryId = String;
pub type DocId = String;
pub type MetricName = String;
pub type ListenerId = String;

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// Judged relevance of documents for one query, ordered by document id
pub type Judgements = BTreeMap<DocId, i32>;

/// A query as read from a topic collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: QueryId,
    pub text: String,
}

/// Relevance judgements for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAssessments {
    pub id: QueryId,
    pub judgements: Judgements,
}

/// A document returned by a retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub doc_id: DocId,
    pub score: f32,
}

impl ScoredDocument {
    pub fn new(doc_id: impl Into<DocId>, score: f32) -> Self {
        Self {
            doc_id: doc_id.into(),
            score,
        }
    }
}

/// Serializable snapshot of a ChaCha random stream
///
/// Restoring it makes subsequent draws identical to an uninterrupted
/// continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomState {
    /// Key of the generator
    pub seed: [u8; 32],

    /// Stream (nonce) selector
    pub stream: u64,

    /// High 64 bits of the 128-bit keystream word position
    pub word_pos_hi: u64,

    /// Low 64 bits of the keystream word position
    pub word_pos_lo: u64,
}

impl RandomState {
    /// Keystream position in 32-bit words
    pub fn word_pos(&self) -> u128 {
        ((self.word_pos_hi as u128) << 64) | self.word_pos_lo as u128
    }
}

/// Serializable cursor of a resumable iterator
///
/// Random-draw iterators fill `random`, skip-ahead iterators fill `position`
/// (items already produced), switchable iterators fill `current` and one
/// child state per sub-iterator. Adapters delegate to their inner state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorState {
    pub random: Option<RandomState>,
    pub position: Option<u64>,
    pub current: Option<usize>,
    pub children: Vec<IteratorState>,
}

impl IteratorState {
    pub fn random(state: RandomState) -> Self {
        Self {
            random: Some(state),
            ..Default::default()
        }
    }

    pub fn position(position: u64) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn switchable(current: usize, children: Vec<IteratorState>) -> Self {
        Self {
            current: Some(current),
            children,
            ..Default::default()
        }
    }
}

/// Per-epoch snapshot handed to listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainState {
    /// Epoch that just completed (1-based)
    pub epoch: Epoch,

    /// Number of optimization steps done so far
    pub step: Step,

    /// Storage key of this epoch's checkpoint directory
    pub path: String,
}

impl TrainState {
    /// Storage key of the model snapshot inside the checkpoint directory
    pub fn model_path(&self) -> String {
        format!("{}/model", self.path)
    }
}

/// Learner state persisted at the end of each epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerCheckpoint {
    /// Completed epoch
    pub epoch: Epoch,

    /// Steps done so far
    pub step: Step,

    /// Timestamp when the checkpoint was committed
    pub created_at: DateTime<Utc>,

    /// Cursor of the trainer's record stream
    pub sampler: IteratorState,
}

/// Outcome of a pass over the topics of a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingReport {
    /// Topics that produced training material
    pub processed: usize,

    /// Topics excluded (missing judgements or one polarity of documents)
    pub skipped: usize,
}

impl SamplingReport {
    pub fn total(&self) -> usize {
        self.processed + self.skipped
    }
}
