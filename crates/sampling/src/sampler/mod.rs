//! Samplers: stateful generators of training records
//!
//! A sampler is constructed, initialized once with its own [`RandomStream`],
//! then asked for (infinite) record iterators. Model-based samplers can be
//! refreshed with an explicit `update()`.

mod batchwise;
mod model_based;
mod pairwise;
mod pointwise;
mod triplets;
mod tsv;

pub use batchwise::PairwiseInBatchNegativesSampler;
pub use model_based::{split_candidates, Candidate, ModelBasedSource, TopicCandidates};
pub use pairwise::{PairwiseListSamplers, PairwiseModelBasedSampler};
pub use pointwise::PointwiseModelBasedSampler;
pub use triplets::{PairwiseDatasetTripletBasedSampler, TripletBasedSampler};
pub use tsv::{
    parse_triplet_line, read_tsv, DistillationTsvSampler, PairwiseSampleDatasetFromTsv,
    PairwiseSamplerFromTsv, ScoredTriplet, HARD_NEGATIVES_GROUP,
};

use crate::{BoxedIterator, RandomStream};
use async_trait::async_trait;
use train_core::{
    BatchwiseRecords, Error, PairwiseDistillationSample, PairwiseRecord, PointwiseRecord, Result,
};

/// Common lifecycle of samplers
#[async_trait]
pub trait Sampler: Send {
    /// Take ownership of the random stream and build what is needed to draw
    async fn initialize(&mut self, random: RandomStream) -> Result<()>;

    /// Re-run the sampling pass against the current model/retriever state
    async fn update(&mut self) -> Result<()> {
        Err(Error::UnsupportedOperation {
            operation: "update".to_string(),
        })
    }
}

pub trait PointwiseSampler: Sampler {
    fn pointwise_iter(&self) -> Result<BoxedIterator<PointwiseRecord>>;
}

pub trait PairwiseSampler: Sampler {
    fn pairwise_iter(&self) -> Result<BoxedIterator<PairwiseRecord>>;

    /// The switchable list behind this sampler, if it is one
    fn as_list(&mut self) -> Option<&mut PairwiseListSamplers> {
        None
    }
}

/// Samplers yielding whole batches of queries and documents
pub trait BatchwiseSampler: Sampler {
    fn batchwise_iter(&self, batch_size: usize) -> Result<BoxedIterator<BatchwiseRecords>>;
}

/// Samplers yielding pairs scored by a teacher
pub trait DistillationPairwiseSampler: Sampler {
    fn distillation_iter(&self) -> Result<BoxedIterator<PairwiseDistillationSample>>;
}

pub(crate) fn not_initialized(sampler: &str) -> Error {
    Error::SamplerNotReady {
        message: format!("{} was not initialized", sampler),
    }
}
