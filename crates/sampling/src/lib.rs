//! Resumable sampling for ranking-model training
//!
//! This crate provides:
//! - **RandomStream**: a seeded ChaCha stream with snapshot/restore
//! - **Serializable iterators**: random-draw, skip-ahead and switchable
//!   iterators whose cursor survives a process restart
//! - **Samplers**: pointwise, pairwise, batchwise and distillation record
//!   streams built from datasets, retrievers and triplet files
//! - **Export tasks**: hard-negative lists and teacher-scored triplets
//!
//! # Example
//!
//! ```rust
//! use sampling::{RandomSerializableIterator, RandomStream, SerializableIterator};
//!
//! let mut draws = RandomSerializableIterator::new(RandomStream::from_seed(42), |random| {
//!     Some(random.below(10))
//! });
//! let _first: Vec<usize> = draws.by_ref().take(3).collect();
//! let state = draws.state();
//! let next: Vec<usize> = draws.take(3).collect();
//!
//! let mut resumed = RandomSerializableIterator::new(RandomStream::from_seed(0), |random| {
//!     Some(random.below(10))
//! });
//! resumed.restore(&state).unwrap();
//! assert_eq!(resumed.take(3).collect::<Vec<_>>(), next);
//! ```

pub mod export;
pub mod iter;
pub mod pool;
pub mod random;
pub mod sampler;

pub use export::{HardNegativeExporter, TeacherTripletScorer};
pub use iter::{
    BoxedIterator, RandomSerializableIterator, SerializableIterator, SerializableIteratorAdapter,
    SkippingIterator, SourceFactory, SwitchHandle, SwitchableIterator,
};
pub use pool::{Pool, SharedPool};
pub use random::RandomStream;
pub use sampler::*;
