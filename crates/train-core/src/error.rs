//! Error types for the training engine

use thiserror::Error;

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sampling, checkpointing and the learner loop
#[derive(Error, Debug)]
pub enum Error {
    // Precondition violations
    #[error("Cannot draw from empty pool: {pool}")]
    EmptyPool { pool: String },

    #[error("Retriever has no associated document store")]
    MissingDocumentStore,

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Sampler not ready: {message}")]
    SamplerNotReady { message: String },

    #[error("Sampler stream exhausted: {sampler}")]
    SamplerExhausted { sampler: String },

    #[error("Sampler index {index} out of range (0..{count})")]
    InvalidSamplerIndex { index: usize, count: usize },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    // Numerical failures
    #[error("NaN or infinite score detected at epoch {epoch}, step {step} (batch {batch})")]
    NumericalFailure { epoch: u64, step: u64, batch: u64 },

    // Checkpoint errors
    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Collaborator failures
    #[error("Retrieval failed: {message}")]
    Retrieval { message: String },

    #[error("Evaluation failed: {message}")]
    Evaluation { message: String },

    #[error("Scorer failed: {message}")]
    Scorer { message: String },

    #[error("Index rebuild failed at {path}: {message}")]
    IndexRebuild { path: String, message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid input detected at construction or initialization
    PreconditionViolation,

    /// NaN or infinite score
    NumericalFailure,

    /// Storage, I/O and (de)serialization
    Io,

    /// An external collaborator reported a failure
    Collaborator,

    /// Broken internal invariant
    Internal,
}

impl Error {
    /// Returns the category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyPool { .. }
            | Error::MissingDocumentStore
            | Error::InvalidConfig { .. }
            | Error::SamplerNotReady { .. }
            | Error::SamplerExhausted { .. }
            | Error::InvalidSamplerIndex { .. }
            | Error::UnsupportedOperation { .. } => ErrorKind::PreconditionViolation,
            Error::NumericalFailure { .. } => ErrorKind::NumericalFailure,
            Error::CheckpointCorrupted { .. }
            | Error::Storage { .. }
            | Error::StoragePathNotFound { .. }
            | Error::Io(_)
            | Error::Serialization(_) => ErrorKind::Io,
            Error::Retrieval { .. }
            | Error::Evaluation { .. }
            | Error::Scorer { .. }
            | Error::IndexRebuild { .. } => ErrorKind::Collaborator,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this error must terminate the learner loop
    ///
    /// Only I/O failures while reading checkpoints are absorbed (as a cold
    /// start); everything else propagates.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::Io
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
