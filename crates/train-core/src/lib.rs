//! Train Core - Foundation for resumable ranking-model training
//!
//! Provides the data model, error handling, configuration and the contracts
//! of the external collaborators (retrievers, evaluators, scorers, stores)
//! shared by the sampling, checkpoint and learner crates.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod memory;
pub mod records;
pub mod types;

pub use config::TrainingConfig;
pub use error::{Error, ErrorKind, Result};
pub use interfaces::*;
pub use records::*;
pub use types::*;
