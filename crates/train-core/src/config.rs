//! Training configuration types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main training configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Learner loop settings
    pub learner: LearnerConfig,

    /// Trainer (batching) settings
    pub trainer: TrainerConfig,

    /// Retrieval-based sampler settings
    pub sampler: SamplerConfig,

    /// Validation listener settings
    pub validation: ValidationConfig,

    /// Negative sampler listener settings
    pub negatives: NegativeSamplingConfig,

    /// Index rebuild listener settings
    pub indexing: IndexingConfig,
}

impl TrainingConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrainingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.learner.validate()?;
        self.trainer.validate()?;
        self.sampler.validate()?;
        self.validation.validate()?;
        self.negatives.validate()?;
        self.indexing.validate()
    }
}

/// Learner loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Maximum number of epochs
    pub max_epochs: u64,

    /// Number of batches per epoch
    pub steps_per_epoch: u64,

    /// Seed of the root random stream
    pub seed: u64,

    /// Checkpoint settings
    pub checkpoint: CheckpointConfig,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            steps_per_epoch: 128,
            seed: 0,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.steps_per_epoch == 0 {
            return Err(invalid("steps_per_epoch must be positive"));
        }
        self.checkpoint.validate()
    }
}

/// Epoch checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Number of epoch checkpoints to keep
    pub keep_count: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { keep_count: 2 }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keep_count == 0 {
            return Err(invalid("checkpoint.keep_count must be at least 1"));
        }
        Ok(())
    }
}

/// Trainer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of records per batch
    pub batch_size: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self { batch_size: 16 }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(invalid("trainer.batch_size must be positive"));
        }
        Ok(())
    }
}

/// Retrieval-based sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of topics to keep (all when unset)
    pub max_query: Option<usize>,

    /// Queries per retrieval call (0 means one call per query)
    pub retrieval_batch_size: usize,

    /// Probability of drawing a positive pointwise record
    pub relevant_ratio: f64,

    /// Build the candidate pools at initialization
    pub require_initialization: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_query: None,
            retrieval_batch_size: 0,
            relevant_ratio: 0.5,
            require_initialization: true,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.relevant_ratio) {
            return Err(invalid(format!(
                "sampler.relevant_ratio must be in [0, 1], got {}",
                self.relevant_ratio
            )));
        }
        Ok(())
    }
}

/// Validation listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Metrics to record, and whether to keep the best checkpoint for each
    pub metrics: BTreeMap<String, bool>,

    /// Epochs between validations
    pub validation_interval: u64,

    /// Epochs without improvement before stopping (0 disables)
    pub early_stop: u64,

    /// First epoch at which bests are recorded
    pub warmup: Option<u64>,

    /// Also keep a copy of the model at each validation
    pub store_last_checkpoint: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            metrics: BTreeMap::from([("map".to_string(), true)]),
            validation_interval: 1,
            early_stop: 0,
            warmup: None,
            store_last_checkpoint: false,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.validation_interval == 0 {
            return Err(invalid("validation.validation_interval must be positive"));
        }
        if self.early_stop % self.validation_interval != 0 {
            return Err(invalid(format!(
                "validation.early_stop ({}) should be a multiple of validation_interval ({})",
                self.early_stop, self.validation_interval
            )));
        }
        if self.metrics.is_empty() {
            return Err(invalid("validation.metrics must name at least one metric"));
        }
        Ok(())
    }
}

/// Negative sampler listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegativeSamplingConfig {
    /// Epochs between negative pool refreshes
    pub sampling_interval: u64,
}

impl Default for NegativeSamplingConfig {
    fn default() -> Self {
        Self {
            sampling_interval: 128,
        }
    }
}

impl NegativeSamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_interval == 0 {
            return Err(invalid("negatives.sampling_interval must be positive"));
        }
        Ok(())
    }
}

/// Index rebuild listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Epochs between index rebuilds
    pub indexing_interval: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            indexing_interval: 128,
        }
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.indexing_interval == 0 {
            return Err(invalid("indexing.indexing_interval must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        message: message.into(),
    }
}
