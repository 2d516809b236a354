//! Checkpoint manager: per-epoch directories, retention and recovery

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{LocalStorage, StorageBackend};
use tracing::{debug, info, instrument, warn};
use train_core::config::CheckpointConfig;
use train_core::{Epoch, Result, Step, TrainState, TrainerCheckpoint};

use crate::writer::{decode_state, encode_state};

/// Storage prefix of the epoch checkpoints
pub const CHECKPOINTS_PREFIX: &str = "checkpoints";

const STATE_FILE: &str = "state.ckpt";
const EPOCH_DIR_PREFIX: &str = "epoch-";

/// Storage key of the checkpoint directory of an epoch
pub fn epoch_key(epoch: Epoch) -> String {
    format!("{}/{}{:08}", CHECKPOINTS_PREFIX, EPOCH_DIR_PREFIX, epoch)
}

fn state_key(epoch: Epoch) -> String {
    format!("{}/{}", epoch_key(epoch), STATE_FILE)
}

/// Epoch of a `checkpoints/epoch-N/state.ckpt` key
fn parse_state_key(key: &str) -> Option<Epoch> {
    let rest = key.strip_prefix(CHECKPOINTS_PREFIX)?.strip_prefix('/')?;
    let (dir, file) = rest.split_once('/')?;
    if file != STATE_FILE {
        return None;
    }
    dir.strip_prefix(EPOCH_DIR_PREFIX)?.parse().ok()
}

/// A committed epoch checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedEpoch {
    pub epoch: Epoch,
    pub step: Step,
}

/// Manages the epoch checkpoints of one run directory
pub struct CheckpointManager {
    storage: Arc<LocalStorage>,

    /// Number of committed epochs kept on disk
    keep_count: usize,

    /// Committed epochs, oldest first
    committed: RwLock<BTreeMap<Epoch, CommittedEpoch>>,
}

impl CheckpointManager {
    /// Open the checkpoints of a run directory, indexing the epochs that were
    /// committed by a previous process
    #[instrument(skip(storage, config))]
    pub async fn open(storage: Arc<LocalStorage>, config: &CheckpointConfig) -> Result<Self> {
        config.validate()?;

        let mut committed = BTreeMap::new();
        for key in storage.list(CHECKPOINTS_PREFIX).await? {
            if let Some(epoch) = parse_state_key(&key) {
                // The step is only known once the state file is read
                committed.insert(epoch, CommittedEpoch { epoch, step: 0 });
            }
        }
        info!(committed = committed.len(), "Opened checkpoint directory");

        Ok(Self {
            storage,
            keep_count: config.keep_count,
            committed: RwLock::new(committed),
        })
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.storage
    }

    /// Committed epochs, oldest first
    pub fn committed_epochs(&self) -> Vec<Epoch> {
        self.committed.read().keys().copied().collect()
    }

    pub fn latest_epoch(&self) -> Option<Epoch> {
        self.committed.read().keys().next_back().copied()
    }

    /// Start the checkpoint of an epoch: clear its directory and return the
    /// train state handed to listeners along with the directory the model
    /// snapshot must be written to
    #[instrument(skip(self))]
    pub async fn prepare_epoch(&self, epoch: Epoch, step: Step) -> Result<(TrainState, PathBuf)> {
        let key = epoch_key(epoch);
        if self.storage.exists(&key).await? {
            debug!(epoch, "Clearing stale epoch directory");
            self.storage.remove(&key).await?;
        }
        self.committed.write().remove(&epoch);

        let state = TrainState {
            epoch,
            step,
            path: key,
        };
        let model_dir = self.storage.prepare_dir(&state.model_path()).await?;
        Ok((state, model_dir))
    }

    /// Write the state file of an epoch, then drop the oldest epochs beyond
    /// `keep_count`
    #[instrument(skip(self, checkpoint), fields(epoch = checkpoint.epoch, step = checkpoint.step))]
    pub async fn commit(&self, checkpoint: &TrainerCheckpoint) -> Result<u64> {
        let data = encode_state(checkpoint)?;
        let size = self
            .storage
            .write(&state_key(checkpoint.epoch), data)
            .await?;

        self.committed.write().insert(
            checkpoint.epoch,
            CommittedEpoch {
                epoch: checkpoint.epoch,
                step: checkpoint.step,
            },
        );
        info!(size_bytes = size, "Checkpoint committed");

        self.cleanup_old_checkpoints().await;
        Ok(size)
    }

    /// Remove the oldest committed epochs beyond `keep_count`
    async fn cleanup_old_checkpoints(&self) {
        let expired: Vec<Epoch> = {
            let committed = self.committed.read();
            let excess = committed.len().saturating_sub(self.keep_count);
            committed.keys().take(excess).copied().collect()
        };

        for epoch in expired {
            self.committed.write().remove(&epoch);
            match self.storage.remove(&epoch_key(epoch)).await {
                Ok(()) => debug!(epoch, "Deleted old checkpoint"),
                Err(e) => warn!(epoch, error = %e, "Failed to delete old checkpoint"),
            }
        }
    }

    /// Read the state file of a committed epoch
    pub async fn load(&self, epoch: Epoch) -> Result<TrainerCheckpoint> {
        let key = state_key(epoch);
        let data = self.storage.read(&key).await?;
        decode_state(&key, &data)
    }

    /// The newest committed checkpoint that can be read
    ///
    /// Unreadable checkpoints are logged and skipped; `None` means a cold
    /// start.
    pub async fn find_recovery_checkpoint(&self) -> Option<TrainerCheckpoint> {
        let epochs: Vec<Epoch> = self.committed.read().keys().rev().copied().collect();
        for epoch in epochs {
            match self.load(epoch).await {
                Ok(checkpoint) => {
                    info!(epoch, step = checkpoint.step, "Found recovery checkpoint");
                    self.committed.write().insert(
                        epoch,
                        CommittedEpoch {
                            epoch,
                            step: checkpoint.step,
                        },
                    );
                    return Some(checkpoint);
                }
                Err(e) => warn!(epoch, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        info!("No recovery checkpoint, starting from scratch");
        None
    }
}

/// Thread-safe handle to checkpoint manager
pub type CheckpointManagerHandle = Arc<CheckpointManager>;
