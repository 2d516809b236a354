//! Epoch checkpoints for the learner loop
//!
//! Each epoch gets a directory `checkpoints/epoch-<N>/` holding the model
//! snapshot (`model/`) and, once the epoch is committed, the learner state
//! file (`state.ckpt`). Only committed epochs are used for recovery.

pub mod manager;
pub mod writer;

pub use manager::{epoch_key, CheckpointManager, CheckpointManagerHandle, CHECKPOINTS_PREFIX};
pub use writer::{decode_state, encode_state, StateHeader, STATE_MAGIC, STATE_VERSION};
