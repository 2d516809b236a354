//! Storage - where a training run keeps its files
//!
//! Every artifact of a run (epoch checkpoints, best and last model copies,
//! listener state, metrics) lives under one run directory and is addressed by
//! a `/`-separated key relative to it.
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> train_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/run");
//! storage.write("listeners/validation/info.json", Bytes::from("{}")).await?;
//! storage
//!     .copy_prefix("checkpoints/epoch-00000004/model", "listeners/validation/best/map")
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

pub use backend::StorageBackend;
pub use local::LocalStorage;
