//! Storage backend trait definition

use async_trait::async_trait;
use bytes::Bytes;
use train_core::Result;

/// Async access to the files of a training run
///
/// Keys are `/`-separated paths relative to the run directory. A key may name
/// a single file or, for `remove` and `copy_prefix`, a whole directory.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the file at `key`
    ///
    /// # Errors
    /// `StoragePathNotFound` if nothing is stored there
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Write a file atomically (temporary file, then rename), creating parent
    /// directories
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, key: &str, data: Bytes) -> Result<u64>;

    /// Whether a file or directory exists at `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys of all files under `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a file, or a directory with everything below it
    ///
    /// # Errors
    /// `StoragePathNotFound` if nothing is stored there
    async fn remove(&self, key: &str) -> Result<()>;

    /// Replace whatever is stored at `destination` by a copy of `source`
    ///
    /// Copies are unversioned: the previous content of `destination` is
    /// removed first.
    ///
    /// # Returns
    /// Number of files copied
    async fn copy_prefix(&self, source: &str, destination: &str) -> Result<u64>;
}
