//! Local filesystem backend rooted at the run directory

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use train_core::{Error, Result};
use uuid::Uuid;

use crate::StorageBackend;

/// Run directory on the local filesystem
///
/// Files are written atomically and directory copies are staged next to
/// their destination, so a crash never leaves a half-written file under its
/// final name.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage {
        message: format!("Failed to {} {}: {}", action, path.display(), e),
    }
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The run directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a key
    pub fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Key of a filesystem path below the run directory
    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    /// Hidden sibling used to stage a write or a copy
    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }

    /// Empty the directory at `key` (creating it if needed) and return its
    /// filesystem path, ready to receive a model snapshot
    #[instrument(skip(self))]
    pub async fn prepare_dir(&self, key: &str) -> Result<PathBuf> {
        let path = self.resolve(key);
        if fs::metadata(&path).await.is_ok() {
            self.remove(key).await?;
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| storage_error("create directory", &path, e))?;
        Ok(path)
    }

    async fn create_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory", parent, e))?;
        }
        Ok(())
    }

    /// All files below `dir`, skipping entries that cannot be read
    async fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Cannot list directory");
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => pending.push(entry.path()),
                    Ok(kind) if kind.is_file() => files.push(entry.path()),
                    _ => {}
                }
            }
        }
        files
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Bytes> {
        let path = self.resolve(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: key.to_string(),
            }),
            Err(e) => Err(storage_error("read", &path, e)),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let path = self.resolve(key);
        let staging = Self::staging_path(&path);
        Self::create_parent(&path).await?;

        let mut file = fs::File::create(&staging)
            .await
            .map_err(|e| storage_error("create", &staging, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| storage_error("write", &staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", &staging, e))?;

        fs::rename(&staging, &path)
            .await
            .map_err(|e| storage_error("rename", &staging, e))?;

        debug!(path = %path.display(), "File written");
        Ok(data.len() as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::metadata(self.resolve(key)).await.is_ok())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix);

        // A prefix may end in the middle of a name ("checkpoints/epoch-")
        let dir = if base.is_dir() {
            base
        } else {
            match base.parent() {
                Some(parent) if parent.is_dir() => parent.to_path_buf(),
                _ => return Ok(Vec::new()),
            }
        };

        let mut keys: Vec<String> = Self::walk(&dir)
            .await
            .iter()
            .filter_map(|path| self.key_of(path))
            .filter(|key| key.starts_with(prefix.trim_start_matches('/')))
            .collect();
        keys.sort();
        Ok(keys)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.resolve(key);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::StoragePathNotFound {
                    path: key.to_string(),
                })
            }
            Err(e) => return Err(storage_error("inspect", &path, e)),
        };

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| storage_error("remove", &path, e))?;

        debug!(path = %path.display(), "Removed");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn copy_prefix(&self, source: &str, destination: &str) -> Result<u64> {
        let source_path = self.resolve(source);
        let destination_path = self.resolve(destination);
        let metadata = fs::metadata(&source_path)
            .await
            .map_err(|_| Error::StoragePathNotFound {
                path: source.to_string(),
            })?;

        let staging = Self::staging_path(&destination_path);
        Self::create_parent(&destination_path).await?;

        let files = if metadata.is_dir() {
            Self::walk(&source_path).await
        } else {
            vec![source_path.clone()]
        };

        for file in &files {
            let target = if metadata.is_dir() {
                // Files come from walking `source_path`
                let relative = file.strip_prefix(&source_path).map_err(|e| Error::Internal {
                    message: format!("cannot copy {}: {}", file.display(), e),
                })?;
                staging.join(relative)
            } else {
                staging.clone()
            };
            Self::create_parent(&target).await?;
            fs::copy(file, &target)
                .await
                .map_err(|e| storage_error("copy", file, e))?;
        }
        if metadata.is_dir() && files.is_empty() {
            fs::create_dir_all(&staging)
                .await
                .map_err(|e| storage_error("create directory", &staging, e))?;
        }

        if fs::metadata(&destination_path).await.is_ok() {
            self.remove(destination).await?;
        }
        fs::rename(&staging, &destination_path)
            .await
            .map_err(|e| storage_error("rename", &staging, e))?;

        debug!(source, destination, files = files.len(), "Copied");
        Ok(files.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalStorage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        (temp_dir, storage)
    }

    async fn write_model(storage: &LocalStorage, key: &str, weights: &str) {
        storage
            .write(&format!("{}/weights.bin", key), Bytes::from(weights.to_string()))
            .await
            .unwrap();
        storage
            .write(&format!("{}/config/model.json", key), Bytes::from("{}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_read_nested() {
        let (_temp_dir, storage) = setup();
        let data = Bytes::from(r#"{"map": {"value": 0.5, "epoch": 2}}"#);

        let written = storage
            .write("listeners/validation/info.json", data.clone())
            .await
            .unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(
            storage.read("listeners/validation/info.json").await.unwrap(),
            data
        );
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (_temp_dir, storage) = setup();
        let result = storage.read("listeners/validation/info.json").await;
        assert!(matches!(result, Err(Error::StoragePathNotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_with_partial_name() {
        let (_temp_dir, storage) = setup();
        for epoch in [1, 2] {
            storage
                .write(
                    &format!("checkpoints/epoch-{:08}/state.ckpt", epoch),
                    Bytes::from("x"),
                )
                .await
                .unwrap();
        }
        storage.write("metrics.json", Bytes::from("{}")).await.unwrap();

        let keys = storage.list("checkpoints/epoch-").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "checkpoints/epoch-00000001/state.ckpt",
                "checkpoints/epoch-00000002/state.ckpt",
            ]
        );
        assert_eq!(storage.list("").await.unwrap().len(), 3);
        assert!(storage.list("missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_directory() {
        let (_temp_dir, storage) = setup();
        write_model(&storage, "checkpoints/epoch-00000001/model", "w1").await;

        storage.remove("checkpoints/epoch-00000001").await.unwrap();
        assert!(!storage.exists("checkpoints/epoch-00000001").await.unwrap());
        assert!(matches!(
            storage.remove("checkpoints/epoch-00000001").await,
            Err(Error::StoragePathNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_copy_prefix_overwrites() {
        let (_temp_dir, storage) = setup();
        write_model(&storage, "checkpoints/epoch-00000001/model", "w1").await;
        write_model(&storage, "checkpoints/epoch-00000002/model", "w2").await;
        storage
            .write("checkpoints/epoch-00000001/model/stale.bin", Bytes::from("old"))
            .await
            .unwrap();

        let copied = storage
            .copy_prefix("checkpoints/epoch-00000001/model", "best/map")
            .await
            .unwrap();
        assert_eq!(copied, 3);

        storage
            .copy_prefix("checkpoints/epoch-00000002/model", "best/map")
            .await
            .unwrap();
        assert_eq!(
            storage.read("best/map/weights.bin").await.unwrap(),
            Bytes::from("w2")
        );
        assert!(!storage.exists("best/map/stale.bin").await.unwrap());
        assert!(storage.exists("best/map/config/model.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_dir_empties() {
        let (_temp_dir, storage) = setup();
        write_model(&storage, "run/model", "w").await;

        let path = storage.prepare_dir("run/model").await.unwrap();
        assert!(path.is_dir());
        assert!(storage.list("run/model").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_staging_files_left() {
        let (temp_dir, storage) = setup();
        storage.write("a.json", Bytes::from("{}")).await.unwrap();
        write_model(&storage, "model", "w").await;
        storage.copy_prefix("model", "copy").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
