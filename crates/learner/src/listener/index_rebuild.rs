use super::{listener_key, Listener, ListenerDecision, ListenerOutputs};
use crate::context::ListenerContext;
use async_trait::async_trait;
use std::sync::Arc;
use storage::StorageBackend;
use tracing::{debug, error, info};
use train_core::config::IndexingConfig;
use train_core::{Error, IndexBuilder, ListenerId, Result, TrainState};

const INDEX_FILE: &str = "index.dat";

/// Rebuilds the retrieval index with the current model
///
/// Each index is built inside the epoch directory, then copied to
/// `listeners/<id>/index.dat`, which outlives checkpoint retention and is
/// the key reported as the `index` output.
pub struct IndexRebuildListener {
    id: ListenerId,
    config: IndexingConfig,
    builder: Arc<dyn IndexBuilder>,
    last_index: Option<String>,
}

impl IndexRebuildListener {
    pub fn new(
        id: impl Into<ListenerId>,
        config: IndexingConfig,
        builder: Arc<dyn IndexBuilder>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: id.into(),
            config,
            builder,
            last_index: None,
        })
    }

    fn index_dir(&self, state: &TrainState) -> String {
        format!("{}/{}", state.path, listener_key(&self.id))
    }

    fn current_key(&self) -> String {
        format!("{}/{}", listener_key(&self.id), INDEX_FILE)
    }
}

#[async_trait]
impl Listener for IndexRebuildListener {
    fn id(&self) -> &ListenerId {
        &self.id
    }

    async fn initialize(&mut self, context: &mut ListenerContext<'_>) -> Result<()> {
        let key = self.current_key();
        self.last_index = if context.storage.exists(&key).await? {
            debug!(listener = %self.id, key = %key, "Restored current index");
            Some(key)
        } else {
            None
        };
        Ok(())
    }

    async fn on_epoch_end(
        &mut self,
        state: &TrainState,
        context: &mut ListenerContext<'_>,
    ) -> Result<ListenerDecision> {
        if state.epoch % self.config.indexing_interval != 0 {
            return Ok(ListenerDecision::NoDecision);
        }

        let dir_key = self.index_dir(state);
        let path = context.storage.prepare_dir(&dir_key).await?.join(INDEX_FILE);
        info!(listener = %self.id, epoch = state.epoch, path = %path.display(), "Rebuilding index");

        if let Err(e) = self.builder.rebuild(&path).await {
            error!(listener = %self.id, error = %e, "Index rebuild failed");
            return Err(Error::IndexRebuild {
                path: path.display().to_string(),
                message: e.to_string(),
            });
        }

        let current = self.current_key();
        context
            .storage
            .copy_prefix(&format!("{}/{}", dir_key, INDEX_FILE), &current)
            .await?;
        self.last_index = Some(current);
        Ok(ListenerDecision::NoDecision)
    }

    fn outputs(&self) -> ListenerOutputs {
        self.last_index
            .iter()
            .map(|key| ("index".to_string(), key.clone()))
            .collect()
    }
}
