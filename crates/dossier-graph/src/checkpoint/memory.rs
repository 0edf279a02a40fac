//! In-process checkpoint store

use super::{Checkpoint, CheckpointError, CheckpointStore, SessionId};
use dashmap::DashMap;

/// Checkpoints held in memory for the lifetime of the store
#[derive(Debug)]
pub struct MemoryCheckpointStore<S> {
    checkpoints: DashMap<SessionId, Checkpoint<S>>,
}

impl<S> Default for MemoryCheckpointStore<S> {
    fn default() -> Self {
        Self {
            checkpoints: DashMap::new(),
        }
    }
}

impl<S> MemoryCheckpointStore<S> {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a checkpoint
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Whether no checkpoint is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait::async_trait]
impl<S> CheckpointStore<S> for MemoryCheckpointStore<S>
where
    S: Clone + Send + Sync,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), CheckpointError> {
        self.checkpoints
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        Ok(self.checkpoints.get(session_id).map(|c| c.value().clone()))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CheckpointError> {
        self.checkpoints.remove(session_id);
        Ok(())
    }
}
