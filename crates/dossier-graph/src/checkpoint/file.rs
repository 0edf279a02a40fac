//! Durable checkpoint store: one JSON file per session

use super::{Checkpoint, CheckpointError, CheckpointStore, SessionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores `<dir>/<session-id>.json`, written atomically via a temp file
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    /// Store rooted at a directory, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait::async_trait]
impl<S> CheckpointStore<S> for JsonFileCheckpointStore
where
    S: Serialize + DeserializeOwned + Send + Sync,
{
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        let path = self.path_for(&checkpoint.session_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            session = %checkpoint.session_id,
            path = %path.display(),
            "checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        let bytes = match tokio::fs::read(self.path_for(session_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint<S> = serde_json::from_slice(&bytes)?;
        if &checkpoint.session_id != session_id {
            return Err(CheckpointError::SessionMismatch {
                expected: session_id.clone(),
                found: checkpoint.session_id,
            });
        }
        Ok(Some(checkpoint))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
