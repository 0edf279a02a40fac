//! Checkpoints and sessions
//!
//! A [`Checkpoint`] is the engine cursor plus a full state snapshot, keyed by
//! a [`SessionId`]. Stores:
//! - [`MemoryCheckpointStore`] for a single process
//! - [`JsonFileCheckpointStore`] for one JSON file per session on disk
//!
//! [`SessionManager`] derives stable ids from a document identity and wraps
//! any store, counting saves per session.

mod file;
mod memory;
mod session;

pub use file::JsonFileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use session::{generate_id, normalize_identity, SessionInfo, SessionManager, SessionOptions};

use crate::engine::Cursor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable session identifier (16 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted snapshot taken after a stage completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    /// Owning session
    pub session_id: SessionId,
    /// Engine cursor at the time of the snapshot
    pub cursor: Cursor,
    /// Full state after the stage's update was merged
    pub state: S,
    /// Wall-clock time of the save
    pub saved_at: DateTime<Utc>,
}

impl<S> Checkpoint<S> {
    /// Snapshot stamped with the current time
    pub fn new(session_id: SessionId, cursor: Cursor, state: S) -> Self {
        Self {
            session_id,
            cursor,
            state,
            saved_at: Utc::now(),
        }
    }

    /// Whether resuming from this checkpoint has work left
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.cursor.next.is_some()
    }
}

/// Checkpoint persistence errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem failure
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint belongs to a different session than requested
    #[error("checkpoint for session {found} stored under {expected}")]
    SessionMismatch {
        /// Requested session
        expected: SessionId,
        /// Session recorded in the checkpoint
        found: SessionId,
    },
}

/// Checkpoint persistence
#[async_trait::async_trait]
pub trait CheckpointStore<S>: Send + Sync {
    /// Store the latest checkpoint for its session, replacing any earlier one
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), CheckpointError>;

    /// Latest checkpoint for a session
    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint<S>>, CheckpointError>;

    /// Forget a session's checkpoint; deleting an absent session is not an error
    async fn delete(&self, session_id: &SessionId) -> Result<(), CheckpointError>;
}
