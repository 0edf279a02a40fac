//! Session identity and bookkeeping

use super::{Checkpoint, CheckpointError, CheckpointStore, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hex characters kept from the identity hash
const ID_LEN: usize = 16;

/// Canonical form of a document identity
///
/// Trimmed, lowercased, `\` turned into `/`, repeated separators collapsed.
#[must_use]
pub fn normalize_identity(identity: &str) -> String {
    let lowered = identity.trim().to_lowercase().replace('\\', "/");
    let mut out = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Stable session id for an identity, optionally salted
///
/// The same identity without salt always yields the same id.
#[must_use]
pub fn generate_id(identity: &str, salt: Option<&str>) -> SessionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(normalize_identity(identity).as_bytes());
    if let Some(salt) = salt {
        hasher.update(&[0]);
        hasher.update(salt.as_bytes());
    }
    let hash = hasher.finalize();
    SessionId::new(hex::encode(&hash.as_bytes()[..ID_LEN / 2]))
}

/// Options for [`SessionManager::get_or_create`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Start a fresh session even if one exists for the identity
    pub force_new: bool,
}

impl SessionOptions {
    /// Options forcing a new session
    #[inline]
    #[must_use]
    pub fn fresh() -> Self {
        Self { force_new: true }
    }
}

/// Session bookkeeping returned to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Normalized identity the id was derived from
    pub identity: String,
    /// When the session was first seen
    pub created_at: DateTime<Utc>,
    /// Checkpoints saved for the session; a checkpoint found in the store
    /// when the session was loaded counts as one
    pub checkpoint_count: usize,
    /// An earlier session or checkpoint existed for this id
    pub resumed: bool,
}

/// Derives session ids and counts checkpoints per session
///
/// Wraps a [`CheckpointStore`] and is one itself, so it can be handed to the
/// engine directly.
pub struct SessionManager<S> {
    store: Arc<dyn CheckpointStore<S>>,
    sessions: DashMap<SessionId, SessionInfo>,
    counter: AtomicU64,
}

impl<S: Send + Sync + 'static> SessionManager<S> {
    /// Manager over a store
    pub fn new(store: Arc<dyn CheckpointStore<S>>) -> Self {
        Self {
            store,
            sessions: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    /// Session for an identity, created or resumed
    ///
    /// # Errors
    /// Propagates store failures while looking for an existing checkpoint.
    pub async fn get_or_create(
        &self,
        identity: &str,
        options: SessionOptions,
    ) -> Result<SessionInfo, CheckpointError> {
        let normalized = normalize_identity(identity);

        let id = if options.force_new {
            let seq = self.counter.fetch_add(1, Ordering::Relaxed);
            let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            generate_id(&normalized, Some(&format!("{nanos}-{seq}")))
        } else {
            generate_id(&normalized, None)
        };

        if !options.force_new {
            if let Some(mut existing) = self.sessions.get_mut(&id) {
                existing.resumed = true;
                return Ok(existing.clone());
            }
        }

        let stored = if options.force_new {
            None
        } else {
            self.store.load(&id).await?
        };

        let info = SessionInfo {
            id: id.clone(),
            identity: normalized,
            created_at: stored.as_ref().map_or_else(Utc::now, |c| c.saved_at),
            checkpoint_count: usize::from(stored.is_some()),
            resumed: stored.is_some(),
        };
        self.sessions.insert(id.clone(), info.clone());

        tracing::info!(
            session = %id,
            resumed = info.resumed,
            force_new = options.force_new,
            "session ready"
        );
        Ok(info)
    }

    /// Bookkeeping for a known session
    #[must_use]
    pub fn info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Number of sessions seen by this manager
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait::async_trait]
impl<S: Send + Sync + 'static> CheckpointStore<S> for SessionManager<S> {
    async fn save(&self, checkpoint: &Checkpoint<S>) -> Result<(), CheckpointError> {
        self.store.save(checkpoint).await?;
        self.sessions
            .entry(checkpoint.session_id.clone())
            .and_modify(|s| s.checkpoint_count += 1)
            .or_insert_with(|| SessionInfo {
                id: checkpoint.session_id.clone(),
                identity: String::new(),
                created_at: checkpoint.saved_at,
                checkpoint_count: 1,
                resumed: false,
            });
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<Checkpoint<S>>, CheckpointError> {
        self.store.load(session_id).await
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), CheckpointError> {
        self.store.delete(session_id).await?;
        self.sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::engine::Cursor;

    #[test]
    fn separators_and_case_normalize() {
        assert_eq!(generate_id("/a/B.org", None), generate_id("\\a\\b.org", None));
        assert_eq!(generate_id("  /a//b.org ", None), generate_id("/A/b.org", None));
        assert_eq!(normalize_identity("C:\\\\Docs\\Plan.org"), "c:/docs/plan.org");
    }

    #[test]
    fn salt_changes_id() {
        let plain = generate_id("/a/b.org", None);
        assert_ne!(generate_id("/a/b.org", Some("salt")), plain);
        assert_eq!(generate_id("/a/b.org", Some("salt")), generate_id("/a/b.org", Some("salt")));
        assert_eq!(plain.as_str().len(), 16);
        assert!(plain.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    fn manager() -> SessionManager<u32> {
        SessionManager::new(Arc::new(MemoryCheckpointStore::<u32>::new()))
    }

    #[tokio::test]
    async fn second_lookup_resumes() {
        let m = manager();
        let first = m.get_or_create("/docs/plan.org", SessionOptions::default()).await.expect("session");
        assert!(!first.resumed);
        let again = m.get_or_create("/DOCS/plan.org", SessionOptions::default()).await.expect("session");
        assert!(again.resumed);
        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn force_new_gives_distinct_ids() {
        let m = manager();
        let base = m.get_or_create("/docs/plan.org", SessionOptions::default()).await.expect("session");
        let a = m.get_or_create("/docs/plan.org", SessionOptions::fresh()).await.expect("session");
        let b = m.get_or_create("/docs/plan.org", SessionOptions::fresh()).await.expect("session");
        assert_ne!(a.id, base.id);
        assert_ne!(a.id, b.id);
        assert!(!a.resumed);
        assert_eq!(m.session_count(), 3);
    }

    #[tokio::test]
    async fn saves_are_counted_and_resume_from_store() {
        let store: Arc<dyn CheckpointStore<u32>> = Arc::new(MemoryCheckpointStore::<u32>::new());
        let m = SessionManager::new(Arc::clone(&store));
        let info = m.get_or_create("plan.org", SessionOptions::default()).await.expect("session");

        for step in 0..3 {
            let mut cursor = Cursor::start("a");
            cursor.step = step;
            m.save(&Checkpoint::new(info.id.clone(), cursor, 7)).await.expect("save");
        }
        assert_eq!(m.info(&info.id).map(|i| i.checkpoint_count), Some(3));

        // A new manager over the same store sees the checkpoint
        let other = SessionManager::new(store);
        let resumed = other.get_or_create("plan.org", SessionOptions::default()).await.expect("session");
        assert!(resumed.resumed);
        assert_eq!(resumed.checkpoint_count, 1);
        assert_eq!(
            other.load(&resumed.id).await.expect("load").map(|c| c.cursor.step),
            Some(2)
        );

        other.save(&Checkpoint::new(resumed.id.clone(), Cursor::start("b"), 9)).await.expect("save");
        assert_eq!(other.info(&resumed.id).map(|i| i.checkpoint_count), Some(2));
    }
}
