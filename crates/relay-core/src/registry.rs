//! Registry of live relay sessions.
//!
//! Maps session ids to shared [`RelaySession`] instances. Lookups and
//! get-or-create are atomic with respect to each other, so two callers racing
//! on the same id always end up holding the same session. The registry never
//! closes transports; that is the session's job.

use crate::error::{RelayError, RelayResult};
use crate::ids::SessionId;
use crate::session::{RelaySession, SessionSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry of live relay sessions.
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<RelaySession>>>>,
    /// Upper bound on concurrently registered sessions. `0` means unlimited.
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create an empty registry with no session limit.
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    pub fn with_limit(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Return the session for `id`, creating it with `factory` if absent.
    ///
    /// The flag is `true` when this call created the session. `factory` runs
    /// under the write lock, at most once per created session.
    pub async fn get_or_create<F>(
        &self,
        id: SessionId,
        factory: F,
    ) -> RelayResult<(Arc<RelaySession>, bool)>
    where
        F: FnOnce() -> RelaySession,
    {
        if let Some(existing) = self.sessions.read().await.get(&id) {
            return Ok((existing.clone(), false));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&id) {
            return Ok((existing.clone(), false));
        }
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(RelayError::SessionLimitReached(self.max_sessions));
        }

        let session = Arc::new(factory());
        sessions.insert(id, session.clone());
        info!(session_id = %id, active = sessions.len(), "session created");
        Ok((session, true))
    }

    /// Look up a session without creating it.
    pub async fn try_get(&self, id: SessionId) -> Option<Arc<RelaySession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub async fn try_remove(&self, id: SessionId) -> Option<Arc<RelaySession>> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    /// Remove `id` only if it still maps to `session`.
    ///
    /// A handler cleaning up after its own session must not evict a newer
    /// session that reused the id.
    pub async fn remove_if_current(&self, id: SessionId, session: &Arc<RelaySession>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&id);
                debug!(session_id = %id, "session removed");
                true
            }
            _ => false,
        }
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of every registered session.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<RelaySession>> =
            self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<Arc<RelaySession>> {
        let mut sessions = self.sessions.write().await;
        let drained: Vec<_> = sessions.drain().map(|(_, session)| session).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "registry drained");
        }
        drained
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::AccessToken;

    fn factory(id: SessionId) -> impl FnOnce() -> RelaySession {
        move || RelaySession::new(id, AccessToken::new("t"))
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let registry = SessionRegistry::new();
        let id = SessionId::new_random();

        let (first, created) = registry.get_or_create(id, factory(id)).await.unwrap();
        assert!(created);
        let (second, created) = registry.get_or_create(id, factory(id)).await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = SessionId::new_random();
        registry.get_or_create(id, factory(id)).await.unwrap();

        assert!(registry.try_remove(id).await.is_some());
        assert!(registry.try_remove(id).await.is_none());
        assert!(registry.try_get(id).await.is_none());
    }

    #[tokio::test]
    async fn remove_if_current_spares_newer_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::new_random();
        let (old, _) = registry.get_or_create(id, factory(id)).await.unwrap();
        registry.try_remove(id).await;
        let (fresh, _) = registry.get_or_create(id, factory(id)).await.unwrap();

        assert!(!registry.remove_if_current(id, &old).await);
        assert!(registry.try_get(id).await.is_some());
        assert!(registry.remove_if_current(id, &fresh).await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn limit_blocks_new_sessions_only() {
        let registry = SessionRegistry::with_limit(1);
        let a = SessionId::new_random();
        let b = SessionId::new_random();
        registry.get_or_create(a, factory(a)).await.unwrap();

        assert!(matches!(
            registry.get_or_create(b, factory(b)).await,
            Err(RelayError::SessionLimitReached(1))
        ));
        // Existing ids are still reachable at the limit.
        assert!(registry.get_or_create(a, factory(a)).await.is_ok());
    }

    #[tokio::test]
    async fn drain_empties_and_list_reports() {
        let registry = SessionRegistry::new();
        for _ in 0..3 {
            let id = SessionId::new_random();
            registry.get_or_create(id, factory(id)).await.unwrap();
        }
        assert_eq!(registry.list().await.len(), 3);
        assert_eq!(registry.drain().await.len(), 3);
        assert_eq!(registry.count().await, 0);
    }
}
