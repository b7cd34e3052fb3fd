//! Review session persistence
//!
//! Holds sessions parked in the human-wait state so a later request can
//! resume them by id. Currently in-memory; the trait leaves room for a
//! durable backend.

use crate::models::ReviewSession;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: ReviewSession) -> Result<()>;
    async fn load(&self, session_id: Uuid) -> Result<Option<ReviewSession>>;
    async fn remove(&self, session_id: Uuid) -> Result<()>;
    async fn pending_ids(&self) -> Result<Vec<Uuid>>;
}

/// In-memory session store for development
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, ReviewSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: ReviewSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, session);
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<ReviewSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn remove(&self, session_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id);
        Ok(())
    }

    async fn pending_ids(&self) -> Result<Vec<Uuid>> {
        let sessions = self.sessions.read().await;

        let mut items: Vec<_> = sessions
            .values()
            .map(|session| (session.session_id, session.created_at))
            .collect();

        // Sort by timestamp ascending
        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }
}
