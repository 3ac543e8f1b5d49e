use std::collections::HashMap;

use tokio::sync::RwLock;

use noor_core::domain::session::{ConversationSession, SenderId};

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<SenderId, ConversationSession>>,
}

impl InMemorySessionRepository {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find(
        &self,
        sender_id: &SenderId,
    ) -> Result<Option<ConversationSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(sender_id).cloned())
    }

    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.sender_id.clone(), session);
        Ok(())
    }
}
