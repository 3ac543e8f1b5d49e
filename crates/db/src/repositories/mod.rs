use async_trait::async_trait;
use thiserror::Error;

use noor_core::domain::session::{ConversationSession, SenderId};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Durable per-sender conversation state. Callers hold the sender's turn
/// lock across `find` and `save`; the store itself only guarantees that a
/// saved session reads back exactly.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, sender_id: &SenderId)
        -> Result<Option<ConversationSession>, RepositoryError>;
    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError>;
}
