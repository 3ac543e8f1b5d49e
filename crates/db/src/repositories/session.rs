use chrono::Utc;
use sqlx::Row;

use noor_core::domain::session::{ConversationSession, SenderId};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

/// SQLite-backed session store. The full session is kept as JSON in
/// `payload_json` so slot values round-trip exactly; the remaining columns
/// are denormalized for operators and indexes.
pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationSession, RepositoryError> {
    let sender_id: String =
        row.try_get("sender_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let payload_json: String =
        row.try_get("payload_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let session: ConversationSession = serde_json::from_str(&payload_json).map_err(|error| {
        RepositoryError::Decode(format!("invalid session payload for `{sender_id}`: {error}"))
    })?;

    if session.sender_id.0 != sender_id {
        return Err(RepositoryError::Decode(format!(
            "session payload belongs to `{}` but is stored under `{sender_id}`",
            session.sender_id
        )));
    }

    Ok(session)
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(
        &self,
        sender_id: &SenderId,
    ) -> Result<Option<ConversationSession>, RepositoryError> {
        let row = sqlx::query(
            "SELECT sender_id, payload_json FROM conversation_session WHERE sender_id = ?",
        )
        .bind(&sender_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_session(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError> {
        let payload_json = serde_json::to_string(&session)
            .map_err(|error| RepositoryError::Decode(format!("encode session: {error}")))?;
        let turn_count = i64::try_from(session.turn_count).map_err(|_| {
            RepositoryError::Decode(format!("turn_count out of range: {}", session.turn_count))
        })?;

        sqlx::query(
            "INSERT INTO conversation_session (sender_id, booking_state, language, summary,
                                               payload_json, turn_count, last_activity,
                                               created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sender_id) DO UPDATE SET
                 booking_state = excluded.booking_state,
                 language = excluded.language,
                 summary = excluded.summary,
                 payload_json = excluded.payload_json,
                 turn_count = excluded.turn_count,
                 last_activity = excluded.last_activity,
                 updated_at = excluded.updated_at",
        )
        .bind(&session.sender_id.0)
        .bind(session.booking.state.as_str())
        .bind(session.language.as_str())
        .bind(&session.summary)
        .bind(&payload_json)
        .bind(turn_count)
        .bind(session.last_activity.to_rfc3339())
        .bind(session.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
