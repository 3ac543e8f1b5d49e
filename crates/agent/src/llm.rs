use async_trait::async_trait;

use noor_core::domain::session::{ConversationSession, ConversationTurn, Language};
use noor_core::errors::UpstreamError;
use noor_core::flows::BookingState;

/// Raw turns handed to the model next to the rolling summary.
const RECENT_TURNS: usize = 6;

/// Everything the free-form model sees for one reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelContext {
    pub language: Language,
    pub summary: String,
    pub recent_turns: Vec<ConversationTurn>,
    pub booking_state: BookingState,
    pub message: String,
}

impl ModelContext {
    pub fn from_session(session: &ConversationSession, message: &str) -> Self {
        let skip = session.history.len().saturating_sub(RECENT_TURNS);
        Self {
            language: session.language,
            summary: session.summary.clone(),
            recent_turns: session.history[skip..].to_vec(),
            booking_state: session.booking.state,
            message: message.to_owned(),
        }
    }

    pub fn system_prompt(&self) -> String {
        let language = match self.language {
            Language::Arabic => "Arabic (Levantine, friendly)",
            Language::English => "English",
        };
        let mut prompt = format!(
            "You are Noor, the WhatsApp assistant of a dental clinic. Reply in {language}, in at \
             most three short sentences. Never promise appointment times, prices or doctors: \
             bookings are handled by a separate system. If the patient wants to book, tell them \
             to say which service they need.\nCurrent booking state: {}.",
            self.booking_state.as_str()
        );
        if !self.summary.is_empty() {
            prompt.push_str("\nEarlier conversation:\n");
            prompt.push_str(&self.summary);
        }
        prompt
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, context: &ModelContext) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn answer(&self, query: &str, language: Language) -> Result<String, UpstreamError>;
}
