//! Conversation runtime for the clinic assistant.
//!
//! One inbound WhatsApp message becomes one turn:
//! 1. **Serialize** per sender (`locks`)
//! 2. **Classify** the message against the session (`intent`)
//! 3. **Advance** the booking flow, or delegate to the knowledge base or the
//!    free-form model (`upstream`, `llm`)
//! 4. **Guard** upstream text before it reaches the patient (`guardrails`)
//! 5. **Persist** the session exactly once and reply (`runtime`)
//!
//! The model never decides booking state. Slots, transitions and the final
//! booking request come from the deterministic flow in `noor-core`.

pub mod audit;
pub mod fakes;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod locks;
pub mod replies;
pub mod runtime;
pub mod upstream;

pub use intent::{Intent, IntentRouter};
pub use llm::{KnowledgeBase, LanguageModel, ModelContext};
pub use runtime::{Collaborators, InboundMessage, Orchestrator, OrchestratorSettings, OutboundReply};
pub use upstream::{AppointmentBook, PatientDirectory};
