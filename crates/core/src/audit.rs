use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::SenderId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Flow,
    Directory,
    Appointment,
}

/// Everything the orchestrator records about a booking conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TransitionApplied,
    TransitionRejected,
    DirectoryLookup,
    AppointmentSubmitted,
    InvariantViolation,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransitionApplied => "flow.transition_applied",
            Self::TransitionRejected => "flow.transition_rejected",
            Self::DirectoryLookup => "directory.lookup",
            Self::AppointmentSubmitted => "appointment.submitted",
            Self::InvariantViolation => "booking.invariant_violation",
        }
    }

    pub fn category(self) -> AuditCategory {
        match self {
            Self::TransitionApplied | Self::TransitionRejected | Self::InvariantViolation => {
                AuditCategory::Flow
            }
            Self::DirectoryLookup => AuditCategory::Directory,
            Self::AppointmentSubmitted => AuditCategory::Appointment,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Who a turn belongs to; shared by every event the turn emits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub sender_id: Option<SenderId>,
    pub correlation_id: String,
    pub actor: &'static str,
}

impl AuditContext {
    pub fn new(
        sender_id: Option<SenderId>,
        correlation_id: impl Into<String>,
        actor: &'static str,
    ) -> Self {
        Self { sender_id, correlation_id: correlation_id.into(), actor }
    }

    pub fn record(&self, action: AuditAction, outcome: AuditOutcome) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            sender_id: self.sender_id.clone(),
            correlation_id: self.correlation_id.clone(),
            action,
            actor: self.actor.to_owned(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub sender_id: Option<SenderId>,
    pub correlation_id: String,
    pub action: AuditAction,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Keeps emitted events for assertions in tests.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.guard().clone()
    }

    pub fn of(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.guard().iter().filter(|event| event.action == action).cloned().collect()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.guard().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AuditAction, AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink,
    };
    use crate::domain::session::SenderId;

    #[test]
    fn turn_context_stamps_every_event_it_records() {
        let sink = InMemoryAuditSink::default();
        let turn =
            AuditContext::new(Some(SenderId("970591234567".to_owned())), "wamid.77", "orchestrator");

        sink.emit(
            turn.record(AuditAction::DirectoryLookup, AuditOutcome::Success)
                .with_metadata("result", "not_found"),
        );
        sink.emit(
            turn.record(AuditAction::AppointmentSubmitted, AuditOutcome::Failed)
                .with_metadata("error", "appointments timed out"),
        );

        let lookups = sink.of(AuditAction::DirectoryLookup);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].detail("result"), Some("not_found"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.correlation_id == "wamid.77"));
        assert!(events
            .iter()
            .all(|event| event.sender_id.as_ref().map(SenderId::as_str) == Some("970591234567")));
        assert_ne!(events[0].event_id, events[1].event_id);
        assert_eq!(events[1].outcome, AuditOutcome::Failed);
    }

    #[test]
    fn actions_carry_their_log_name_and_category() {
        let expected = [
            (AuditAction::TransitionApplied, "flow.transition_applied", AuditCategory::Flow),
            (AuditAction::TransitionRejected, "flow.transition_rejected", AuditCategory::Flow),
            (AuditAction::DirectoryLookup, "directory.lookup", AuditCategory::Directory),
            (AuditAction::AppointmentSubmitted, "appointment.submitted", AuditCategory::Appointment),
            (AuditAction::InvariantViolation, "booking.invariant_violation", AuditCategory::Flow),
        ];
        for (action, name, category) in expected {
            assert_eq!(action.as_str(), name);
            assert_eq!(action.category(), category);
        }
    }
}
