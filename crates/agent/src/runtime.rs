use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};
use uuid::Uuid;

use noor_core::audit::{AuditAction, AuditContext, AuditOutcome, AuditSink};
use noor_core::config::AppConfig;
use noor_core::domain::booking::{BookingDraft, BookingRequest, ConfirmedBooking, Slot};
use noor_core::domain::patient::DirectoryLookupResult;
use noor_core::domain::session::{
    ConversationSession, ConversationTurn, Language, MemoryPolicy, SenderId,
};
use noor_core::errors::{ApplicationError, DomainError};
use noor_core::flows::{
    parse_input, BookingEvent, BookingFlow, BookingInput, BookingState, FlowContext, FlowEngine,
    TransitionOutcome,
};
use noor_core::phone::normalize_phone;
use noor_db::repositories::{RepositoryError, SessionRepository};

use crate::guardrails::OutputGuard;
use crate::intent::{Intent, IntentRouter};
use crate::llm::{KnowledgeBase, LanguageModel, ModelContext};
use crate::locks::SessionLocks;
use crate::replies::ReplyComposer;
use crate::upstream::{
    call_with_timeout, lookup_with_timeout, AppointmentBook, PatientDirectory, APPOINTMENT_BOOK,
    KNOWLEDGE_BASE, LANGUAGE_MODEL,
};

const ACTOR: &str = "orchestrator";

/// One validated inbound message, as handed over by the webhook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender_id: SenderId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub language_hint: Option<Language>,
    pub message_id: Option<String>,
    pub correlation_id: String,
}

impl InboundMessage {
    pub fn new(sender_id: SenderId, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender_id,
            text: text.into(),
            timestamp,
            language_hint: None,
            message_id: None,
            correlation_id: format!("turn-{}", Uuid::new_v4()),
        }
    }

    pub fn with_language_hint(mut self, language: Option<Language>) -> Self {
        self.language_hint = language;
        self
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub reply_text: String,
    pub intent: Option<Intent>,
    pub booking_state: BookingState,
    /// Set when the message repeated an already answered delivery.
    pub duplicate: bool,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub memory: MemoryPolicy,
    pub reset_phrases: Vec<String>,
    pub max_reply_chars: usize,
    pub directory_timeout: Duration,
    pub appointments_timeout: Duration,
    pub knowledge_base_timeout: Duration,
    pub model_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let config = AppConfig::default();
        Self::from_config(&config)
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            memory: config.conversation.memory_policy(),
            reset_phrases: config.conversation.reset_phrases.all().map(str::to_owned).collect(),
            max_reply_chars: config.conversation.max_reply_chars,
            directory_timeout: config.directory.timeout(),
            appointments_timeout: config.appointments.timeout(),
            knowledge_base_timeout: config.knowledge_base.timeout(),
            model_timeout: config.llm.timeout(),
        }
    }
}

/// Capabilities the orchestrator borrows for every turn.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionRepository>,
    pub directory: Arc<dyn PatientDirectory>,
    pub appointments: Arc<dyn AppointmentBook>,
    pub knowledge_base: Arc<dyn KnowledgeBase>,
    pub model: Arc<dyn LanguageModel>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct Orchestrator {
    engine: FlowEngine<BookingFlow>,
    router: IntentRouter,
    replies: ReplyComposer,
    guard: OutputGuard,
    locks: SessionLocks,
    settings: OrchestratorSettings,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(
        flow: BookingFlow,
        settings: OrchestratorSettings,
        collaborators: Collaborators,
    ) -> Self {
        let router = IntentRouter::new(
            settings.reset_phrases.clone(),
            flow.catalog().clone(),
            flow.roster().clone(),
            flow.timezone(),
        );
        let replies =
            ReplyComposer::new(flow.catalog().clone(), flow.roster().clone(), flow.hours().clone());
        Self {
            engine: FlowEngine::new(flow),
            router,
            replies,
            guard: OutputGuard::new(settings.max_reply_chars),
            locks: SessionLocks::default(),
            settings,
            collaborators,
        }
    }

    pub fn from_config(config: &AppConfig, collaborators: Collaborators) -> Self {
        let flow = BookingFlow::new(
            config.clinic.catalog(),
            config.clinic.roster(),
            config.clinic.business_hours(),
            config.conversation.timezone,
        );
        Self::new(flow, OrchestratorSettings::from_config(config), collaborators)
    }

    pub fn timezone(&self) -> Tz {
        self.engine.flow().timezone()
    }

    /// Runs one turn for a sender: load or create the session, route the
    /// message, advance the booking or delegate, then persist once and
    /// reply. Turns of the same sender never overlap.
    pub async fn handle_turn(
        &self,
        message: InboundMessage,
    ) -> Result<OutboundReply, ApplicationError> {
        let _turn = self.locks.acquire(&message.sender_id).await;
        let sender_id = message.sender_id.clone();
        let correlation_id = message.correlation_id.clone();

        info!(
            event_name = "turn.received",
            correlation_id = %correlation_id,
            sender_id = %sender_id,
            "inbound turn received"
        );

        let stored = self.collaborators.sessions.find(&sender_id).await.map_err(persistence)?;
        let mut session = match stored {
            Some(session) => session,
            None => ConversationSession::new(
                sender_id.clone(),
                message
                    .language_hint
                    .or_else(|| Language::detect(&message.text))
                    .unwrap_or_default(),
                message.timestamp,
            ),
        };

        if let (Some(message_id), Some(last_reply)) =
            (message.message_id.as_deref(), session.last_reply.as_ref())
        {
            if session.last_message_id.as_deref() == Some(message_id) {
                info!(
                    event_name = "turn.duplicate",
                    correlation_id = %correlation_id,
                    sender_id = %sender_id,
                    message_id,
                    "repeated delivery answered from session"
                );
                return Ok(OutboundReply {
                    reply_text: last_reply.clone(),
                    intent: None,
                    booking_state: session.booking.state,
                    duplicate: true,
                });
            }
        }

        if session.is_idle(message.timestamp, &self.settings.memory) {
            session.roll_over_idle(&self.settings.memory);
        }
        session.language = message
            .language_hint
            .or_else(|| Language::detect(&message.text))
            .unwrap_or(session.language);

        let audit = AuditContext::new(Some(sender_id.clone()), correlation_id.clone(), ACTOR);
        let intent = self.router.classify(&message.text, &session);
        let reply = match intent {
            Intent::Reset => self.reset(&mut session, message.timestamp, &audit),
            Intent::BookingContinue => {
                self.continue_booking(&mut session, &message.text, message.timestamp, &audit).await
            }
            Intent::KnowledgeQuery => self.answer_question(&session, &message.text).await,
            Intent::Freeform => self.chat(&session, &message.text).await,
        };
        let reply = self.guard.truncate(&reply);

        session.last_message_id = message.message_id.clone();
        session.last_reply = Some(reply.clone());
        session.record_turn(
            ConversationTurn {
                at: message.timestamp,
                user: message.text.clone(),
                assistant: reply.clone(),
                intent: intent.as_str().to_owned(),
            },
            &self.settings.memory,
        );

        let booking_state = session.booking.state;
        self.collaborators.sessions.save(session).await.map_err(persistence)?;

        info!(
            event_name = "turn.persisted",
            correlation_id = %correlation_id,
            sender_id = %sender_id,
            intent = intent.as_str(),
            booking_state = booking_state.as_str(),
            "turn persisted"
        );

        Ok(OutboundReply { reply_text: reply, intent: Some(intent), booking_state, duplicate: false })
    }

    fn reset(
        &self,
        session: &mut ConversationSession,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> String {
        let language = session.language;
        if session.booking.state.is_terminal() {
            session.booking = BookingDraft::default();
            return self.replies.nothing_to_cancel(language);
        }

        let started = session.booking.is_active();
        match self.apply(session, &BookingEvent::CancelRequested, now, audit) {
            Ok(outcome) => {
                apply_outcome(session, &outcome);
                if started {
                    self.replies.cancelled(language)
                } else {
                    self.replies.nothing_to_cancel(language)
                }
            }
            Err(reply) => reply,
        }
    }

    async fn continue_booking(
        &self,
        session: &mut ConversationSession,
        text: &str,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> String {
        let language = session.language;
        if session.booking.state.is_terminal() {
            if session.booking.state == BookingState::Confirmed
                && parse_input(text) == BookingInput::Affirm
            {
                if let Some(confirmed) = &session.confirmed {
                    return self.replies.already_confirmed(confirmed, language);
                }
            }
            session.booking = BookingDraft::default();
        }

        let outcome =
            match self.apply(session, &BookingEvent::Message(text.to_owned()), now, audit) {
                Ok(outcome) => outcome,
                Err(reply) => return reply,
            };

        let lead = outcome
            .rejection
            .as_ref()
            .map(|rejection| self.replies.rejection(&rejection.reason, language));

        let body = match outcome.to {
            BookingState::Confirmed => return self.submit(session, &outcome, now, audit).await,
            BookingState::LookupPatient => {
                apply_outcome(session, &outcome);
                return self.lookup_patient(session, now, audit).await;
            }
            _ => {
                apply_outcome(session, &outcome);
                self.prompt_for_state(session, outcome.rejection.is_some())
            }
        };

        match lead {
            Some(lead) if !body.is_empty() && !body.starts_with(&lead) => {
                format!("{lead} {body}")
            }
            Some(lead) => lead,
            None => body,
        }
    }

    /// Asks the directory about the sender unless a profile is already
    /// cached. Upstream failures leave the draft at the lookup point.
    async fn lookup_patient(
        &self,
        session: &mut ConversationSession,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> String {
        let language = session.language;
        let mut greeting = None;

        let event = match session.patient.as_ref() {
            Some(profile) => BookingEvent::PatientFound(profile.patient_id.clone()),
            None => {
                let identifier = normalize_phone(session.sender_id.as_str());
                let result = lookup_with_timeout(
                    self.collaborators.directory.as_ref(),
                    &identifier,
                    self.settings.directory_timeout,
                )
                .await;
                self.audit_directory(audit, &result);
                match result {
                    DirectoryLookupResult::Found(profile) => {
                        greeting = profile.name.clone();
                        let event = BookingEvent::PatientFound(profile.patient_id.clone());
                        session.patient = Some(profile);
                        event
                    }
                    DirectoryLookupResult::NotFound => BookingEvent::PatientNotFound,
                    DirectoryLookupResult::UpstreamError(reason) => {
                        warn!(
                            event_name = "directory.lookup_failed",
                            correlation_id = %audit.correlation_id,
                            sender_id = %session.sender_id,
                            reason = %reason,
                            "patient directory unavailable; booking stays at lookup"
                        );
                        return self.replies.directory_retry(language);
                    }
                }
            }
        };

        let outcome = match self.apply(session, &event, now, audit) {
            Ok(outcome) => outcome,
            Err(reply) => return reply,
        };
        apply_outcome(session, &outcome);

        let body = match outcome.event {
            BookingEvent::PatientNotFound => self.replies.directory_miss(language),
            _ => self.prompt_for_state(session, false),
        };
        match greeting {
            Some(name) => format!("{} {body}", self.replies.welcome_back(&name, language)),
            None => body,
        }
    }

    /// Builds the booking request from the affirmed draft and submits it.
    /// Only a successful submission moves the session to `CONFIRMED`.
    async fn submit(
        &self,
        session: &mut ConversationSession,
        outcome: &TransitionOutcome,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> String {
        let language = session.language;
        let flow = self.engine.flow();
        let request = match BookingRequest::from_slots(
            &session.sender_id,
            &outcome.slots,
            flow.hours(),
            flow.timezone(),
            now,
        ) {
            Ok(request) => request,
            Err(violation) => {
                self.report_invariant_violation(audit, &violation);
                return self.replies.apology(language);
            }
        };

        let submitted = call_with_timeout(
            APPOINTMENT_BOOK,
            self.settings.appointments_timeout,
            self.collaborators.appointments.submit(&request),
        )
        .await;

        match submitted {
            Ok(receipt) => {
                self.collaborators.audit.emit(
                    audit
                        .record(AuditAction::AppointmentSubmitted, AuditOutcome::Success)
                        .with_metadata("request_id", request.id.0.clone())
                        .with_metadata("reference", receipt.reference.clone()),
                );
                apply_outcome(session, outcome);
                let confirmed = ConfirmedBooking { request, receipt };
                let reply = self.replies.confirmed(&confirmed, language);
                session.confirmed = Some(confirmed);
                reply
            }
            Err(upstream) => {
                warn!(
                    event_name = "appointment.submit_failed",
                    correlation_id = %audit.correlation_id,
                    sender_id = %session.sender_id,
                    error = %upstream,
                    "appointment submission failed; booking stays ready to confirm"
                );
                self.collaborators.audit.emit(
                    audit
                        .record(AuditAction::AppointmentSubmitted, AuditOutcome::Failed)
                        .with_metadata("error", upstream.to_string()),
                );
                self.replies.submit_retry(language)
            }
        }
    }

    async fn answer_question(&self, session: &ConversationSession, text: &str) -> String {
        let language = session.language;
        let answered = call_with_timeout(
            KNOWLEDGE_BASE,
            self.settings.knowledge_base_timeout,
            self.collaborators.knowledge_base.answer(text, language),
        )
        .await;

        let answer = match answered {
            Ok(answer) => match self.guard.sanitize(&answer) {
                Some(answer) => answer,
                None => self.replies.upstream_retry(language),
            },
            Err(upstream) => {
                warn!(
                    event_name = "knowledge_base.failed",
                    sender_id = %session.sender_id,
                    error = %upstream,
                    "knowledge base unavailable"
                );
                self.replies.upstream_retry(language)
            }
        };

        if session.booking.is_active() {
            let resume = self.prompt_for_state(session, false);
            if !resume.is_empty() {
                return format!("{answer}\n\n{resume}");
            }
        }
        answer
    }

    async fn chat(&self, session: &ConversationSession, text: &str) -> String {
        let language = session.language;
        let context = ModelContext::from_session(session, text);
        let generated = call_with_timeout(
            LANGUAGE_MODEL,
            self.settings.model_timeout,
            self.collaborators.model.generate(&context),
        )
        .await;

        match generated {
            Ok(reply) => {
                self.guard.sanitize(&reply).unwrap_or_else(|| self.replies.upstream_retry(language))
            }
            Err(upstream) => {
                warn!(
                    event_name = "model.failed",
                    sender_id = %session.sender_id,
                    error = %upstream,
                    "language model unavailable"
                );
                self.replies.upstream_retry(language)
            }
        }
    }

    /// Runs one flow transition. Transition errors are programming errors
    /// here; they are logged and answered with an apology.
    fn apply(
        &self,
        session: &ConversationSession,
        event: &BookingEvent,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, String> {
        self.engine
            .apply_with_audit(
                &session.booking,
                event,
                &FlowContext::at(now),
                self.collaborators.audit.as_ref(),
                audit,
            )
            .map_err(|transition| {
                self.report_invariant_violation(audit, &DomainError::from(transition));
                self.replies.apology(session.language)
            })
    }

    fn prompt_for_state(&self, session: &ConversationSession, rejected: bool) -> String {
        let language = session.language;
        match session.booking.state {
            BookingState::ReadyToConfirm if rejected => String::new(),
            BookingState::ReadyToConfirm => {
                self.replies.confirmation_summary(&session.booking.slots, language)
            }
            BookingState::Cancelled => self.replies.cancelled(language),
            BookingState::Init => self.replies.prompt_for(Slot::Service, language),
            BookingState::LookupPatient => self.replies.directory_retry(language),
            state => state
                .awaited_slot()
                .map(|slot| self.replies.prompt_for(slot, language))
                .unwrap_or_default(),
        }
    }

    fn audit_directory(&self, audit: &AuditContext, result: &DirectoryLookupResult) {
        let (outcome, label) = match result {
            DirectoryLookupResult::Found(_) => (AuditOutcome::Success, "found"),
            DirectoryLookupResult::NotFound => (AuditOutcome::Success, "not_found"),
            DirectoryLookupResult::UpstreamError(_) => (AuditOutcome::Failed, "upstream_error"),
        };
        self.collaborators.audit.emit(
            audit.record(AuditAction::DirectoryLookup, outcome).with_metadata("result", label),
        );
    }

    fn report_invariant_violation(&self, audit: &AuditContext, violation: &DomainError) {
        error!(
            event_name = "booking.invariant_violation",
            correlation_id = %audit.correlation_id,
            sender_id = audit.sender_id.as_ref().map(SenderId::as_str).unwrap_or(""),
            error = %violation,
            "booking invariant violated"
        );
        self.collaborators.audit.emit(
            audit
                .record(AuditAction::InvariantViolation, AuditOutcome::Failed)
                .with_metadata("error", violation.to_string()),
        );
    }
}

fn apply_outcome(session: &mut ConversationSession, outcome: &TransitionOutcome) {
    session.booking = BookingDraft {
        state: outcome.to,
        slots: outcome.slots.clone(),
        directory_miss: outcome.directory_miss,
    };
}

fn persistence(error: RepositoryError) -> ApplicationError {
    error!(event_name = "turn.persistence_failed", error = %error, "session store failure");
    ApplicationError::Persistence(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};

    use noor_core::audit::{AuditAction, InMemoryAuditSink};
    use noor_core::domain::patient::{PatientId, PatientProfile};
    use noor_core::domain::session::{ConversationSession, Language, SenderId};
    use noor_core::errors::ApplicationError;
    use noor_core::flows::{BookingFlow, BookingState};
    use noor_db::repositories::{InMemorySessionRepository, RepositoryError, SessionRepository};

    use super::{Collaborators, InboundMessage, Orchestrator, OrchestratorSettings};
    use crate::fakes::{
        RecordingAppointmentBook, StaticKnowledgeBase, StaticLanguageModel, StaticPatientDirectory,
    };
    use crate::intent::Intent;

    const SENDER: &str = "970591234567";

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        sessions: Arc<dyn SessionRepository>,
        directory: Arc<StaticPatientDirectory>,
        appointments: Arc<RecordingAppointmentBook>,
        knowledge_base: Arc<StaticKnowledgeBase>,
        audit: InMemoryAuditSink,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(StaticPatientDirectory::default(), Arc::new(InMemorySessionRepository::default()))
        }

        fn with(directory: StaticPatientDirectory, sessions: Arc<dyn SessionRepository>) -> Self {
            let directory = Arc::new(directory);
            let appointments = Arc::new(RecordingAppointmentBook::default());
            let knowledge_base = Arc::new(StaticKnowledgeBase::default());
            let audit = InMemoryAuditSink::default();
            let collaborators = Collaborators {
                sessions: sessions.clone(),
                directory: directory.clone(),
                appointments: appointments.clone(),
                knowledge_base: knowledge_base.clone(),
                model: Arc::new(StaticLanguageModel::default()),
                audit: Arc::new(audit.clone()),
            };
            let orchestrator = Orchestrator::new(
                BookingFlow::default(),
                OrchestratorSettings::default(),
                collaborators,
            );
            Self {
                orchestrator: Arc::new(orchestrator),
                sessions,
                directory,
                appointments,
                knowledge_base,
                audit,
            }
        }

        async fn say(&self, text: &str) -> super::OutboundReply {
            self.say_at(text, wednesday()).await
        }

        async fn say_at(&self, text: &str, at: DateTime<Utc>) -> super::OutboundReply {
            self.orchestrator
                .handle_turn(InboundMessage::new(sender(), text, at))
                .await
                .expect("turn succeeds")
        }

        async fn session(&self) -> ConversationSession {
            self.sessions.find(&sender()).await.expect("find").expect("session exists")
        }
    }

    fn sender() -> SenderId {
        SenderId(SENDER.into())
    }

    // Wednesday 2026-10-14, 10:00 in Hebron.
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 7, 0, 0).single().expect("valid instant")
    }

    fn profile(patient_id: &str, name: &str) -> PatientProfile {
        PatientProfile {
            patient_id: PatientId(patient_id.into()),
            name: Some(name.into()),
            phone: Some("0591234567".into()),
            gender: None,
        }
    }

    #[tokio::test]
    async fn full_booking_scenario_with_directory_miss() {
        let harness = Harness::new();

        let reply = harness.say("I want a dental cleaning").await;
        assert_eq!(reply.intent, Some(Intent::BookingContinue));
        assert_eq!(reply.booking_state, BookingState::AwaitDate);
        let session = harness.session().await;
        assert_eq!(
            session.booking.slots.service.as_ref().map(|service| service.name.as_str()),
            Some("Dental cleaning")
        );

        let reply = harness.say("next Monday").await;
        assert_eq!(reply.booking_state, BookingState::AwaitTime);
        assert_eq!(harness.session().await.booking.slots.date, NaiveDate::from_ymd_opt(2026, 10, 19));

        let reply = harness.say("3pm").await;
        assert_eq!(reply.booking_state, BookingState::AwaitDoctor);

        let reply = harness.say("Dr. Samer").await;
        assert_eq!(reply.booking_state, BookingState::AwaitPatientId);
        assert!(reply.reply_text.contains("couldn't find a patient file"));
        assert_eq!(harness.directory.lookups(), vec!["0591234567".to_owned()]);

        let reply = harness.say("401234567").await;
        assert_eq!(reply.booking_state, BookingState::ReadyToConfirm);
        assert!(reply.reply_text.contains("Shall I confirm"));

        let reply = harness.say("yes").await;
        assert_eq!(reply.booking_state, BookingState::Confirmed);
        assert!(reply.reply_text.contains("APT-0001"));

        let submitted = harness.appointments.submitted();
        assert_eq!(submitted.len(), 1);
        let request = &submitted[0];
        assert_eq!(request.service.code, "dental_cleaning");
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date"));
        assert_eq!(request.time, NaiveTime::from_hms_opt(15, 0, 0).expect("valid time"));
        assert_eq!(request.doctor, "Dr. Samer");
        assert_eq!(request.patient_id, PatientId("401234567".into()));

        let session = harness.session().await;
        assert_eq!(session.turn_count, 6);
        assert!(session.confirmed.is_some());
    }

    #[tokio::test]
    async fn repeated_confirmation_never_submits_twice() {
        let harness = Harness::new();
        for text in ["I want a dental cleaning", "next Monday", "3pm", "Dr. Samer", "401234567", "yes"]
        {
            harness.say(text).await;
        }

        let reply = harness.say("yes").await;

        assert_eq!(reply.booking_state, BookingState::Confirmed);
        assert!(reply.reply_text.contains("already confirmed"));
        assert_eq!(harness.appointments.submitted().len(), 1);
    }

    #[tokio::test]
    async fn directory_hit_skips_patient_id_and_is_cached() {
        let directory =
            StaticPatientDirectory::default().with_patient("0591234567", profile("998877665", "Sara"));
        let harness =
            Harness::with(directory, Arc::new(InMemorySessionRepository::default()));

        harness.say("book a checkup").await;
        harness.say("tomorrow").await;
        harness.say("at 11").await;
        let reply = harness.say("any doctor").await;

        assert_eq!(reply.booking_state, BookingState::ReadyToConfirm);
        assert!(reply.reply_text.starts_with("Welcome back, Sara!"));
        assert_eq!(
            harness.session().await.booking.slots.patient_id,
            Some(PatientId("998877665".into()))
        );

        harness.say("yes").await;
        for text in ["book a follow up", "tomorrow", "at 12", "Dr. Lina"] {
            harness.say(text).await;
        }
        assert_eq!(harness.session().await.booking.state, BookingState::ReadyToConfirm);
        assert_eq!(harness.directory.lookups().len(), 1, "profile is cached on the session");
    }

    #[tokio::test]
    async fn directory_outage_keeps_booking_at_lookup_and_retries() {
        let harness = Harness::new();
        harness.directory.set_failing(true);

        for text in ["I want a dental cleaning", "next Monday", "3pm"] {
            harness.say(text).await;
        }
        let reply = harness.say("Dr. Samer").await;

        assert_eq!(reply.booking_state, BookingState::LookupPatient);
        assert!(reply.reply_text.contains("patient records"));
        let session = harness.session().await;
        assert_eq!(session.booking.slots.doctor.as_deref(), Some("Dr. Samer"));
        assert!(session.booking.slots.patient_id.is_none());

        harness.directory.set_failing(false);
        let reply = harness.say("hello").await;
        assert_eq!(reply.booking_state, BookingState::AwaitPatientId);
        assert_eq!(harness.directory.lookups().len(), 2);
    }

    #[tokio::test]
    async fn submission_failure_stays_ready_to_confirm() {
        let harness = Harness::new();
        for text in ["I want a dental cleaning", "next Monday", "3pm", "Dr. Samer", "401234567"] {
            harness.say(text).await;
        }
        harness.appointments.set_failing(true);

        let reply = harness.say("yes").await;
        assert_eq!(reply.booking_state, BookingState::ReadyToConfirm);
        assert!(harness.session().await.confirmed.is_none());

        harness.appointments.set_failing(false);
        let reply = harness.say("yes").await;
        assert_eq!(reply.booking_state, BookingState::Confirmed);
        assert_eq!(harness.appointments.submitted().len(), 1);
    }

    #[tokio::test]
    async fn cancel_works_from_every_active_state() {
        let steps = ["I want a dental cleaning", "next Monday", "3pm", "Dr. Samer", "401234567"];
        for filled in 1..=steps.len() {
            let harness = Harness::new();
            for text in &steps[..filled] {
                harness.say(text).await;
            }
            let before = harness.session().await.booking.state;
            assert!(before.is_active(), "state {before:?} should be active");

            let reply = harness.say("cancel").await;

            assert_eq!(reply.intent, Some(Intent::Reset));
            assert_eq!(reply.booking_state, BookingState::Cancelled, "cancel from {before:?}");
        }
    }

    #[tokio::test]
    async fn cancel_before_any_booking_still_cancels() {
        let harness = Harness::new();
        let reply = harness.say("cancel").await;

        assert_eq!(reply.intent, Some(Intent::Reset));
        assert_eq!(reply.booking_state, BookingState::Cancelled);
        assert!(reply.reply_text.contains("no booking in progress"));
        assert_eq!(harness.session().await.booking.state, BookingState::Cancelled);

        let reply = harness.say("cancel").await;
        assert_eq!(reply.booking_state, BookingState::Init, "terminal reset starts fresh");

        let reply = harness.say("I want a dental cleaning").await;
        assert_eq!(reply.booking_state, BookingState::AwaitDate);
    }

    #[tokio::test]
    async fn confirmation_after_the_slot_passed_asks_again_instead_of_submitting() {
        let harness = Harness::new();
        for text in ["dental cleaning", "today", "10:30", "Dr. Samer", "401234567"] {
            harness.say(text).await;
        }
        let ready = harness.session().await;
        assert_eq!(ready.booking.state, BookingState::ReadyToConfirm);
        assert_eq!(ready.booking.slots.date, NaiveDate::from_ymd_opt(2026, 10, 14));

        // Two days later the Wednesday 10:30 slot is gone.
        let friday = Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).single().expect("valid instant");
        let reply = harness.say_at("yes", friday).await;

        assert_eq!(reply.booking_state, BookingState::AwaitDate);
        assert!(harness.appointments.submitted().is_empty());
        let session = harness.session().await;
        assert_eq!(session.booking.slots.date, None);
        assert_eq!(session.booking.slots.time, None);
        assert_eq!(session.booking.slots.patient_id, Some(PatientId("401234567".into())));
        assert!(session.confirmed.is_none());
    }

    #[tokio::test]
    async fn independent_slots_fill_in_any_order() {
        let harness = Harness::new();
        harness.say("I want to book an appointment").await;
        harness.say("Dr. Lina").await;
        harness.say("whitening").await;
        harness.say("next Monday").await;
        let reply = harness.say("3pm").await;

        assert_eq!(reply.booking_state, BookingState::AwaitPatientId);
        let slots = harness.session().await.booking.slots;
        assert_eq!(slots.doctor.as_deref(), Some("Dr. Lina"));
        assert_eq!(slots.service.map(|service| service.code), Some("teeth_whitening".to_owned()));
    }

    #[tokio::test]
    async fn invalid_input_reprompts_without_advancing() {
        let harness = Harness::new();
        harness.say("I want a dental cleaning").await;

        let reply = harness.say("yesterday").await;
        assert_eq!(reply.booking_state, BookingState::AwaitDate);
        assert!(reply.reply_text.contains("already passed"));

        let reply = harness.say("friday").await;
        assert_eq!(reply.booking_state, BookingState::AwaitDate);
        assert!(reply.reply_text.contains("closed on Fridays"));
        assert!(harness.session().await.booking.slots.date.is_none());
    }

    #[tokio::test]
    async fn knowledge_question_mid_booking_leaves_slots_untouched() {
        let harness = Harness::new();
        harness.say("I want a dental cleaning").await;
        let before = harness.session().await.booking;

        let reply = harness.say("where is the clinic?").await;

        assert_eq!(reply.intent, Some(Intent::KnowledgeQuery));
        assert!(reply.reply_text.contains("09:00 to 21:00"));
        assert!(reply.reply_text.contains("Which day suits you?"));
        assert_eq!(harness.session().await.booking, before);
        assert_eq!(harness.knowledge_base.queries(), 1);
    }

    #[tokio::test]
    async fn knowledge_outage_is_a_conversational_retry() {
        let harness = Harness::new();
        harness.knowledge_base.set_failing(true);

        let reply = harness.say("What are your opening hours?").await;

        assert!(reply.reply_text.contains("try again"));
        assert_eq!(harness.session().await.turn_count, 1);
    }

    #[tokio::test]
    async fn arabic_messages_switch_the_reply_language() {
        let harness = Harness::new();
        let reply = harness.say("بدي احجز تنظيف اسنان").await;

        assert_eq!(reply.booking_state, BookingState::AwaitDate);
        assert!(reply.reply_text.contains("أي يوم"));
        assert_eq!(harness.session().await.language, Language::Arabic);
    }

    #[tokio::test]
    async fn duplicate_delivery_returns_previous_reply_without_writing() {
        let harness = Harness::new();
        let message = InboundMessage::new(sender(), "I want a dental cleaning", wednesday())
            .with_message_id(Some("wamid.ABC".into()));

        let first = harness.orchestrator.handle_turn(message.clone()).await.expect("first turn");
        let second = harness.orchestrator.handle_turn(message).await.expect("repeat turn");

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.reply_text, second.reply_text);
        assert_eq!(harness.session().await.turn_count, 1);
    }

    #[tokio::test]
    async fn flow_transitions_are_audited() {
        let harness = Harness::new();
        harness.say("I want a dental cleaning").await;

        let transitions = harness.audit.of(AuditAction::TransitionApplied);
        let transition = transitions.first().expect("transition audited");
        assert_eq!(transition.detail("to"), Some("AWAIT_DATE"));
        assert_eq!(transition.sender_id, Some(sender()));
    }

    /// Session store that stalls between read and write.
    struct SlowSessions {
        inner: InMemorySessionRepository,
        delay: Duration,
    }

    #[async_trait]
    impl SessionRepository for SlowSessions {
        async fn find(
            &self,
            sender_id: &SenderId,
        ) -> Result<Option<ConversationSession>, RepositoryError> {
            self.inner.find(sender_id).await
        }

        async fn save(&self, session: ConversationSession) -> Result<(), RepositoryError> {
            tokio::time::sleep(self.delay).await;
            self.inner.save(session).await
        }
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_sender_do_not_lose_updates() {
        let sessions = Arc::new(SlowSessions {
            inner: InMemorySessionRepository::default(),
            delay: Duration::from_millis(50),
        });
        let harness = Harness::with(StaticPatientDirectory::default(), sessions);
        harness.say("I want to book an appointment").await;

        let first = {
            let orchestrator = harness.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.handle_turn(InboundMessage::new(sender(), "whitening", wednesday())).await
            })
        };
        let second = {
            let orchestrator = harness.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.handle_turn(InboundMessage::new(sender(), "Dr. Omar", wednesday())).await
            })
        };
        first.await.expect("join").expect("first turn");
        second.await.expect("join").expect("second turn");

        let session = harness.session().await;
        assert_eq!(session.turn_count, 3);
        assert_eq!(session.booking.slots.doctor.as_deref(), Some("Dr. Omar"));
        assert!(session.booking.slots.service.is_some());
    }

    /// Session store whose writes always fail.
    struct BrokenSessions;

    #[async_trait]
    impl SessionRepository for BrokenSessions {
        async fn find(
            &self,
            _sender_id: &SenderId,
        ) -> Result<Option<ConversationSession>, RepositoryError> {
            Ok(None)
        }

        async fn save(&self, _session: ConversationSession) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("disk full".into()))
        }
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_as_application_error() {
        let harness = Harness::with(StaticPatientDirectory::default(), Arc::new(BrokenSessions));
        let result = harness
            .orchestrator
            .handle_turn(InboundMessage::new(sender(), "hello", wednesday()))
            .await;

        assert!(matches!(result, Err(ApplicationError::Persistence(_))));
    }
}
