//! In-process stand-ins for the upstream capabilities, used by tests and by
//! local runs without a clinic backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use noor_core::domain::booking::{AppointmentReceipt, BookingRequest};
use noor_core::domain::patient::{DirectoryLookupResult, PatientProfile};
use noor_core::domain::session::Language;
use noor_core::errors::UpstreamError;

use crate::llm::{KnowledgeBase, LanguageModel, ModelContext};
use crate::upstream::{
    AppointmentBook, PatientDirectory, APPOINTMENT_BOOK, KNOWLEDGE_BASE, LANGUAGE_MODEL,
    PATIENT_DIRECTORY,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Directory answering from a fixed identifier map.
#[derive(Default)]
pub struct StaticPatientDirectory {
    patients: HashMap<String, PatientProfile>,
    failing: AtomicBool,
    lookups: Mutex<Vec<String>>,
}

impl StaticPatientDirectory {
    pub fn with_patient(mut self, identifier: impl Into<String>, profile: PatientProfile) -> Self {
        self.patients.insert(identifier.into(), profile);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> Vec<String> {
        lock(&self.lookups).clone()
    }
}

#[async_trait]
impl PatientDirectory for StaticPatientDirectory {
    async fn lookup(&self, identifier: &str) -> DirectoryLookupResult {
        lock(&self.lookups).push(identifier.to_owned());
        if self.failing.load(Ordering::SeqCst) {
            return DirectoryLookupResult::UpstreamError(format!(
                "{PATIENT_DIRECTORY} unavailable: connection refused"
            ));
        }
        match self.patients.get(identifier) {
            Some(profile) => DirectoryLookupResult::Found(profile.clone()),
            None => DirectoryLookupResult::NotFound,
        }
    }
}

/// Appointment book that records submissions and issues sequential
/// references.
#[derive(Default)]
pub struct RecordingAppointmentBook {
    submitted: Mutex<Vec<BookingRequest>>,
    failing: AtomicBool,
}

impl RecordingAppointmentBook {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<BookingRequest> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl AppointmentBook for RecordingAppointmentBook {
    async fn submit(&self, request: &BookingRequest) -> Result<AppointmentReceipt, UpstreamError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable {
                upstream: APPOINTMENT_BOOK,
                reason: "service returned 503".to_owned(),
            });
        }
        let mut submitted = lock(&self.submitted);
        submitted.push(request.clone());
        Ok(AppointmentReceipt {
            reference: format!("APT-{:04}", submitted.len()),
            confirmed_at: Utc::now(),
        })
    }
}

/// Knowledge base with one canned answer per language.
pub struct StaticKnowledgeBase {
    english: String,
    arabic: String,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl StaticKnowledgeBase {
    pub fn new(english: impl Into<String>, arabic: impl Into<String>) -> Self {
        Self {
            english: english.into(),
            arabic: arabic.into(),
            failing: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Default for StaticKnowledgeBase {
    fn default() -> Self {
        Self::new(
            "We are open Saturday to Thursday, 09:00 to 21:00.",
            "دوامنا من السبت للخميس، من 9 الصبح لـ 9 المسا.",
        )
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn answer(&self, _query: &str, language: Language) -> Result<String, UpstreamError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable {
                upstream: KNOWLEDGE_BASE,
                reason: "index offline".to_owned(),
            });
        }
        Ok(match language {
            Language::English => self.english.clone(),
            Language::Arabic => self.arabic.clone(),
        })
    }
}

/// Model returning a fixed reply and keeping every context it was given.
pub struct StaticLanguageModel {
    reply: String,
    contexts: Mutex<Vec<ModelContext>>,
    failing: AtomicBool,
}

impl StaticLanguageModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), contexts: Mutex::new(Vec::new()), failing: AtomicBool::new(false) }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn contexts(&self) -> Vec<ModelContext> {
        lock(&self.contexts).clone()
    }
}

impl Default for StaticLanguageModel {
    fn default() -> Self {
        Self::new("Hello! I can help you book an appointment or answer questions about the clinic.")
    }
}

#[async_trait]
impl LanguageModel for StaticLanguageModel {
    async fn generate(&self, context: &ModelContext) -> Result<String, UpstreamError> {
        lock(&self.contexts).push(context.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable {
                upstream: LANGUAGE_MODEL,
                reason: "model overloaded".to_owned(),
            });
        }
        Ok(self.reply.clone())
    }
}
