use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use noor_core::catalog::{DoctorRoster, ServiceCatalog};
use noor_core::dates::{self, ParsedDate, UnresolvedReason};
use noor_core::domain::patient::PatientId;
use noor_core::domain::session::ConversationSession;
use noor_core::flows::{parse_input, BookingInput};
use noor_core::text::{contains_phrase, normalize, word_padded};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    BookingContinue,
    KnowledgeQuery,
    Freeform,
    Reset,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BookingContinue => "booking_continue",
            Self::KnowledgeQuery => "knowledge_query",
            Self::Freeform => "freeform",
            Self::Reset => "reset",
        }
    }
}

const BOOKING_KEYWORDS: &[&str] = &[
    "book",
    "booking",
    "appointment",
    "reserve",
    "reservation",
    "schedule",
    "احجز",
    "حجز",
    "موعد",
    "بدي موعد",
];

const QUESTION_OPENERS: &[&str] = &[
    "what", "when", "where", "how", "which", "who", "why", "do you", "does", "is there", "are you",
    "can i", "شو", "ايش", "وين", "متى", "امتى", "كيف", "هل", "ليش", "قديش", "كم", "مين",
];

const KNOWLEDGE_KEYWORDS: &[&str] = &[
    "price",
    "prices",
    "cost",
    "how much",
    "opening hours",
    "working hours",
    "open",
    "location",
    "address",
    "parking",
    "insurance",
    "سعر",
    "اسعار",
    "تكلفه",
    "عنوان",
    "موقع",
    "تامين",
    "دوام",
];

/// Deterministic classifier over the message and the session it lands in.
#[derive(Clone, Debug)]
pub struct IntentRouter {
    reset_phrases: Vec<String>,
    catalog: ServiceCatalog,
    roster: DoctorRoster,
    timezone: Tz,
}

impl IntentRouter {
    pub fn new(
        reset_phrases: impl IntoIterator<Item = String>,
        catalog: ServiceCatalog,
        roster: DoctorRoster,
        timezone: Tz,
    ) -> Self {
        Self { reset_phrases: reset_phrases.into_iter().collect(), catalog, roster, timezone }
    }

    /// Reset phrases win everywhere. Inside an active booking anything that
    /// is not clearly a question without booking content continues the
    /// flow; outside one, explicit booking words or a named service start it.
    pub fn classify(&self, text: &str, session: &ConversationSession) -> Intent {
        let padded = word_padded(text);
        if self.reset_phrases.iter().any(|phrase| contains_phrase(&padded, phrase)) {
            return Intent::Reset;
        }

        if session.booking.is_active() {
            if is_question(text, &padded) && !self.carries_slot_content(text, session) {
                return Intent::KnowledgeQuery;
            }
            return Intent::BookingContinue;
        }

        if BOOKING_KEYWORDS.iter().any(|keyword| contains_phrase(&padded, keyword)) {
            return Intent::BookingContinue;
        }
        if is_question(text, &padded)
            || KNOWLEDGE_KEYWORDS.iter().any(|keyword| contains_phrase(&padded, keyword))
        {
            return Intent::KnowledgeQuery;
        }
        if self.catalog.match_service(text).is_some() {
            return Intent::BookingContinue;
        }
        Intent::Freeform
    }

    fn carries_slot_content(&self, text: &str, session: &ConversationSession) -> bool {
        if !matches!(parse_input(text), BookingInput::Text) {
            return true;
        }
        if self.catalog.match_service(text).is_some()
            || self.roster.match_doctor(text).is_some()
            || dates::resolve_time(text).is_some()
            || PatientId::parse(text).is_some()
        {
            return true;
        }
        !matches!(
            dates::resolve(text, session.last_activity, self.timezone),
            ParsedDate::Unresolved(UnresolvedReason::NoMatch)
        )
    }
}

fn is_question(text: &str, padded: &str) -> bool {
    let normalized = normalize(text);
    normalized.trim_end().ends_with('?')
        || QUESTION_OPENERS.iter().any(|opener| padded.starts_with(&word_padded(opener)))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use noor_core::catalog::{DoctorRoster, ServiceCatalog};
    use noor_core::domain::session::{ConversationSession, Language, SenderId};
    use noor_core::flows::BookingState;

    use super::{Intent, IntentRouter};

    fn router() -> IntentRouter {
        IntentRouter::new(
            ["cancel", "start over", "الغاء", "بلاش"].map(String::from),
            ServiceCatalog::default(),
            DoctorRoster::default(),
            chrono_tz::Asia::Hebron,
        )
    }

    fn session_in(state: BookingState) -> ConversationSession {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 7, 0, 0).single().expect("valid instant");
        let mut session =
            ConversationSession::new(SenderId("971500000001".into()), Language::English, at);
        session.booking.state = state;
        session
    }

    #[test]
    fn reset_phrases_win_in_any_state() {
        let router = router();
        for state in [BookingState::Init, BookingState::AwaitTime, BookingState::ReadyToConfirm] {
            assert_eq!(router.classify("please cancel", &session_in(state)), Intent::Reset);
            assert_eq!(router.classify("بلاش الموعد", &session_in(state)), Intent::Reset);
        }
    }

    #[test]
    fn idle_sessions_route_by_content() {
        let router = router();
        let idle = session_in(BookingState::Init);

        assert_eq!(router.classify("I want a dental cleaning", &idle), Intent::BookingContinue);
        assert_eq!(router.classify("بدي احجز موعد", &idle), Intent::BookingContinue);
        assert_eq!(
            router.classify("How much is teeth whitening?", &idle),
            Intent::KnowledgeQuery
        );
        assert_eq!(router.classify("وين العيادة؟", &idle), Intent::KnowledgeQuery);
        assert_eq!(router.classify("hello there", &idle), Intent::Freeform);
    }

    #[test]
    fn active_booking_keeps_ambiguous_input_in_the_flow() {
        let router = router();
        let awaiting_time = session_in(BookingState::AwaitTime);

        assert_eq!(router.classify("3pm", &awaiting_time), Intent::BookingContinue);
        assert_eq!(router.classify("hmm not sure", &awaiting_time), Intent::BookingContinue);
        assert_eq!(
            router.classify("can I come at 4pm?", &awaiting_time),
            Intent::BookingContinue
        );
        assert_eq!(
            router.classify("where is the clinic?", &awaiting_time),
            Intent::KnowledgeQuery
        );
    }

    #[test]
    fn terminal_sessions_are_treated_as_idle() {
        let router = router();
        let confirmed = session_in(BookingState::Confirmed);

        assert_eq!(router.classify("hi", &confirmed), Intent::Freeform);
        assert_eq!(router.classify("book a checkup", &confirmed), Intent::BookingContinue);
    }
}
