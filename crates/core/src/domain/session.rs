use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::booking::{BookingDraft, ConfirmedBooking};
use crate::domain::patient::PatientProfile;
use crate::text::contains_arabic;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Arabic,
    #[default]
    English,
}

impl Language {
    /// Arabic script wins over Latin letters; digits and emoji alone carry
    /// no signal.
    pub fn detect(text: &str) -> Option<Self> {
        if contains_arabic(text) {
            Some(Self::Arabic)
        } else if text.chars().any(|ch| ch.is_ascii_alphabetic()) {
            Some(Self::English)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arabic => "ar",
            Self::English => "en",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Some(Self::Arabic),
            "en" | "english" => Some(Self::English),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub at: DateTime<Utc>,
    pub user: String,
    pub assistant: String,
    pub intent: String,
}

/// Bounds on how much raw conversation a session keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryPolicy {
    pub summary_threshold: usize,
    pub summary_max_chars: usize,
    pub idle_timeout: Duration,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self { summary_threshold: 12, summary_max_chars: 2_000, idle_timeout: Duration::minutes(30) }
    }
}

const USER_LINE_CHARS: usize = 120;
const ASSISTANT_LINE_CHARS: usize = 160;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSession {
    pub sender_id: SenderId,
    pub booking: BookingDraft,
    pub patient: Option<PatientProfile>,
    pub confirmed: Option<ConfirmedBooking>,
    pub summary: String,
    pub history: Vec<ConversationTurn>,
    pub language: Language,
    pub last_message_id: Option<String>,
    pub last_reply: Option<String>,
    pub turn_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(sender_id: SenderId, language: Language, at: DateTime<Utc>) -> Self {
        Self {
            sender_id,
            booking: BookingDraft::default(),
            patient: None,
            confirmed: None,
            summary: String::new(),
            history: Vec::new(),
            language,
            last_message_id: None,
            last_reply: None,
            turn_count: 0,
            created_at: at,
            last_activity: at,
        }
    }

    pub fn is_idle(&self, at: DateTime<Utc>, policy: &MemoryPolicy) -> bool {
        at - self.last_activity > policy.idle_timeout
    }

    /// Folds all raw history into the summary. A finished booking is
    /// replaced by a fresh draft; an unfinished one keeps its slots.
    pub fn roll_over_idle(&mut self, policy: &MemoryPolicy) {
        let all = self.history.len();
        self.compact(all, policy);
        if self.booking.state.is_terminal() {
            self.booking = BookingDraft::default();
        }
    }

    /// Appends a finished turn and compacts the oldest half of the history
    /// once it grows past the threshold.
    pub fn record_turn(&mut self, turn: ConversationTurn, policy: &MemoryPolicy) {
        self.last_activity = turn.at;
        self.turn_count += 1;
        self.history.push(turn);

        if self.history.len() > policy.summary_threshold {
            let oldest_half = self.history.len() / 2;
            self.compact(oldest_half, policy);
        }
    }

    fn compact(&mut self, count: usize, policy: &MemoryPolicy) {
        let count = count.min(self.history.len());
        if count == 0 {
            return;
        }

        for turn in self.history.drain(..count) {
            if !self.summary.is_empty() {
                self.summary.push('\n');
            }
            self.summary.push_str(&format!(
                "{} [{}] user: {} | assistant: {}",
                turn.at.format("%Y-%m-%d %H:%M"),
                turn.intent,
                clip(&turn.user, USER_LINE_CHARS),
                clip(&turn.assistant, ASSISTANT_LINE_CHARS),
            ));
        }
        self.summary = trim_front(&self.summary, policy.summary_max_chars);
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut clipped: String = flattened.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

/// Drops whole lines from the front until the summary fits, falling back to
/// a character cut when a single line is still too long.
fn trim_front(summary: &str, max_chars: usize) -> String {
    let mut remaining = summary;
    while remaining.chars().count() > max_chars {
        match remaining.split_once('\n') {
            Some((_, rest)) => remaining = rest,
            None => {
                let skip = remaining.chars().count() - max_chars;
                return remaining.chars().skip(skip).collect();
            }
        }
    }
    remaining.to_owned()
}
