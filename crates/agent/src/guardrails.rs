use std::sync::LazyLock;

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";

static INTERNAL_TOKENS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\bsvc\w+\b", r"\bemp\w+\b", r"\b[a-zA-Z0-9+/=_-]{20,}\b"]
        .into_iter()
        .map(|pattern| Regex::new(pattern).expect("static regex must compile"))
        .collect()
});

/// Sanitizes model and knowledge-base text before it is sent to a patient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputGuard {
    max_reply_chars: usize,
}

impl Default for OutputGuard {
    fn default() -> Self {
        Self::new(1_500)
    }
}

impl OutputGuard {
    pub fn new(max_reply_chars: usize) -> Self {
        Self { max_reply_chars }
    }

    pub fn max_reply_chars(&self) -> usize {
        self.max_reply_chars
    }

    /// Redacts internal identifiers and bounds the length. Returns `None`
    /// when nothing readable is left.
    pub fn sanitize(&self, text: &str) -> Option<String> {
        let mut cleaned = text.trim().to_owned();
        for pattern in INTERNAL_TOKENS.iter() {
            cleaned = pattern.replace_all(&cleaned, REDACTED).into_owned();
        }
        let cleaned = self.truncate(&cleaned);
        (!cleaned.trim().is_empty()).then_some(cleaned)
    }

    /// Cuts on a char boundary, marking the cut with an ellipsis.
    pub fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.max_reply_chars {
            return text.to_owned();
        }
        let mut truncated: String =
            text.chars().take(self.max_reply_chars.saturating_sub(1)).collect();
        truncated.push('…');
        truncated
    }
}
