use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(pub String);

impl PatientId {
    /// Accepts a single run of 6 to 15 digits, ignoring spaces and dashes
    /// inside the number and surrounding words such as "my id is".
    pub fn parse(text: &str) -> Option<Self> {
        let normalized = crate::text::normalize(text);
        let compact: String =
            normalized.chars().filter(|ch| !ch.is_whitespace() && *ch != '-').collect();
        let mut runs = compact.split(|ch: char| !ch.is_ascii_digit()).filter(|run| !run.is_empty());
        let candidate = runs.next()?;
        if runs.next().is_some() || !(6..=15).contains(&candidate.len()) {
            return None;
        }
        Some(Self(candidate.to_owned()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub patient_id: PatientId,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
}

/// Result of asking the patient directory about a sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryLookupResult {
    Found(PatientProfile),
    NotFound,
    UpstreamError(String),
}
