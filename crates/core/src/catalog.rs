use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::booking::ServiceSelection;
use crate::text::{contains_phrase, word_padded};

/// Doctor value stored when the patient has no preference.
pub const ANY_DOCTOR: &str = "any available doctor";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub code: String,
    pub name: String,
    pub name_ar: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub duration_minutes: u32,
    pub price: Decimal,
}

impl ServiceDefinition {
    fn phrases(&self) -> impl Iterator<Item = &str> {
        [self.name.as_str(), self.name_ar.as_str()]
            .into_iter()
            .chain(self.aliases.iter().map(String::as_str))
    }

    pub fn selection(&self) -> ServiceSelection {
        ServiceSelection { code: self.code.clone(), name: self.name.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    pub fn new(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn find(&self, code: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|service| service.code == code)
    }

    /// Matches free text against service names and aliases in both
    /// languages. The longest matching phrase wins so that "teeth whitening"
    /// beats a bare "teeth".
    pub fn match_service(&self, text: &str) -> Option<ServiceSelection> {
        let padded = word_padded(text);
        self.services
            .iter()
            .filter_map(|service| {
                service
                    .phrases()
                    .filter(|phrase| contains_phrase(&padded, phrase))
                    .map(|phrase| phrase.chars().count())
                    .max()
                    .map(|length| (length, service))
            })
            .max_by_key(|(length, _)| *length)
            .map(|(_, service)| service.selection())
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::new(vec![
            ServiceDefinition {
                code: "dental_cleaning".to_owned(),
                name: "Dental cleaning".to_owned(),
                name_ar: "تنظيف الأسنان".to_owned(),
                aliases: vec!["cleaning".to_owned(), "scaling".to_owned(), "تنظيف".to_owned()],
                duration_minutes: 45,
                price: Decimal::new(150, 0),
            },
            ServiceDefinition {
                code: "general_consultation".to_owned(),
                name: "General consultation".to_owned(),
                name_ar: "استشارة عامة".to_owned(),
                aliases: vec![
                    "consultation".to_owned(),
                    "checkup".to_owned(),
                    "check-up".to_owned(),
                    "كشف".to_owned(),
                    "استشارة".to_owned(),
                ],
                duration_minutes: 30,
                price: Decimal::new(100, 0),
            },
            ServiceDefinition {
                code: "follow_up".to_owned(),
                name: "Follow-up visit".to_owned(),
                name_ar: "مراجعة".to_owned(),
                aliases: vec!["follow up".to_owned(), "followup".to_owned(), "متابعة".to_owned()],
                duration_minutes: 20,
                price: Decimal::new(50, 0),
            },
            ServiceDefinition {
                code: "teeth_whitening".to_owned(),
                name: "Teeth whitening".to_owned(),
                name_ar: "تبييض الأسنان".to_owned(),
                aliases: vec!["whitening".to_owned(), "تبييض".to_owned()],
                duration_minutes: 60,
                price: Decimal::new(400, 0),
            },
        ])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoctorRoster {
    doctors: Vec<DoctorEntry>,
}

impl DoctorRoster {
    pub fn new(doctors: Vec<DoctorEntry>) -> Self {
        Self { doctors }
    }

    pub fn doctors(&self) -> &[DoctorEntry] {
        &self.doctors
    }

    /// Canonical name of a doctor mentioned by name or alias.
    pub fn match_named(&self, text: &str) -> Option<String> {
        let padded = word_padded(text);
        self.doctors
            .iter()
            .find(|doctor| {
                contains_phrase(&padded, &doctor.name)
                    || doctor.aliases.iter().any(|alias| contains_phrase(&padded, alias))
            })
            .map(|doctor| doctor.name.clone())
    }

    /// Returns the canonical doctor name, or [`ANY_DOCTOR`] when the text
    /// states no preference.
    pub fn match_doctor(&self, text: &str) -> Option<String> {
        const NO_PREFERENCE: &[&str] = &[
            "any",
            "anyone",
            "any doctor",
            "no preference",
            "doesn't matter",
            "does not matter",
            "اي دكتور",
            "اي طبيب",
            "مش مهم",
            "اي حدا",
            "اي احد",
        ];

        if let Some(name) = self.match_named(text) {
            return Some(name);
        }

        let padded = word_padded(text);
        NO_PREFERENCE
            .iter()
            .any(|phrase| contains_phrase(&padded, phrase))
            .then(|| ANY_DOCTOR.to_owned())
    }
}

impl Default for DoctorRoster {
    fn default() -> Self {
        let doctor = |name: &str, aliases: &[&str]| DoctorEntry {
            name: name.to_owned(),
            aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
        };
        Self::new(vec![
            doctor("Dr. Samer", &["samer", "سامر"]),
            doctor("Dr. Lina", &["lina", "لينا"]),
            doctor("Dr. Omar", &["omar", "عمر"]),
        ])
    }
}
