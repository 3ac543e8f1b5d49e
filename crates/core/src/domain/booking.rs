use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dates::BusinessHours;

use crate::domain::patient::PatientId;
use crate::domain::session::SenderId;
use crate::errors::DomainError;
use crate::flows::states::BookingState;

/// A single piece of booking information collected over the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Service,
    Date,
    Time,
    Doctor,
    PatientId,
}

impl Slot {
    pub const ORDER: [Slot; 5] =
        [Slot::Service, Slot::Date, Slot::Time, Slot::Doctor, Slot::PatientId];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Date => "date",
            Self::Time => "time",
            Self::Doctor => "doctor",
            Self::PatientId => "patient_id",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelection {
    pub code: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSlots {
    pub service: Option<ServiceSelection>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub doctor: Option<String>,
    pub patient_id: Option<PatientId>,
}

impl BookingSlots {
    pub fn is_filled(&self, slot: Slot) -> bool {
        match slot {
            Slot::Service => self.service.is_some(),
            Slot::Date => self.date.is_some(),
            Slot::Time => self.time.is_some(),
            Slot::Doctor => self.doctor.is_some(),
            Slot::PatientId => self.patient_id.is_some(),
        }
    }

    pub fn clear(&mut self, slot: Slot) {
        match slot {
            Slot::Service => self.service = None,
            Slot::Date => self.date = None,
            Slot::Time => self.time = None,
            Slot::Doctor => self.doctor = None,
            Slot::PatientId => self.patient_id = None,
        }
    }

    pub fn first_missing(&self) -> Option<Slot> {
        Slot::ORDER.into_iter().find(|slot| !self.is_filled(*slot))
    }

    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }
}

/// Booking progress carried on a session between turns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub state: BookingState,
    pub slots: BookingSlots,
    /// Set once the directory has no record for the sender, so later
    /// revisions go straight back to manual id collection.
    #[serde(default)]
    pub directory_miss: bool,
}

impl Default for BookingDraft {
    fn default() -> Self {
        Self { state: BookingState::Init, slots: BookingSlots::default(), directory_miss: false }
    }
}

impl BookingDraft {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingRequestId(pub String);

/// Immutable snapshot of a completed draft, handed to the appointment book.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: BookingRequestId,
    pub sender_id: SenderId,
    pub service: ServiceSelection,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub doctor: String,
    pub patient_id: PatientId,
    pub created_at: DateTime<Utc>,
}

impl BookingRequest {
    /// Snapshots a complete draft. Every slot must be filled and the date
    /// and time must still be an open, future slot at `created_at`.
    pub fn from_slots(
        sender_id: &SenderId,
        slots: &BookingSlots,
        hours: &BusinessHours,
        timezone: Tz,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let (Some(service), Some(date), Some(time), Some(doctor), Some(patient_id)) = (
            slots.service.clone(),
            slots.date,
            slots.time,
            slots.doctor.clone(),
            slots.patient_id.clone(),
        ) else {
            let missing: Vec<&str> = Slot::ORDER
                .into_iter()
                .filter(|slot| !slots.is_filled(*slot))
                .map(Slot::as_str)
                .collect();
            return Err(DomainError::InvariantViolation(format!(
                "booking request for {} built with unfilled slots: {}",
                sender_id.0,
                missing.join(", ")
            )));
        };

        if let Err(violation) = hours.check_slot(date, time, created_at, timezone) {
            return Err(DomainError::InvariantViolation(format!(
                "booking request for {} built for an unbookable slot {date} {time}: {violation:?}",
                sender_id.0
            )));
        }

        Ok(Self {
            id: BookingRequestId(format!("BR-{}", Uuid::new_v4())),
            sender_id: sender_id.clone(),
            service,
            date,
            time,
            doctor,
            patient_id,
            created_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentReceipt {
    pub reference: String,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub request: BookingRequest,
    pub receipt: AppointmentReceipt,
}
