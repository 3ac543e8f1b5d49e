use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::dates::UnresolvedReason;
use crate::domain::booking::{BookingSlots, Slot};
use crate::domain::patient::PatientId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Init,
    AwaitService,
    AwaitDate,
    AwaitTime,
    AwaitDoctor,
    LookupPatient,
    AwaitPatientId,
    ReadyToConfirm,
    Confirmed,
    Cancelled,
}

impl BookingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }

    /// A booking is in progress: past `INIT` and not yet finished.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Init) && !self.is_terminal()
    }

    /// The slot a state is waiting on, if any.
    pub fn awaited_slot(self) -> Option<Slot> {
        match self {
            Self::AwaitService => Some(Slot::Service),
            Self::AwaitDate => Some(Slot::Date),
            Self::AwaitTime => Some(Slot::Time),
            Self::AwaitDoctor => Some(Slot::Doctor),
            Self::AwaitPatientId => Some(Slot::PatientId),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::AwaitService => "AWAIT_SERVICE",
            Self::AwaitDate => "AWAIT_DATE",
            Self::AwaitTime => "AWAIT_TIME",
            Self::AwaitDoctor => "AWAIT_DOCTOR",
            Self::LookupPatient => "LOOKUP_PATIENT",
            Self::AwaitPatientId => "AWAIT_PATIENT_ID",
            Self::ReadyToConfirm => "READY_TO_CONFIRM",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Message(String),
    PatientFound(PatientId),
    PatientNotFound,
    CancelRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub reference_now: DateTime<Utc>,
}

impl FlowContext {
    pub fn at(reference_now: DateTime<Utc>) -> Self {
        Self { reference_now }
    }
}

/// Side effects the orchestrator performs after a transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PromptForSlot(Slot),
    LookupPatient,
    PromptConfirmation,
    SubmitBooking,
    AnnounceCancellation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    UnknownService,
    UnresolvedDate(UnresolvedReason),
    ClinicClosed(Weekday),
    UnparseableTime,
    OutsideBusinessHours,
    NotInFuture,
    UnknownDoctor,
    InvalidPatientId,
    ConfirmationUnclear,
    NothingToRevise,
}

/// Input that could not fill the slot it was meant for. The transition still
/// succeeds and stays in place; the reason drives the clarifying prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRejection {
    pub slot: Option<Slot>,
    pub reason: RejectionReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: BookingState,
    pub to: BookingState,
    pub event: BookingEvent,
    pub slots: BookingSlots,
    pub directory_miss: bool,
    pub filled: Vec<Slot>,
    pub rejection: Option<SlotRejection>,
    pub actions: Vec<FlowAction>,
}
