use chrono_tz::Tz;
use thiserror::Error;

use crate::audit::{AuditAction, AuditContext, AuditOutcome, AuditSink};
use crate::catalog::{DoctorRoster, ServiceCatalog};
use crate::dates::{self, BusinessHours, ParsedDate, ScheduleViolation};
use crate::domain::booking::{BookingDraft, BookingSlots, Slot};
use crate::domain::patient::PatientId;
use crate::flows::input::{parse_input, BookingInput};
use crate::flows::states::{
    BookingEvent, BookingState, FlowAction, FlowContext, RejectionReason, SlotRejection,
    TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> BookingState;
    fn transition(
        &self,
        current: &BookingDraft,
        event: &BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The appointment booking flow over a clinic's catalog, roster and hours.
#[derive(Clone, Debug)]
pub struct BookingFlow {
    catalog: ServiceCatalog,
    roster: DoctorRoster,
    hours: BusinessHours,
    timezone: Tz,
}

impl Default for BookingFlow {
    fn default() -> Self {
        Self::new(
            ServiceCatalog::default(),
            DoctorRoster::default(),
            BusinessHours::default(),
            chrono_tz::Asia::Hebron,
        )
    }
}

impl BookingFlow {
    pub fn new(
        catalog: ServiceCatalog,
        roster: DoctorRoster,
        hours: BusinessHours,
        timezone: Tz,
    ) -> Self {
        Self { catalog, roster, hours, timezone }
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn roster(&self) -> &DoctorRoster {
        &self.roster
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn on_message(
        &self,
        current: &BookingDraft,
        text: &str,
        event: &BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let state = current.state;
        let mut slots = current.slots.clone();

        match parse_input(text) {
            BookingInput::Decline => {
                return Ok(outcome(current, BookingState::Cancelled, event, slots, Vec::new(), None));
            }
            BookingInput::Affirm if state == BookingState::ReadyToConfirm => {
                if let Some(missing) = slots.first_missing() {
                    return Err(FlowTransitionError::MissingRequiredSlots {
                        state,
                        missing: vec![missing],
                    });
                }
                if let Some(rejection) = self.expire_stale_slot(&mut slots, context) {
                    let to = next_state(&slots, current.directory_miss);
                    return Ok(outcome(current, to, event, slots, Vec::new(), Some(rejection)));
                }
                return Ok(outcome(current, BookingState::Confirmed, event, slots, Vec::new(), None));
            }
            BookingInput::Revise(slot) => {
                if !slots.is_filled(slot) {
                    let rejection =
                        SlotRejection { slot: Some(slot), reason: RejectionReason::NothingToRevise };
                    return Ok(outcome(current, state, event, slots, Vec::new(), Some(rejection)));
                }
                slots.clear(slot);
                let mut filled = Vec::new();
                if slot != Slot::PatientId && self.fill_slot(slot, text, &mut slots, context).is_ok()
                {
                    filled.push(slot);
                }
                let to = if filled.is_empty() {
                    revision_state(slot, &slots)
                } else {
                    next_state(&slots, current.directory_miss)
                };
                return Ok(outcome(current, to, event, slots, filled, None));
            }
            BookingInput::Affirm | BookingInput::Text => {}
        }

        match state {
            BookingState::ReadyToConfirm => {
                let rejection =
                    SlotRejection { slot: None, reason: RejectionReason::ConfirmationUnclear };
                Ok(outcome(current, state, event, slots, Vec::new(), Some(rejection)))
            }
            BookingState::LookupPatient => {
                Ok(outcome(current, state, event, slots, Vec::new(), None))
            }
            _ => Ok(self.collect_slots(current, text, event, context)),
        }
    }

    /// Fills the awaited slot, then opportunistically any slot the text also
    /// names, then keeps following the flow while the same text satisfies
    /// the next awaited slot.
    fn collect_slots(
        &self,
        current: &BookingDraft,
        text: &str,
        event: &BookingEvent,
        context: &FlowContext,
    ) -> TransitionOutcome {
        let mut slots = current.slots.clone();
        let mut attempted = Vec::new();
        let mut filled = Vec::new();
        let mut rejection = None;

        if let Some(active) = current.state.awaited_slot() {
            attempted.push(active);
            match self.fill_slot(active, text, &mut slots, context) {
                Ok(()) => filled.push(active),
                Err(reason) => rejection = Some(SlotRejection { slot: Some(active), reason }),
            }
        }

        for slot in [Slot::Service, Slot::Doctor] {
            if attempted.contains(&slot) || slots.is_filled(slot) {
                continue;
            }
            attempted.push(slot);
            let found = match slot {
                Slot::Service => self.catalog.match_service(text).map(|service| {
                    slots.service = Some(service);
                }),
                _ => self.roster.match_named(text).map(|doctor| {
                    slots.doctor = Some(doctor);
                }),
            };
            if found.is_some() {
                filled.push(slot);
            }
        }

        loop {
            let next = next_state(&slots, current.directory_miss);
            match next.awaited_slot() {
                Some(slot) if slot != Slot::PatientId && !attempted.contains(&slot) => {
                    attempted.push(slot);
                    if self.fill_slot(slot, text, &mut slots, context).is_ok() {
                        filled.push(slot);
                        continue;
                    }
                }
                _ => {}
            }
            break;
        }

        let to = if filled.is_empty() && current.state != BookingState::Init {
            current.state
        } else {
            rejection = None;
            next_state(&slots, current.directory_miss)
        };

        outcome(current, to, event, slots, filled, rejection)
    }

    /// Re-checks a collected date and time against `reference_now`. A slot
    /// that has since passed (or no longer fits the hours) is cleared so the
    /// flow asks for it again: the time alone while the day is still
    /// bookable, otherwise both.
    fn expire_stale_slot(
        &self,
        slots: &mut BookingSlots,
        context: &FlowContext,
    ) -> Option<SlotRejection> {
        let (date, time) = (slots.date?, slots.time?);
        let violation =
            self.hours.check_slot(date, time, context.reference_now, self.timezone).err()?;

        let today = dates::local_today(context.reference_now, self.timezone);
        slots.time = None;
        let slot = if self.hours.check_date(date, today).is_err() {
            slots.date = None;
            Slot::Date
        } else {
            Slot::Time
        };
        Some(SlotRejection { slot: Some(slot), reason: rejection_for(violation) })
    }

    fn fill_slot(
        &self,
        slot: Slot,
        text: &str,
        slots: &mut BookingSlots,
        context: &FlowContext,
    ) -> Result<(), RejectionReason> {
        match slot {
            Slot::Service => {
                let service =
                    self.catalog.match_service(text).ok_or(RejectionReason::UnknownService)?;
                slots.service = Some(service);
            }
            Slot::Date => {
                let date = match dates::resolve(text, context.reference_now, self.timezone) {
                    ParsedDate::Resolved { date, .. } => date,
                    ParsedDate::Unresolved(reason) => {
                        return Err(RejectionReason::UnresolvedDate(reason));
                    }
                };
                let today = dates::local_today(context.reference_now, self.timezone);
                self.hours.check_date(date, today).map_err(rejection_for)?;
                slots.date = Some(date);

                // A kept time may no longer fit the new date.
                if let Some(time) = slots.time {
                    if self
                        .hours
                        .check_slot(date, time, context.reference_now, self.timezone)
                        .is_err()
                    {
                        slots.time = None;
                    }
                }
            }
            Slot::Time => {
                let date = slots.date.ok_or(RejectionReason::UnparseableTime)?;
                let time = dates::resolve_time(text).ok_or(RejectionReason::UnparseableTime)?;
                self.hours
                    .check_slot(date, time, context.reference_now, self.timezone)
                    .map_err(rejection_for)?;
                slots.time = Some(time);
            }
            Slot::Doctor => {
                let doctor = self.roster.match_doctor(text).ok_or(RejectionReason::UnknownDoctor)?;
                slots.doctor = Some(doctor);
            }
            Slot::PatientId => {
                let patient_id = PatientId::parse(text).ok_or(RejectionReason::InvalidPatientId)?;
                slots.patient_id = Some(patient_id);
            }
        }
        Ok(())
    }
}

impl FlowDefinition for BookingFlow {
    fn initial_state(&self) -> BookingState {
        BookingState::Init
    }

    fn transition(
        &self,
        current: &BookingDraft,
        event: &BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let state = current.state;
        if state.is_terminal() {
            return Err(FlowTransitionError::InvalidTransition { state, event: event.clone() });
        }

        match event {
            BookingEvent::CancelRequested => Ok(outcome(
                current,
                BookingState::Cancelled,
                event,
                current.slots.clone(),
                Vec::new(),
                None,
            )),
            BookingEvent::PatientFound(patient_id) if state == BookingState::LookupPatient => {
                let mut slots = current.slots.clone();
                slots.patient_id = Some(patient_id.clone());
                let to = next_state(&slots, current.directory_miss);
                Ok(outcome(current, to, event, slots, vec![Slot::PatientId], None))
            }
            BookingEvent::PatientNotFound if state == BookingState::LookupPatient => {
                let mut result = outcome(
                    current,
                    BookingState::AwaitPatientId,
                    event,
                    current.slots.clone(),
                    Vec::new(),
                    None,
                );
                result.directory_miss = true;
                Ok(result)
            }
            BookingEvent::PatientFound(_) | BookingEvent::PatientNotFound => {
                Err(FlowTransitionError::InvalidTransition { state, event: event.clone() })
            }
            BookingEvent::Message(text) => self.on_message(current, text, event, context),
        }
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn initial_state(&self) -> BookingState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &BookingDraft,
        event: &BookingEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &BookingDraft,
        event: &BookingEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                let status = if outcome.rejection.is_some() {
                    AuditOutcome::Rejected
                } else {
                    AuditOutcome::Success
                };
                let mut event = audit
                    .record(AuditAction::TransitionApplied, status)
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", event_label(&outcome.event));
                if let Some(rejection) = &outcome.rejection {
                    event = event.with_metadata("reason", format!("{:?}", rejection.reason));
                    if let Some(slot) = rejection.slot {
                        event = event.with_metadata("rejected_slot", slot.as_str());
                    }
                }
                sink.emit(event);
            }
            Err(error) => {
                sink.emit(
                    audit
                        .record(AuditAction::TransitionRejected, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow::default())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots before transition from {state:?}: {missing:?}")]
    MissingRequiredSlots { state: BookingState, missing: Vec<Slot> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: BookingState, event: BookingEvent },
}

/// First state whose slot is still empty. With every slot filled except the
/// patient id, the directory is consulted unless it already missed.
pub fn next_state(slots: &BookingSlots, directory_miss: bool) -> BookingState {
    match slots.first_missing() {
        Some(Slot::Service) => BookingState::AwaitService,
        Some(Slot::Date) => BookingState::AwaitDate,
        Some(Slot::Time) => BookingState::AwaitTime,
        Some(Slot::Doctor) => BookingState::AwaitDoctor,
        Some(Slot::PatientId) if directory_miss => BookingState::AwaitPatientId,
        Some(Slot::PatientId) => BookingState::LookupPatient,
        None => BookingState::ReadyToConfirm,
    }
}

fn revision_state(slot: Slot, slots: &BookingSlots) -> BookingState {
    match slot {
        Slot::Time if slots.date.is_none() => BookingState::AwaitDate,
        Slot::Service => BookingState::AwaitService,
        Slot::Date => BookingState::AwaitDate,
        Slot::Time => BookingState::AwaitTime,
        Slot::Doctor => BookingState::AwaitDoctor,
        Slot::PatientId => BookingState::AwaitPatientId,
    }
}

fn actions_for(state: BookingState) -> Vec<FlowAction> {
    match state {
        BookingState::LookupPatient => vec![FlowAction::LookupPatient],
        BookingState::ReadyToConfirm => vec![FlowAction::PromptConfirmation],
        BookingState::Confirmed => vec![FlowAction::SubmitBooking],
        BookingState::Cancelled => vec![FlowAction::AnnounceCancellation],
        BookingState::Init => Vec::new(),
        other => other.awaited_slot().map(FlowAction::PromptForSlot).into_iter().collect(),
    }
}

fn outcome(
    current: &BookingDraft,
    to: BookingState,
    event: &BookingEvent,
    slots: BookingSlots,
    filled: Vec<Slot>,
    rejection: Option<SlotRejection>,
) -> TransitionOutcome {
    TransitionOutcome {
        from: current.state,
        to,
        event: event.clone(),
        slots,
        directory_miss: current.directory_miss,
        filled,
        rejection,
        actions: actions_for(to),
    }
}

fn rejection_for(violation: ScheduleViolation) -> RejectionReason {
    match violation {
        ScheduleViolation::ClosedWeekday(weekday) => RejectionReason::ClinicClosed(weekday),
        ScheduleViolation::OutsideHours => RejectionReason::OutsideBusinessHours,
        ScheduleViolation::NotInFuture => RejectionReason::NotInFuture,
    }
}

fn event_label(event: &BookingEvent) -> &'static str {
    match event {
        BookingEvent::Message(_) => "message",
        BookingEvent::PatientFound(_) => "patient_found",
        BookingEvent::PatientNotFound => "patient_not_found",
        BookingEvent::CancelRequested => "cancel_requested",
    }
}
