pub mod audit;
pub mod catalog;
pub mod config;
pub mod dates;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod phone;
pub mod text;

pub use catalog::{DoctorRoster, ServiceCatalog, ServiceDefinition, ANY_DOCTOR};
pub use dates::{resolve, resolve_time, BusinessHours, ParsedDate};
pub use domain::booking::{
    AppointmentReceipt, BookingDraft, BookingRequest, BookingSlots, ConfirmedBooking, Slot,
};
pub use domain::patient::{DirectoryLookupResult, PatientId, PatientProfile};
pub use domain::session::{ConversationSession, ConversationTurn, Language, MemoryPolicy, SenderId};
pub use errors::{ApplicationError, DomainError, InterfaceError, UpstreamError};
pub use flows::{BookingEvent, BookingFlow, BookingState, FlowEngine};
