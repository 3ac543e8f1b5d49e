pub mod engine;
pub mod input;
pub mod states;

pub use engine::{next_state, BookingFlow, FlowDefinition, FlowEngine, FlowTransitionError};
pub use input::{parse_input, BookingInput};
pub use states::{
    BookingEvent, BookingState, FlowAction, FlowContext, RejectionReason, SlotRejection,
    TransitionOutcome,
};
