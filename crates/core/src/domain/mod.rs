pub mod booking;
pub mod patient;
pub mod session;
