//! Data models for the salon queue server

pub mod checkin;
pub mod event;
pub mod queue;
pub mod salon;
pub mod user;

// Re-export commonly used types
pub use checkin::{CheckInOutcome, CheckInRecord};
pub use event::{ClientMessage, QueueEvent};
pub use queue::{
    CheckIn, JoinQueue, QueueEntry, QueueEntryView, QueueStatus, UpdateStatus, VerificationMethod,
    VerifyArrival,
};
pub use salon::{Offer, Salon, SalonService};
pub use user::{Actor, Role, UserClaims};
