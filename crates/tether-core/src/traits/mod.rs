//! Core trait definitions

mod channel;
mod session;

pub use channel::{Channel, MAX_ZERO_WRITES};
pub use session::{drive, Outcome, Session, Step};
