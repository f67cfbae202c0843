use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// check_out is not strictly after check_in.
    InvalidRange,
    /// Contact fields missing or malformed.
    InvalidContact(&'static str),
    /// At least one day in the requested range has no free unit.
    Unavailable(NaiveDate),
    NotFound(Ulid),
    /// The operation is not legal for the booking's current status.
    InvalidState(BookingStatus),
    /// The hold's deadline passed before it was confirmed.
    Expired(Ulid),
    LimitExceeded(&'static str),
    /// The store aborted the transaction; safe to retry the whole operation.
    Persistence(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange => write!(f, "check_out must be after check_in"),
            EngineError::InvalidContact(msg) => write!(f, "invalid contact: {msg}"),
            EngineError::Unavailable(day) => {
                write!(f, "no availability on {day} for the selected dates")
            }
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::InvalidState(status) => {
                write!(f, "operation not allowed while booking is {status}")
            }
            EngineError::Expired(id) => write!(f, "hold expired: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
