use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{format_time_of_day, Minute};

/// Failure inside one of the leaf stores. Always transient from the
/// engine's point of view: the caller logs it and retries on the next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Journal(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Journal(e) => write!(f, "journal error: {e}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Journal(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(String),
    SlotUnavailable(String),
    BookingNotFound(Ulid),
    HoldNotFound { date: NaiveDate, start: Minute },
    TransitionRejected(String),
    Store(StoreError),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::BookingNotFound(_) | EngineError::HoldNotFound { .. })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::SlotUnavailable(reason) => write!(f, "{reason}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::HoldNotFound { date, start } => {
                write!(f, "no hold for this session at {date} {}", format_time_of_day(*start))
            }
            EngineError::TransitionRejected(msg) => write!(f, "transition rejected: {msg}"),
            EngineError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
