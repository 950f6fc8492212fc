use serde::Serialize;
use ulid::Ulid;

use crate::ledger::StoreError;
use crate::model::{Ms, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    InvalidRange { start: Ms, end: Ms },
    LimitExceeded(&'static str),
    UnknownHall(String),
    SeatsOutOfRange { seats: u32, capacity: u32 },
    NotFound(Ulid),
    Conflict { hall_id: String, span: Span },
    LockUnavailable { hall_id: String, span: Span },
    Store(StoreError),
}

/// Outcome class of a failed operation, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    LockUnavailable,
    StoreFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::LockUnavailable => "lock_unavailable",
            ErrorKind::StoreFailure => "store_failure",
        }
    }
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::InvalidRange { .. }
            | BookingError::LimitExceeded(_)
            | BookingError::UnknownHall(_)
            | BookingError::SeatsOutOfRange { .. } => ErrorKind::Validation,
            BookingError::NotFound(_) => ErrorKind::NotFound,
            BookingError::Conflict { .. } => ErrorKind::Conflict,
            BookingError::LockUnavailable { .. } => ErrorKind::LockUnavailable,
            BookingError::Store(_) => ErrorKind::StoreFailure,
        }
    }

    /// Whether the same request may succeed if simply sent again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LockUnavailable | ErrorKind::StoreFailure
        )
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidRange { start, end } => {
                write!(f, "invalid range [{start}, {end}): end must be after start")
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::UnknownHall(id) => write!(f, "unknown hall: {id}"),
            BookingError::SeatsOutOfRange { seats, capacity } => {
                write!(f, "{seats} seats requested, hall holds 1..={capacity}")
            }
            BookingError::NotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::Conflict { hall_id, span } => {
                write!(f, "hall {hall_id} is already booked during {span}")
            }
            BookingError::LockUnavailable { hall_id, span } => {
                write!(f, "hall {hall_id} is busy during {span}, try again")
            }
            BookingError::Store(e) => write!(f, "store failure: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}
