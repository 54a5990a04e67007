use ulid::Ulid;

use crate::model::{BookingStatus, Minute};

#[derive(Debug)]
pub enum EngineError {
    /// A settled booking owns one of the requested slots.
    SlotBooked { booking_id: Ulid },
    /// Another user's unexpired pending reservation holds one of the slots.
    SlotReserved { booking_id: Ulid },
    /// The caller already has a pending reservation on one of the slots.
    UserReserved { booking_id: Ulid },
    /// The day ledger is locked by another transaction; retry shortly.
    LockedReservation,
    NotFound(String),
    Validation(String),
    FieldInactive(Ulid),
    NotPending { booking_id: Ulid, status: BookingStatus },
    Expired(Ulid),
    AlreadyExists(Ulid),
    /// Commit would leave two settled bookings sharing a slot.
    ConstraintViolation { slot: Minute, owner: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SlotBooked { .. } => "SLOT_BOOKED",
            EngineError::SlotReserved { .. } => "SLOT_RESERVED",
            EngineError::UserReserved { .. } => "USER_RESERVED",
            EngineError::LockedReservation => "LOCKED_RESERVATION",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Validation(_) => "VALIDATION",
            EngineError::FieldInactive(_) => "FIELD_INACTIVE",
            EngineError::NotPending { .. } => "NOT_PENDING",
            EngineError::Expired(_) => "EXPIRED",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "WAL_ERROR",
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SlotBooked { booking_id } => {
                write!(f, "slot already booked by {booking_id}")
            }
            EngineError::SlotReserved { booking_id } => {
                write!(f, "slot reserved by another user ({booking_id}), try again later")
            }
            EngineError::UserReserved { booking_id } => {
                write!(f, "you already have a pending reservation {booking_id} for this slot")
            }
            EngineError::LockedReservation => {
                write!(f, "slot is being modified by another transaction, try again shortly")
            }
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::FieldInactive(id) => write!(f, "field {id} is not active"),
            EngineError::NotPending { booking_id, status } => {
                write!(f, "booking {booking_id} is {}, not pending", status.as_str())
            }
            EngineError::Expired(id) => write!(f, "booking {id} has expired"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ConstraintViolation { slot, owner } => {
                write!(f, "unique violation: slot {slot} already settled by {owner}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
