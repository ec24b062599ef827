use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::{BookingStatus, UserId};

/// Why a write collided with existing ledger state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The requested interval overlaps a pending or confirmed booking.
    Overlap {
        booking_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    },
    /// Exact-start uniqueness still failed after the retry.
    SlotTaken { date: NaiveDate, start: NaiveTime },
    AlreadyCancelled(Ulid),
    NotPending { booking_id: Ulid, status: BookingStatus },
    /// A window cannot be deleted while live bookings fall inside it.
    WindowInUse { window_id: Ulid, booking_id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation { field: &'static str, reason: String },
    InvalidWindow { field: &'static str, reason: String },
    DuplicateWindow(Ulid),
    Conflict(ConflictKind),
    NotFound(Ulid),
    PermissionDenied { actor: UserId, target: Ulid },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Validation { field, reason: reason.into() }
    }

    pub(crate) fn invalid_window(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidWindow { field, reason: reason.into() }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::InvalidWindow { .. } => "invalid_window",
            EngineError::DuplicateWindow(_) => "duplicate_window",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::PermissionDenied { .. } => "permission_denied",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Overlap { booking_id, date, start, end } => write!(
                f,
                "overlaps booking {booking_id} on {date} from {} to {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            ConflictKind::SlotTaken { date, start } => {
                write!(f, "slot starting {} on {date} is already taken", start.format("%H:%M"))
            }
            ConflictKind::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            ConflictKind::NotPending { booking_id, status } => {
                write!(f, "booking {booking_id} is {}, not pending", status.as_str())
            }
            ConflictKind::WindowInUse { window_id, booking_id } => {
                write!(f, "window {window_id} still holds booking {booking_id}")
            }
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            EngineError::InvalidWindow { field, reason } => {
                write!(f, "invalid window {field}: {reason}")
            }
            EngineError::DuplicateWindow(id) => {
                write!(f, "an active window already starts there: {id}")
            }
            EngineError::Conflict(kind) => write!(f, "conflict: {kind}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::PermissionDenied { actor, target } => {
                write!(f, "{actor} may not act on {target}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
