use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{ReservationId, StayId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidDateRange {
        checkin: NaiveDate,
        checkout: NaiveDate,
        reason: &'static str,
    },
    /// Definitive: the night is held by committed state. Never retried.
    ReservationCollision {
        stay_id: StayId,
        night: NaiveDate,
    },
    /// Covers both a missing reservation and one owned by another guest.
    ReservationNotFound(ReservationId),
    StayNotFound(StayId),
    StayHasActiveReservations {
        stay_id: StayId,
        active: usize,
    },
    AlreadyExists(Ulid),
    /// The stay's lock could not be taken in time. Nothing was committed;
    /// the caller may retry.
    TransientConflict(StayId),
    LimitExceeded(&'static str),
    GeoIndex(String),
    WalError(String),
}

impl EngineError {
    /// Whether retrying the same call can succeed without anything else changing.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientConflict(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidDateRange { .. } => "invalid_date_range",
            EngineError::ReservationCollision { .. } => "collision",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::StayNotFound(_) => "stay_not_found",
            EngineError::StayHasActiveReservations { .. } => "has_active_reservations",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::TransientConflict(_) => "transient_conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::GeoIndex(_) => "geo_index_error",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange {
                checkin,
                checkout,
                reason,
            } => write!(f, "invalid date range [{checkin}, {checkout}): {reason}"),
            EngineError::ReservationCollision { stay_id, night } => {
                write!(f, "stay {stay_id} is already reserved on {night}")
            }
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::StayNotFound(id) => write!(f, "stay not found: {id}"),
            EngineError::StayHasActiveReservations { stay_id, active } => {
                write!(
                    f,
                    "cannot delete stay {stay_id}: {active} active reservation(s)"
                )
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TransientConflict(id) => {
                write!(f, "stay {id} is busy, transaction aborted; retry")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::GeoIndex(e) => write!(f, "geo index error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
