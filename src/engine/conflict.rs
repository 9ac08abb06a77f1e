use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Check-in strictly before check-out.
pub(crate) fn validate_range(checkin: NaiveDate, checkout: NaiveDate) -> Result<NightRange, EngineError> {
    if checkin >= checkout {
        return Err(EngineError::InvalidDateRange {
            checkin,
            checkout,
            reason: "check-in must be before check-out",
        });
    }
    Ok(NightRange::new(checkin, checkout))
}

/// Booking dates: a valid range that does not start before `today`.
pub(crate) fn validate_booking_dates(
    checkin: NaiveDate,
    checkout: NaiveDate,
    today: NaiveDate,
) -> Result<NightRange, EngineError> {
    let range = validate_range(checkin, checkout)?;
    if checkin < today {
        return Err(EngineError::InvalidDateRange {
            checkin,
            checkout,
            reason: "check-in is in the past",
        });
    }
    if range.nights() > MAX_NIGHTS_PER_RESERVATION {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(range)
}

pub(crate) fn validate_identity(identity: &str) -> Result<(), EngineError> {
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(EngineError::LimitExceeded("identity too long"));
    }
    Ok(())
}

/// Any occupied night in `[checkin, checkout - 1]` is a collision.
/// Caller holds the stay's write lock.
pub(crate) fn check_no_collision(st: &StayState, range: &NightRange) -> Result<(), EngineError> {
    match st.calendar.first_occupied(range.checkin, range.last_night()) {
        Some(night) => Err(EngineError::ReservationCollision {
            stay_id: st.stay.id,
            night,
        }),
        None => Ok(()),
    }
}
