use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{outcome_label, BOOKINGS_TOTAL, CANCELLATIONS_TOTAL, RESERVATIONS_PURGED_TOTAL};

use super::conflict::{check_no_collision, validate_booking_dates, validate_identity};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve `[checkin, checkout)` on a stay, or fail without a trace.
    ///
    /// Under the stay's write lock: look for any occupied night in
    /// `[checkin, checkout - 1]`, then commit the reservation and its nights
    /// as one WAL event. Of two overlapping requests racing on a stay, the
    /// second to get the lock sees the first's nights and fails with
    /// `ReservationCollision`.
    pub async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let result = self.try_create_reservation(request).await;
        metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        result
    }

    async fn try_create_reservation(&self, request: ReservationRequest) -> Result<Reservation, EngineError> {
        let range = validate_booking_dates(request.checkin, request.checkout, self.today())?;
        validate_identity(&request.guest)?;
        let id = request.id.unwrap_or_else(Ulid::new);

        // Claim the id before anything awaits. The claim is released on every
        // failure; on success `apply_to_stay` writes the same mapping.
        match self.reservation_to_stay.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(request.stay_id);
            }
        }
        let result = self.commit_reservation(id, request, range).await;
        if result.is_err() {
            self.reservation_to_stay.remove(&id);
        }
        result
    }

    async fn commit_reservation(
        &self,
        id: ReservationId,
        request: ReservationRequest,
        range: NightRange,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.commit_section().await;
        let mut guard = self.lock_stay(request.stay_id).await?;
        if guard.reservations().contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.reservations().len() >= MAX_RESERVATIONS_PER_STAY {
            return Err(EngineError::LimitExceeded("too many reservations on stay"));
        }

        if let Err(e) = check_no_collision(&guard, &range) {
            debug!("reservation on stay {} rejected: {e}", request.stay_id);
            return Err(e);
        }

        let reservation = Reservation {
            id,
            stay_id: request.stay_id,
            guest: request.guest,
            range,
        };
        self.persist_and_apply(&mut guard, &reservation.created_event())
            .await?;
        info!(
            "reservation {id} on stay {} for [{}, {})",
            reservation.stay_id, range.checkin, range.checkout
        );
        Ok(reservation)
    }

    /// Cancel a guest's own reservation, releasing its nights in the same commit.
    /// Someone else's reservation is reported exactly like a missing one.
    pub async fn cancel_reservation(&self, id: ReservationId, guest: &str) -> Result<Reservation, EngineError> {
        let result = self.try_cancel_reservation(id, guest).await;
        metrics::counter!(CANCELLATIONS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        result
    }

    async fn try_cancel_reservation(&self, id: ReservationId, guest: &str) -> Result<Reservation, EngineError> {
        let _gate = self.commit_section().await;
        let (stay_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let reservation = match guard.reservations().get(&id) {
            Some(r) if r.guest == guest => r.clone(),
            _ => return Err(EngineError::ReservationNotFound(id)),
        };

        let event = Event::ReservationCancelled { id, stay_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id} on stay {stay_id} cancelled");
        Ok(reservation)
    }

    /// Drop every reservation that checked out on or before `cutoff`, with its
    /// nights. Returns how many were dropped.
    pub async fn purge_elapsed(&self, cutoff: NaiveDate) -> Result<usize, EngineError> {
        let _gate = self.commit_section().await;
        let stay_ids: Vec<StayId> = self.stays.iter().map(|e| *e.key()).collect();
        let mut purged = 0;

        for stay_id in stay_ids {
            let mut guard = match self.lock_stay(stay_id).await {
                Ok(guard) => guard,
                Err(EngineError::StayNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let elapsed: Vec<ReservationId> = guard
                .reservations()
                .values()
                .filter(|r| r.checkout() <= cutoff)
                .map(|r| r.id)
                .collect();
            for id in elapsed {
                self.persist_and_apply(&mut guard, &Event::ReservationPurged { id, stay_id })
                    .await?;
                purged += 1;
            }
        }

        if purged > 0 {
            metrics::counter!(RESERVATIONS_PURGED_TOTAL).increment(purged as u64);
            info!("purged {purged} reservations elapsed by {cutoff}");
        }
        Ok(purged)
    }
}
