use chrono::NaiveDate;

use crate::model::*;

use super::Engine;

fn by_checkin(reservations: &mut [Reservation]) {
    reservations.sort_by_key(|r| (r.range.checkin, r.id));
}

impl Engine {
    async fn find_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        let stay_id = self.reservation_to_stay.get(id).map(|e| *e.value())?;
        let st = self.get_stay_state(&stay_id)?;
        let guard = st.read().await;
        guard.reservations.get(id).cloned()
    }

    /// A guest's reservations, ordered by check-in.
    pub async fn list_by_guest(&self, guest: &str) -> Vec<Reservation> {
        let ids = self
            .by_guest
            .get(guest)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(r) = self.find_reservation(id).await {
                out.push(r);
            }
        }
        by_checkin(&mut out);
        out
    }

    /// A stay's reservations, ordered by check-in.
    pub async fn list_by_stay(&self, stay_id: StayId) -> Vec<Reservation> {
        let Some(st) = self.get_stay_state(&stay_id) else {
            return Vec::new();
        };
        let guard = st.read().await;
        let mut out: Vec<Reservation> = guard.reservations.values().cloned().collect();
        by_checkin(&mut out);
        out
    }

    /// The reservation, only if it exists and belongs to `guest`.
    pub async fn find_by_id_for_guest(&self, id: ReservationId, guest: &str) -> Option<Reservation> {
        self.find_reservation(&id)
            .await
            .filter(|r| r.guest == guest)
    }

    /// Reservations on a stay whose checkout is strictly after `on_or_after`.
    pub async fn list_active_for_stay(&self, stay_id: StayId, on_or_after: NaiveDate) -> Vec<Reservation> {
        let Some(st) = self.get_stay_state(&stay_id) else {
            return Vec::new();
        };
        let guard = st.read().await;
        let mut out: Vec<Reservation> = guard.active_reservations(on_or_after).cloned().collect();
        by_checkin(&mut out);
        out
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_stay.len()
    }
}
