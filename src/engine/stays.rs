use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{outcome_label, STAYS_ACTIVE, STAY_DELETIONS_TOTAL};

use super::conflict::validate_identity;
use super::{Engine, EngineError, SharedStayState};

fn validate_stay_fields(name: Option<&str>, address: &str, guest_capacity: u32) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("stay name too long"));
    }
    if address.len() > MAX_ADDRESS_LEN {
        return Err(EngineError::LimitExceeded("address too long"));
    }
    if guest_capacity == 0 || guest_capacity > MAX_GUEST_CAPACITY {
        return Err(EngineError::LimitExceeded("guest capacity out of range"));
    }
    Ok(())
}

/// Lifecycle guard: the stay must belong to `host` and have no reservation
/// checking out after `today`.
fn ensure_deletable(st: &StayState, host: &str, today: NaiveDate) -> Result<(), EngineError> {
    if st.retired || st.stay.host != host {
        return Err(EngineError::StayNotFound(st.stay.id));
    }
    let active = st.active_reservations(today).count();
    if active > 0 {
        return Err(EngineError::StayHasActiveReservations {
            stay_id: st.stay.id,
            active,
        });
    }
    Ok(())
}

impl Engine {
    pub async fn create_stay(&self, new: NewStay) -> Result<Stay, EngineError> {
        validate_identity(&new.host)?;
        validate_stay_fields(new.name.as_deref(), &new.address, new.guest_capacity)?;
        if self.stays.len() >= MAX_STAYS {
            return Err(EngineError::LimitExceeded("too many stays"));
        }
        let id = new.id.unwrap_or_else(Ulid::new);

        let stay = Stay {
            id,
            host: new.host,
            name: new.name,
            address: new.address,
            guest_capacity: new.guest_capacity,
            location: new.location,
        };

        let _gate = self.commit_section().await;
        // Publish the entry already write-locked: concurrent creates with the
        // same id see it taken, and readers wait until the append settles.
        let state: SharedStayState = Arc::new(RwLock::new(StayState::new(stay.clone())));
        let mut guard = state.clone().write_owned().await;
        match self.stays.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(state);
            }
        }
        if let Err(e) = self.wal_append(&stay.created_event()).await {
            guard.retired = true;
            self.stays.remove(&id);
            return Err(e);
        }
        self.link_stay(&stay);
        drop(guard);

        metrics::gauge!(STAYS_ACTIVE).set(self.stays.len() as f64);
        info!("stay {id} created for host {}", stay.host);
        Ok(stay)
    }

    /// Replace a host's stay details. Reservations are untouched.
    pub async fn update_stay(
        &self,
        id: StayId,
        host: &str,
        name: Option<String>,
        address: String,
        guest_capacity: u32,
    ) -> Result<Stay, EngineError> {
        validate_stay_fields(name.as_deref(), &address, guest_capacity)?;
        let _gate = self.commit_section().await;
        let mut guard = self.lock_stay(id).await?;
        if guard.stay.host != host {
            return Err(EngineError::StayNotFound(id));
        }
        let event = Event::StayUpdated {
            id,
            name,
            address,
            guest_capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.stay.clone())
    }

    pub async fn find_stay(&self, id: StayId) -> Option<Stay> {
        let st = self.get_stay_state(&id)?;
        let guard = st.read().await;
        (!guard.retired).then(|| guard.stay.clone())
    }

    /// The stay, if it exists and belongs to `host`.
    pub async fn find_stay_for_host(&self, id: StayId, host: &str) -> Result<Stay, EngineError> {
        self.find_stay(id)
            .await
            .filter(|s| s.host == host)
            .ok_or(EngineError::StayNotFound(id))
    }

    pub async fn list_stays_by_host(&self, host: &str) -> Vec<Stay> {
        let ids = self
            .by_host
            .get(host)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stay) = self.find_stay(id).await {
                out.push(stay);
            }
        }
        out
    }

    /// Stays among `ids` that take at least `min_guests`, in the order given.
    pub async fn stays_with_min_capacity(&self, ids: &[StayId], min_guests: u32) -> Vec<Stay> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(stay) = self.find_stay(*id).await
                && stay.guest_capacity >= min_guests
            {
                out.push(stay);
            }
        }
        out
    }

    pub fn stay_count(&self) -> usize {
        self.stays.len()
    }

    /// Whether `host` may delete the stay right now.
    pub async fn can_delete_stay(&self, id: StayId, host: &str) -> Result<(), EngineError> {
        let st = self.get_stay_state(&id).ok_or(EngineError::StayNotFound(id))?;
        let guard = st.read().await;
        ensure_deletable(&guard, host, self.today())
    }

    /// Delete a stay once the lifecycle guard allows it. Past reservations go
    /// with it. The guard check and the delete share one lock hold, so a
    /// booking cannot slip in between them.
    pub async fn delete_stay(&self, id: StayId, host: &str) -> Result<Stay, EngineError> {
        let result = self.try_delete_stay(id, host).await;
        metrics::counter!(STAY_DELETIONS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        result
    }

    async fn try_delete_stay(&self, id: StayId, host: &str) -> Result<Stay, EngineError> {
        let _gate = self.commit_section().await;
        let mut guard = self.lock_stay(id).await?;
        if let Err(e) = ensure_deletable(&guard, host, self.today()) {
            debug!("delete of stay {id} refused: {e}");
            return Err(e);
        }

        self.wal_append(&Event::StayDeleted { id }).await?;
        let purged = guard.reservations().len();
        self.retire(&mut guard);
        self.stays.remove(&id);
        metrics::gauge!(STAYS_ACTIVE).set(self.stays.len() as f64);
        info!("stay {id} deleted with {purged} past reservations");
        Ok(guard.stay.clone())
    }
}
