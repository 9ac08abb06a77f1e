use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::Calendar;

pub type StayId = Ulid;
pub type ReservationId = Ulid;

/// Half-open night range `[checkin, checkout)`: the guest occupies every night
/// from `checkin` up to, but not including, `checkout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NightRange {
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl NightRange {
    pub fn new(checkin: NaiveDate, checkout: NaiveDate) -> Self {
        debug_assert!(checkin < checkout, "check-in must be before check-out");
        Self { checkin, checkout }
    }

    /// Number of occupied nights.
    pub fn nights(&self) -> i64 {
        (self.checkout - self.checkin).num_days()
    }

    /// Last occupied night. Inclusive upper bound for index queries.
    pub fn last_night(&self) -> NaiveDate {
        self.checkout.pred_opt().unwrap_or(self.checkin)
    }

    pub fn iter_nights(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let checkout = self.checkout;
        std::iter::successors(Some(self.checkin), |d| d.succ_opt()).take_while(move |d| *d < checkout)
    }

    pub fn overlaps(&self, other: &NightRange) -> bool {
        self.checkin < other.checkout && other.checkin < self.checkout
    }

    pub fn contains_night(&self, night: NaiveDate) -> bool {
        self.checkin <= night && night < self.checkout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A bookable listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stay {
    pub id: StayId,
    pub host: String,
    pub name: Option<String>,
    pub address: String,
    /// Max guests the stay accommodates.
    pub guest_capacity: u32,
    /// Supplied by the geocoding collaborator, if known.
    pub location: Option<GeoPoint>,
}

impl Stay {
    pub fn created_event(&self) -> Event {
        Event::StayCreated {
            id: self.id,
            host: self.host.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            guest_capacity: self.guest_capacity,
            location: self.location,
        }
    }
}

/// Input for `Engine::create_stay`. The engine assigns an id when none is given.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStay {
    pub id: Option<StayId>,
    pub host: String,
    pub name: Option<String>,
    pub address: String,
    pub guest_capacity: u32,
    pub location: Option<GeoPoint>,
}

impl NewStay {
    pub fn new(host: impl Into<String>, address: impl Into<String>, guest_capacity: u32) -> Self {
        Self {
            id: None,
            host: host.into(),
            name: None,
            address: address.into(),
            guest_capacity,
            location: None,
        }
    }

    pub fn with_id(mut self, id: StayId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// A guest's claim on a stay. Immutable once created; only create and cancel exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub stay_id: StayId,
    pub guest: String,
    pub range: NightRange,
}

impl Reservation {
    pub fn checkin(&self) -> NaiveDate {
        self.range.checkin
    }

    pub fn checkout(&self) -> NaiveDate {
        self.range.checkout
    }

    /// Still active on `date`: checkout falls strictly after it.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.range.checkout > date
    }

    pub fn created_event(&self) -> Event {
        Event::ReservationCreated {
            id: self.id,
            stay_id: self.stay_id,
            guest: self.guest.clone(),
            range: self.range,
        }
    }
}

/// Input for `Engine::create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Option<ReservationId>,
    pub stay_id: StayId,
    pub guest: String,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl ReservationRequest {
    pub fn new(stay_id: StayId, guest: impl Into<String>, checkin: NaiveDate, checkout: NaiveDate) -> Self {
        Self {
            id: None,
            stay_id,
            guest: guest.into(),
            checkin,
            checkout,
        }
    }

    pub fn with_id(mut self, id: ReservationId) -> Self {
        self.id = Some(id);
        self
    }
}

/// Everything the engine knows about one stay. Guarded by the stay's lock.
///
/// The calendar and the reservations only change together, through
/// `insert_reservation` and `remove_reservation`.
#[derive(Debug, Clone)]
pub struct StayState {
    pub(crate) stay: Stay,
    /// Occupied nights, one entry per reserved night.
    pub(crate) calendar: Calendar,
    pub(crate) reservations: BTreeMap<ReservationId, Reservation>,
    /// Set once the stay is deleted; late lock holders must treat it as gone.
    pub(crate) retired: bool,
}

impl StayState {
    pub fn new(stay: Stay) -> Self {
        Self {
            stay,
            calendar: Calendar::new(),
            reservations: BTreeMap::new(),
            retired: false,
        }
    }

    pub fn stay(&self) -> &Stay {
        &self.stay
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn reservations(&self) -> &BTreeMap<ReservationId, Reservation> {
        &self.reservations
    }

    /// Record a reservation together with its nights. Nothing changes if any
    /// night is already taken; the offending night is returned.
    pub fn insert_reservation(&mut self, reservation: Reservation) -> Result<(), NaiveDate> {
        self.calendar.insert(reservation.range.iter_nights())?;
        self.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    /// Drop a reservation together with its nights.
    pub fn remove_reservation(&mut self, id: &ReservationId) -> Option<Reservation> {
        let reservation = self.reservations.remove(id)?;
        self.calendar.remove(reservation.range.iter_nights());
        Some(reservation)
    }

    pub fn active_reservations(&self, on: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().filter(move |r| r.is_active_on(on))
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
///
/// A reservation event is the single durable unit for both its ledger row and
/// its calendar nights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StayCreated {
        id: StayId,
        host: String,
        name: Option<String>,
        address: String,
        guest_capacity: u32,
        location: Option<GeoPoint>,
    },
    StayUpdated {
        id: StayId,
        name: Option<String>,
        address: String,
        guest_capacity: u32,
    },
    StayDeleted {
        id: StayId,
    },
    ReservationCreated {
        id: ReservationId,
        stay_id: StayId,
        guest: String,
        range: NightRange,
    },
    ReservationCancelled {
        id: ReservationId,
        stay_id: StayId,
    },
    /// Dropped by retention after it fully elapsed.
    ReservationPurged {
        id: ReservationId,
        stay_id: StayId,
    },
}
