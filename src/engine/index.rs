use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;

use crate::model::StayId;

use super::Engine;

/// Per-stay availability index: one entry per occupied night.
/// A night is present iff exactly one live reservation covers it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    nights: BTreeSet<NaiveDate>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nights.is_empty()
    }

    pub fn contains(&self, night: NaiveDate) -> bool {
        self.nights.contains(&night)
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.nights.iter().copied()
    }

    /// First occupied night in `[from, to]`, both ends inclusive.
    pub fn first_occupied(&self, from: NaiveDate, to: NaiveDate) -> Option<NaiveDate> {
        if from > to {
            return None;
        }
        self.nights.range(from..=to).next().copied()
    }

    /// Occupied nights in `[from, to]`, both ends inclusive.
    pub fn occupied_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        if from > to {
            return Vec::new();
        }
        self.nights.range(from..=to).copied().collect()
    }

    /// Insert one entry per night, all or nothing. A night that is already
    /// taken, or repeated in the input, aborts the insert and is returned.
    pub fn insert(&mut self, nights: impl IntoIterator<Item = NaiveDate>) -> Result<(), NaiveDate> {
        let mut staged = BTreeSet::new();
        for night in nights {
            if self.nights.contains(&night) || !staged.insert(night) {
                return Err(night);
            }
        }
        self.nights.append(&mut staged);
        Ok(())
    }

    /// Remove exactly these nights. Missing nights are skipped.
    /// Returns how many entries were actually removed.
    pub fn remove(&mut self, nights: impl IntoIterator<Item = NaiveDate>) -> usize {
        nights
            .into_iter()
            .filter(|night| self.nights.remove(night))
            .count()
    }
}

impl Engine {
    /// The subset of `stay_ids` with at least one occupied night in
    /// `[from, to]` (both inclusive). Callers express an exclusive checkout by
    /// passing `to = checkout - 1 day`. Unknown stays are never occupied.
    pub async fn entries_occupying_any(
        &self,
        stay_ids: &[StayId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> HashSet<StayId> {
        let mut occupied = HashSet::new();
        for stay_id in stay_ids {
            let Some(st) = self.get_stay_state(stay_id) else {
                continue;
            };
            let guard = st.read().await;
            if !guard.retired && guard.calendar.first_occupied(from, to).is_some() {
                occupied.insert(*stay_id);
            }
        }
        occupied
    }

    /// Calendar view of one stay: its occupied nights in `[from, to]`.
    pub async fn occupied_nights(&self, stay_id: StayId, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let Some(st) = self.get_stay_state(&stay_id) else {
            return Vec::new();
        };
        let guard = st.read().await;
        guard.calendar.occupied_between(from, to)
    }
}
