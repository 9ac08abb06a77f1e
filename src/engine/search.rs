use std::time::Instant;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;
use crate::observability::{SEARCH_DURATION_SECONDS, SEARCH_RESULTS};

use super::conflict::validate_range;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchQuery {
    pub guests: u32,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl Engine {
    /// Stays near a point that are free for all of `[checkin, checkout)` and
    /// take at least `guests`.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Stay>, EngineError> {
        let started = Instant::now();
        let range = validate_range(query.checkin, query.checkout)?;
        let candidates = self
            .geo
            .search_by_distance(query.lat, query.lon, query.radius_km)
            .await
            .map_err(|e| EngineError::GeoIndex(e.to_string()))?;
        let stays = self
            .search_available(&candidates, query.guests, &range)
            .await?;
        metrics::histogram!(SEARCH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        metrics::histogram!(SEARCH_RESULTS).record(stays.len() as f64);
        Ok(stays)
    }

    /// Filter an externally matched candidate set down to stays with no
    /// occupied night in the range and enough capacity. Results come back in
    /// ascending stay id order, duplicates collapsed.
    pub async fn search_available(
        &self,
        candidates: &[StayId],
        guests: u32,
        range: &NightRange,
    ) -> Result<Vec<Stay>, EngineError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if candidates.len() > MAX_SEARCH_CANDIDATES {
            return Err(EngineError::LimitExceeded("too many search candidates"));
        }

        let mut free = candidates.to_vec();
        free.sort();
        free.dedup();

        let occupied = self
            .entries_occupying_any(&free, range.checkin, range.last_night())
            .await;
        free.retain(|id| !occupied.contains(id));

        Ok(self.stays_with_min_capacity(&free, guests).await)
    }
}
