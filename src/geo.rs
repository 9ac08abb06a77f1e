//! Geo-distance collaborator. The engine only asks it for candidate stay ids.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{GeoPoint, StayId};

const EARTH_RADIUS_KM: f64 = 6371.0088;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoError(pub String);

impl std::fmt::Display for GeoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for GeoError {}

/// Returns the stays within `radius_km` of a point, in no particular order.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn search_by_distance(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<StayId>, GeoError>;
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

fn check_point(lat: f64, lon: f64) -> Result<(), GeoError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(GeoError(format!("coordinates out of range: ({lat}, {lon})")));
    }
    Ok(())
}

/// Linear-scan index kept in memory. Good enough for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryGeoIndex {
    points: DashMap<StayId, GeoPoint>,
}

impl InMemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, stay_id: StayId, point: GeoPoint) {
        self.points.insert(stay_id, point);
    }

    pub fn remove(&self, stay_id: &StayId) {
        self.points.remove(stay_id);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn search_by_distance(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<StayId>, GeoError> {
        check_point(lat, lon)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(GeoError(format!("invalid radius: {radius_km}")));
        }
        let origin = GeoPoint::new(lat, lon);
        Ok(self
            .points
            .iter()
            .filter(|e| haversine_km(origin, *e.value()) <= radius_km)
            .map(|e| *e.key())
            .collect())
    }
}
