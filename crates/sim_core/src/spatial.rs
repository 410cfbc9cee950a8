//! Spatial helpers: great-circle distance between locations.
//!
//! Coordinates are validated/normalized through [`h3o::LatLng`] and distances
//! use the haversine formula. A small LRU cache keyed by location-id pair
//! avoids recomputing hot pairs (walking legs hit the same stops over and
//! over).

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use h3o::LatLng;
use lru::LruCache;

use crate::event::Location;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two coordinates.
pub fn distance_km(a_lat: f64, a_lng: f64, b_lat: f64, b_lng: f64) -> f64 {
    // Normalize through h3o when the coordinates are valid; fall back to the
    // raw values otherwise (advisory coordinates may be degenerate).
    let (a_lat, a_lng) = match LatLng::new(a_lat, a_lng) {
        Ok(point) => (point.lat(), point.lng()),
        Err(_) => (a_lat, a_lng),
    };
    let (b_lat, b_lng) = match LatLng::new(b_lat, b_lng) {
        Ok(point) => (point.lat(), point.lng()),
        Err(_) => (b_lat, b_lng),
    };

    let (lat1, lon1) = (a_lat.to_radians(), a_lng.to_radians());
    let (lat2, lon2) = (b_lat.to_radians(), b_lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Global distance cache (4096 pairs).
fn distance_cache() -> &'static Mutex<LruCache<(String, String), f64>> {
    static CACHE: OnceLock<Mutex<LruCache<(String, String), f64>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(4096).expect("cache size must be non-zero"),
        ))
    })
}

/// Distance in metres between two locations, cached by id pair.
pub fn distance_m_between(a: &Location, b: &Location) -> f64 {
    let key = if a.location_id <= b.location_id {
        (a.location_id.clone(), b.location_id.clone())
    } else {
        (b.location_id.clone(), a.location_id.clone())
    };
    if let Ok(mut cache) = distance_cache().lock() {
        if let Some(distance) = cache.get(&key) {
            return *distance;
        }
        let distance = distance_km(a.lat, a.lng, b.lat, b.lng) * 1000.0;
        cache.put(key, distance);
        distance
    } else {
        distance_km(a.lat, a.lng, b.lat, b.lng) * 1000.0
    }
}

/// Walking duration in wire minutes at the given speed (metres per minute).
pub fn walking_duration_min(a: &Location, b: &Location, meters_per_minute: f64) -> f64 {
    distance_m_between(a, b) / meters_per_minute
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let a = Location::new("a", 36.695557, 137.220786);
        let b = Location::new("b", 36.696726, 137.227181);
        let ab = distance_m_between(&a, &b);
        let ba = distance_m_between(&b, &a);
        assert!((ab - ba).abs() < 1e-9);
        assert!(ab > 0.0);
        assert_eq!(distance_m_between(&a, &a), 0.0);
    }

    #[test]
    fn known_distance_is_plausible() {
        // ~575m between these two Toyama stops.
        let a = Location::new("3_1", 36.695557, 137.220786);
        let b = Location::new("7_1", 36.696726, 137.227181);
        let d = distance_m_between(&a, &b);
        assert!((400.0..800.0).contains(&d), "unexpected distance {d}");
    }

    #[test]
    fn walking_duration_uses_speed() {
        let a = Location::new("x", 36.0, 137.0);
        let b = Location::new("y", 36.0, 137.01);
        let d = distance_m_between(&a, &b);
        let minutes = walking_duration_min(&a, &b, 80.0);
        assert!((minutes - d / 80.0).abs() < 1e-9);
    }
}
