//! Receiver location and distances

use serde::{Deserialize, Serialize};

/// Earth radius used for distances, in km
const EARTH_RADIUS_KM: f64 = 6373.0;

/// Kilometres per nautical mile
pub const KM_PER_NM: f64 = 1.852;

/// Fixed position of the antenna every distance is measured from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub lat: f64,
    pub lon: f64,
}

impl Receiver {
    /// Returns `None` unless both coordinates are finite and in range
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        valid_position(lat, lon).then_some(Self { lat, lon })
    }

    /// Great circle distance to a position, in km rounded to 10 m
    pub fn distance_km(&self, lat: f64, lon: f64) -> f64 {
        round_km(haversine_km(self.lat, self.lon, lat, lon))
    }
}

pub fn valid_position(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0
}

/// Distances are kept to two decimals so equal positions compare equal
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

/// Calculate haversine distance between two lat/lon points in km
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}
