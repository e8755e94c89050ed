//! Distance metrics between map coordinates.
//!
//! `Planar` is the cheap degrees-times-111 approximation used by the greedy
//! search, where only the ordering of distances matters at city scale.
//! `Haversine` is the great-circle distance used for every figure reported
//! back to the caller.

use serde::{Deserialize, Serialize};

use crate::traits::DistanceMetric;

/// Kilometers per degree for the planar approximation.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a coordinate from two optional table cells.
    ///
    /// Returns `None` when either cell is missing or not finite.
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        let coordinate = Self::new(lat?, lon?);
        coordinate.is_finite().then_some(coordinate)
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Euclidean distance in degrees scaled to kilometers.
pub fn planar_distance_km(from: Coordinate, to: Coordinate) -> f64 {
    let d_lat = from.lat - to.lat;
    let d_lon = from.lon - to.lon;
    (d_lat * d_lat + d_lon * d_lon).sqrt() * KM_PER_DEGREE
}

/// Great-circle distance in kilometers.
pub fn haversine_distance_km(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair above 1 for antipodal points.
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Planar (degrees x 111) metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planar;

impl DistanceMetric for Planar {
    fn distance_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        planar_distance_km(from, to)
    }
}

/// Great-circle metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl DistanceMetric for Haversine {
    fn distance_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        haversine_distance_km(from, to)
    }
}
