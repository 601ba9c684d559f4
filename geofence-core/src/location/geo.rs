//! Great-circle distance and geohash helpers.
//!
//! This module provides functions for:
//! - Coordinate validation
//! - Haversine distance between two points
//! - Destination point from a start, bearing and distance
//! - Geohash encoding (approximate cell of a position)

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Returns true when the coordinate pair is finite and in range.
///
/// Latitude must be -90.0 to 90.0, longitude must be -180.0 to 180.0.
#[must_use]
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Computes the great-circle distance between two points in meters.
///
/// Uses the haversine formula, which stays numerically stable for the
/// short distances geofencing cares about.
///
/// # Examples
///
/// ```
/// use geofence_core::location::haversine_distance;
///
/// // One degree of latitude is roughly 111.2 km
/// let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
/// assert!((d - 111_195.0).abs() < 10.0);
/// ```
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Computes the point reached by travelling `distance_m` meters from a start
/// point along the initial bearing `bearing_deg` (0 = north, 90 = east).
///
/// Returns `(latitude, longitude)` with longitude normalized to -180..180.
///
/// # Examples
///
/// ```
/// use geofence_core::location::{destination, haversine_distance};
///
/// let (lat, lon) = destination(0.0, 0.0, 90.0, 250.0);
/// let d = haversine_distance(0.0, 0.0, lat, lon);
/// assert!((d - 250.0).abs() < 0.01);
/// ```
#[must_use]
pub fn destination(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_METERS;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    let lon2 = (lambda2.to_degrees() + 540.0) % 360.0 - 180.0;
    (phi2.to_degrees(), lon2)
}

/// Converts latitude/longitude to a geohash string.
///
/// Used to tag positions and geofence centers with an approximate cell,
/// e.g. for log lines that should not carry exact coordinates.
///
/// # Error Handling
///
/// Returns an empty string if encoding fails (NaN, infinite or out-of-range
/// coordinates).
#[must_use]
pub fn location_to_geohash(lat: f64, lon: f64, precision: u8) -> String {
    if !is_valid_coordinate(lat, lon) {
        return String::new();
    }
    geohash::encode(geohash::Coord { x: lon, y: lat }, precision as usize)
        .unwrap_or_else(|_| String::new())
}
