//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Two properties within this straight-line distance count as the same
/// location for duplicate detection.
pub const DUPLICATE_RADIUS_M: f64 = 100.0;

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance_m(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Whether two points fall strictly within the duplicate radius
pub fn within_duplicate_radius(from: &Coordinates, to: &Coordinates) -> bool {
    haversine_distance_m(from, to) < DUPLICATE_RADIUS_M
}
