//! Privacy areas
//!
//! Records taken inside a privacy area are flagged. The device never keeps
//! the configured centre as the reference point: each area gets a randomly
//! shifted ("transformed") centre within its radius, and membership is tested
//! against that. The configured centre always stays inside the area.

use core::f64::consts::PI;

use nanorand::{Rng, WyRand};

use crate::gps::GpsFix;

/// Mean earth radius used for distances
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Largest centre shift as a fraction of the radius
const MAX_SHIFT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PrivacyArea {
    pub latitude: f64,
    pub longitude: f64,
    pub transformed_latitude: f64,
    pub transformed_longitude: f64,
    pub radius_m: f64,
}

impl PrivacyArea {
    /// New area around `latitude`/`longitude`, shifted using `rng`
    pub fn new(latitude: f64, longitude: f64, radius_m: f64, rng: &mut WyRand) -> Self {
        let bearing = 2.0 * PI * unit(rng);
        let shift_m = MAX_SHIFT * radius_m * unit(rng);
        let (transformed_latitude, transformed_longitude) = offset(latitude, longitude, bearing, shift_m);
        Self {
            latitude,
            longitude,
            transformed_latitude,
            transformed_longitude,
            radius_m,
        }
    }

    /// Whether a position lies inside the area
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        haversine_m(self.transformed_latitude, self.transformed_longitude, latitude, longitude) < self.radius_m
    }
}

/// Whether the fix position lies in any of `areas`
pub fn inside_any(areas: &[PrivacyArea], fix: &GpsFix) -> bool {
    fix.has_position() && areas.iter().any(|area| area.contains(fix.latitude(), fix.longitude()))
}

/// Great-circle distance in metres
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = libm::pow(libm::sin(d_phi / 2.0), 2.0)
        + libm::cos(phi1) * libm::cos(phi2) * libm::pow(libm::sin(d_lambda / 2.0), 2.0);
    2.0 * EARTH_RADIUS_M * libm::asin(libm::sqrt(a.min(1.0)))
}

/// Point `distance_m` away from a position in direction `bearing` (radians from north)
fn offset(latitude: f64, longitude: f64, bearing: f64, distance_m: f64) -> (f64, f64) {
    let d_lat = distance_m * libm::cos(bearing) / EARTH_RADIUS_M;
    let d_lon = distance_m * libm::sin(bearing) / (EARTH_RADIUS_M * libm::cos(latitude.to_radians()));
    (latitude + d_lat.to_degrees(), longitude + d_lon.to_degrees())
}

/// Uniform value in `[0, 1)`
fn unit(rng: &mut WyRand) -> f64 {
    f64::from(rng.generate::<u32>()) / (f64::from(u32::MAX) + 1.0)
}
