//! Great-circle distance between coordinates.
//!
//! Callers must treat a `None` distance as "invalid", never as zero: a
//! request or worker without a usable location is unmatchable, not at the
//! origin.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// A coordinate is usable when it is finite, in range, and not the
    /// (0,0) null-island placeholder that unset locations default to.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }
}

/// Haversine distance in kilometers, or `None` when either point is invalid
/// or the computation does not produce a finite, non-negative number.
pub fn distance_km(a: Coordinates, b: Coordinates) -> Option<f64> {
    if !a.is_valid() || !b.is_valid() {
        return None;
    }

    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let d = 2.0 * EARTH_RADIUS_KM * h.sqrt().asin();

    if d.is_finite() && d >= 0.0 { Some(d) } else { None }
}
