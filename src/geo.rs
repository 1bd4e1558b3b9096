//! Great-circle distance and arrival estimates.
//!
//! Everything here is pure: no clocks, no I/O.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average bus speed used when the caller has no better figure.
pub const DEFAULT_SPEED_KMH: f64 = 25.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn distance_km(&self, other: &LatLng) -> f64 {
        distance_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Haversine distance in kilometres on a sphere of radius 6371 km.
///
/// The haversine term is clamped to `[0, 1]` so rounding near antipodal or
/// coincident points never pushes `sqrt` out of its domain.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Initial bearing from `from` to `to`, in degrees clockwise from north (0-360).
pub fn bearing_deg(from: &LatLng, to: &LatLng) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Minutes to cover `distance_km` at `speed_kmh`, rounded to the nearest minute.
///
/// Returns `None` when the estimate is unknown: a speed that is zero, negative
/// or not finite, or a distance that is negative or not finite.
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> Option<u32> {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 {
        return None;
    }
    if !distance_km.is_finite() || distance_km < 0.0 {
        return None;
    }

    let minutes = (distance_km / speed_kmh * 60.0).round();
    Some(minutes as u32)
}

pub fn format_eta(minutes: u32) -> String {
    match minutes {
        0 => "arriving now".to_string(),
        1..=59 => format!("{minutes} min"),
        _ => format!("{}h {}m", minutes / 60, minutes % 60),
    }
}

/// Like [`format_eta`], rendering an unknown estimate as `"unknown"`.
pub fn describe_eta(minutes: Option<u32>) -> String {
    minutes.map_or_else(|| "unknown".to_string(), format_eta)
}

/// Axis-aligned latitude/longitude box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub const fn from_point(point: LatLng) -> Self {
        Self {
            south: point.lat,
            west: point.lng,
            north: point.lat,
            east: point.lng,
        }
    }

    pub fn extend(&mut self, point: LatLng) {
        self.south = self.south.min(point.lat);
        self.north = self.north.max(point.lat);
        self.west = self.west.min(point.lng);
        self.east = self.east.max(point.lng);
    }

    pub fn center(&self) -> LatLng {
        LatLng::new((self.south + self.north) / 2.0, (self.west + self.east) / 2.0)
    }

    pub fn contains(&self, point: &LatLng) -> bool {
        (self.south..=self.north).contains(&point.lat) && (self.west..=self.east).contains(&point.lng)
    }

    /// True when the box has collapsed to a single point.
    pub fn is_point(&self) -> bool {
        self.south == self.north && self.west == self.east
    }
}
