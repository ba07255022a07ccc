use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::Distance;

/// WGS-84 semi-major axis (m)
pub const EARTH_RADIUS: f64 = 6_378_137.0;
/// WGS-84 first eccentricity
pub const EARTH_ECCEN: f64 = 0.081_819_190_8;

/// Absolute position. Latitude and longitude in radians, altitude in meters
/// relative to the home location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Location {
    pub const fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    pub fn from_degrees(lat_deg: f64, lon_deg: f64, alt: f64) -> Self {
        Self::new(lat_deg.to_radians(), lon_deg.to_radians(), alt)
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat.to_degrees()
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon.to_degrees()
    }

    pub fn with_alt(&self, alt: f64) -> Self {
        Self::new(self.lat, self.lon, alt)
    }

    /// Displacement from `self` to `other` expressed in the frame of
    /// `heading` (radians clockwise from north).
    ///
    /// Uses a local tangent-plane projection on the WGS-84 ellipsoid,
    /// evaluated at the mean latitude of the two points. At ranges up to a
    /// few kilometers the horizontal error is well under a meter.
    pub fn distance_to(&self, other: &Location, heading: f64) -> Distance {
        let mean_lat = 0.5 * (self.lat + other.lat);
        let north = (other.lat - self.lat) * meridian_radius(mean_lat);
        let east = wrap_pi(other.lon - self.lon) * prime_vertical_radius(mean_lat) * mean_lat.cos();
        let up = other.alt - self.alt;

        Distance::new(east, north, up).rotate(heading)
    }

    /// Location displaced by `offset`, given in the north-aligned frame
    /// (x east, y north, z up). Inverse of [`Location::distance_to`] with a
    /// heading of zero.
    pub fn offset_by(&self, offset: &Distance) -> Location {
        // Two passes so the projection latitude matches distance_to's mean
        let mut d_lat = offset.y / meridian_radius(self.lat);
        let mut mean_lat = self.lat + 0.5 * d_lat;
        d_lat = offset.y / meridian_radius(mean_lat);
        mean_lat = self.lat + 0.5 * d_lat;

        let d_lon = offset.x / (prime_vertical_radius(mean_lat) * mean_lat.cos());

        Location::new(
            self.lat + d_lat,
            wrap_pi(self.lon + d_lon),
            self.alt + offset.z,
        )
    }

    /// Great-circle ground distance on a spherical earth, for cross-checking
    /// the local projection.
    pub fn haversine_distance(&self, other: &Location) -> f64 {
        let a = Point::new(self.lon_deg(), self.lat_deg());
        let b = Point::new(other.lon_deg(), other.lat_deg());
        a.haversine_distance(&b)
    }
}

fn meridian_radius(lat: f64) -> f64 {
    let e2 = EARTH_ECCEN * EARTH_ECCEN;
    let s = lat.sin();
    EARTH_RADIUS * (1.0 - e2) / (1.0 - e2 * s * s).powf(1.5)
}

fn prime_vertical_radius(lat: f64) -> f64 {
    let e2 = EARTH_ECCEN * EARTH_ECCEN;
    let s = lat.sin();
    EARTH_RADIUS / (1.0 - e2 * s * s).sqrt()
}

/// Wrap an angle to [-π, π)
pub fn wrap_pi(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
