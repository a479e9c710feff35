use serde::{Deserialize, Serialize};

use gtfs::LonLat;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn haversine_distance(a: LonLat, b: LonLat) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h slightly past 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Forward azimuth from a to b in degrees, clockwise from north, in [0, 360)
pub fn initial_bearing(a: LonLat, b: LonLat) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}

fn normalize_degrees(degrees: f64) -> f64 {
    let x = degrees.rem_euclid(360.0);
    // rem_euclid of a tiny negative number can round up to exactly 360
    if x >= 360.0 {
        0.0
    } else {
        x
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compass {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Compass {
    const ALL: [Compass; 8] = [
        Compass::N,
        Compass::NE,
        Compass::E,
        Compass::SE,
        Compass::S,
        Compass::SW,
        Compass::W,
        Compass::NW,
    ];

    /// `round(bearing / 45) mod 8`, starting at north
    pub fn from_bearing(degrees: f64) -> Self {
        let bucket = (normalize_degrees(degrees) / 45.0).round() as usize % 8;
        Self::ALL[bucket]
    }
}

impl std::fmt::Display for Compass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
