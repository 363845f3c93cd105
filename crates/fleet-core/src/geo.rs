//! Geographic types and calculations for entity positioning

use serde::{Deserialize, Serialize};

/// Earth's radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic coordinates, longitude first as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// Longitude in degrees (-180 to 180)
    pub lon: f64,
    /// Latitude in degrees (-90 to 90)
    pub lat: f64,
}

impl Coordinates {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Check that both components are finite and in range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lon >= -180.0
            && self.lon <= 180.0
    }

    /// Calculate distance to another position using Haversine formula
    /// Returns distance in kilometers
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

/// Fold any finite angle into [0, 360)
pub fn normalize_heading(deg: f64) -> f64 {
    let normalized = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 { 0.0 } else { normalized }
}

/// Signed shortest rotation from `from` to `to`, in (-180, 180]
pub fn shortest_heading_delta(from: f64, to: f64) -> f64 {
    let delta = normalize_heading(to) - normalize_heading(from);
    if delta > 180.0 {
        delta - 360.0
    } else if delta <= -180.0 {
        delta + 360.0
    } else {
        delta
    }
}

/// Geographic bounding box, e.g. for fitting a map viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Smallest box containing every point, `None` for an empty input
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Coordinates>) -> Option<Self> {
        points.into_iter().fold(None, |bounds, p| {
            Some(match bounds {
                None => Self::new(p.lon, p.lat, p.lon, p.lat),
                Some(b) => Self::new(
                    b.min_lon.min(p.lon),
                    b.min_lat.min(p.lat),
                    b.max_lon.max(p.lon),
                    b.max_lat.max(p.lat),
                ),
            })
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_calculation() {
        // Kabul to Kandahar (approximately 450 km)
        let kabul = Coordinates::new(69.2075, 34.5553);
        let kandahar = Coordinates::new(65.7101, 31.6133);

        let distance = kabul.distance_to(&kandahar);
        assert!(distance > 400.0 && distance < 500.0);
    }

    #[test]
    fn test_position_validity() {
        assert!(Coordinates::new(90.0, 45.0).is_valid());
        assert!(!Coordinates::new(0.0, 100.0).is_valid());
        assert!(!Coordinates::new(200.0, 0.0).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading(370.0), 10.0);
        assert_eq!(normalize_heading(-10.0), 350.0);
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(0.0), 0.0);
    }

    #[test]
    fn test_shortest_delta_wraps() {
        assert_eq!(shortest_heading_delta(350.0, 10.0), 20.0);
        assert_eq!(shortest_heading_delta(10.0, 350.0), -20.0);
        assert_eq!(shortest_heading_delta(0.0, 180.0), 180.0);
        assert_eq!(shortest_heading_delta(90.0, 90.0), 0.0);
    }

    #[test]
    fn test_bounds_from_points() {
        let points = [
            Coordinates::new(10.0, 50.0),
            Coordinates::new(12.0, 48.0),
            Coordinates::new(11.0, 49.0),
        ];

        let bounds = GeoBounds::from_points(&points).unwrap();
        assert_eq!(bounds, GeoBounds::new(10.0, 48.0, 12.0, 50.0));

        assert!(GeoBounds::from_points(&Vec::<Coordinates>::new()).is_none());
    }
}
