//! Great-circle distance on a spherical Earth

use crate::domain::types::Position;

/// Mean Earth radius (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Approximate meters per degree of latitude, used for degree-space boxes
pub const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Haversine distance between two fixes, in meters.
///
/// Symmetric, zero for identical inputs, never negative.
pub fn haversine_m(a: Position, b: Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Wrap a longitude difference into [-180, 180] degrees
#[inline]
pub fn wrap_lon_delta(d_lon: f64) -> f64 {
    let wrapped = (d_lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && d_lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = Position::new(48.8566, 2.3522);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let points = [
            Position::new(48.8566, 2.3522),
            Position::new(51.5074, -0.1278),
            Position::new(-33.8688, 151.2093),
            Position::new(89.9, 45.0),
            Position::new(0.0, 179.99),
        ];
        for &a in &points {
            for &b in &points {
                assert_eq!(haversine_m(a, b), haversine_m(b, a));
                assert!(haversine_m(a, b) >= 0.0);
            }
        }
    }

    #[test]
    fn test_known_distances() {
        // 0.0002 degrees of latitude near Paris is ~22 m
        let d = haversine_m(Position::new(48.8566, 2.3522), Position::new(48.8568, 2.3522));
        assert!((d - 22.24).abs() < 0.05, "got {d}");

        // Paris to London is ~343.5 km
        let d = haversine_m(Position::new(48.8566, 2.3522), Position::new(51.5074, -0.1278));
        assert!((d - 343_550.0).abs() < 500.0, "got {d}");
    }

    #[test]
    fn test_antipodal_is_finite() {
        let d = haversine_m(Position::new(0.0, 0.0), Position::new(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_monotonic_along_meridian() {
        let origin = Position::new(45.0, 7.0);
        let mut last = 0.0;
        for step in 1..=50 {
            let d = haversine_m(origin, Position::new(45.0 + step as f64 * 0.001, 7.0));
            assert!(d > last);
            last = d;
        }
    }

    #[test]
    fn test_wrap_lon_delta() {
        assert_eq!(wrap_lon_delta(0.5), 0.5);
        assert_eq!(wrap_lon_delta(-0.5), -0.5);
        assert!((wrap_lon_delta(359.998) - -0.002).abs() < 1e-9);
        assert!((wrap_lon_delta(-359.998) - 0.002).abs() < 1e-9);
        assert_eq!(wrap_lon_delta(180.0), 180.0);
        assert_eq!(wrap_lon_delta(-180.0), -180.0);
    }
}
