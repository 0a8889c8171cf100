//! Proximity search against the point store
//!
//! Two phases: a cheap degree-space box discards most points, then the
//! exact haversine distance decides. The box always contains the
//! detection circle, so the result is exactly the points within the radius.

use crate::domain::geo::{haversine_m, wrap_lon_delta, METERS_PER_DEGREE_LAT};
use crate::domain::types::{Candidate, Position};
use crate::services::point_store::PointStore;
use smallvec::SmallVec;

/// Floor for cos(latitude) so the longitude delta stays finite near the poles
const COS_LAT_EPSILON: f64 = 1e-9;

/// Scan result; a handful of hits at most on real roads
pub type Candidates<'a> = SmallVec<[Candidate<'a>; 4]>;

/// Degree-space half-widths of the prefilter box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBox {
    pub lat_delta: f64,
    pub lon_delta: f64,
}

impl SearchBox {
    pub fn around(position: Position, radius_m: f64) -> Self {
        let lat_delta = radius_m / METERS_PER_DEGREE_LAT;
        // Meridians converge fastest at the poleward edge of the box
        let poleward = (position.lat.abs() + lat_delta).min(90.0);
        let cos_lat = poleward.to_radians().cos().max(COS_LAT_EPSILON);
        Self { lat_delta, lon_delta: lat_delta / cos_lat }
    }

    #[inline]
    pub fn contains(&self, center: Position, lat: f64, lon: f64) -> bool {
        (lat - center.lat).abs() <= self.lat_delta
            && wrap_lon_delta(lon - center.lon).abs() <= self.lon_delta
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProximityScanner {
    radius_m: f64,
}

impl ProximityScanner {
    pub fn new(radius_m: f64) -> Self {
        Self { radius_m: radius_m.max(0.0) }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Points within the radius of `position`, nearest first (ties by id)
    pub fn scan<'a>(&self, store: &'a PointStore, position: Position) -> Candidates<'a> {
        let bounds = SearchBox::around(position, self.radius_m);

        let mut hits: Candidates<'a> = store
            .all()
            .iter()
            .filter(|p| bounds.contains(position, p.lat, p.lon))
            .filter_map(|point| {
                let distance_m = haversine_m(position, point.position());
                (distance_m <= self.radius_m).then_some(Candidate { point, distance_m })
            })
            .collect();

        hits.sort_by(Candidate::nearest_first);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::point_store::RawRecord;

    fn store_of(points: &[(&str, f64, f64, i32)]) -> PointStore {
        let records = points.iter().map(|&(id, lat, lon, limit)| {
            RawRecord::new(id, &lat.to_string(), &lon.to_string(), &limit.to_string())
        });
        PointStore::from_records(records).0
    }

    /// Brute-force reference: every point within the radius
    fn brute_force(store: &PointStore, position: Position, radius_m: f64) -> Vec<String> {
        let mut ids: Vec<(f64, String)> = store
            .all()
            .iter()
            .map(|p| (haversine_m(position, p.position()), p.id.0.clone()))
            .filter(|(d, _)| *d <= radius_m)
            .collect();
        ids.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn test_scan_finds_nearby_point() {
        let store = store_of(&[("R1", 48.8566, 2.3522, 50), ("FAR", 48.9, 2.5, 90)]);
        let scanner = ProximityScanner::new(300.0);

        let hits = scanner.scan(&store, Position::new(48.8568, 2.3522));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].point.id.as_str(), "R1");
        assert!((hits[0].distance_m - 22.24).abs() < 0.05);
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let store = PointStore::default();
        let scanner = ProximityScanner::new(300.0);
        for &(lat, lon) in &[(0.0, 0.0), (48.8, 2.3), (-89.99, 10.0), (90.0, 0.0)] {
            assert!(scanner.scan(&store, Position::new(lat, lon)).is_empty());
        }
    }

    #[test]
    fn test_sorted_by_distance_then_id() {
        let store = store_of(&[
            ("C", 45.0010, 7.0, 50),
            ("B", 45.0005, 7.0, 50),
            ("A", 45.0005, 7.0, 70),
            ("D", 45.0001, 7.0, 30),
        ]);
        let scanner = ProximityScanner::new(300.0);
        let hits = scanner.scan(&store, Position::new(45.0, 7.0));

        let ids: Vec<&str> = hits.iter().map(|c| c.point.id.as_str()).collect();
        assert_eq!(ids, vec!["D", "A", "B", "C"]);
        for pair in hits.windows(2) {
            assert!(pair[0].distance_m <= pair[1].distance_m);
        }
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let store = store_of(&[("R1", 45.0, 7.0, 50)]);
        let center = Position::new(45.002, 7.0);
        let exact = haversine_m(center, Position::new(45.0, 7.0));

        assert_eq!(ProximityScanner::new(exact).scan(&store, center).len(), 1);
        assert!(ProximityScanner::new(exact - 0.01).scan(&store, center).is_empty());
    }

    #[test]
    fn test_matches_brute_force_on_grid() {
        // Points on a ring of ~300 m around several centers, including high latitudes
        let radius = 300.0;
        for &(clat, clon) in &[(0.0, 0.0), (48.85, 2.35), (-33.87, 151.21), (70.0, 25.0), (85.0, -40.0)] {
            let center = Position::new(clat, clon);
            let mut points = Vec::new();
            for i in 0..72 {
                let bearing = (i as f64 * 5.0).to_radians();
                for (j, scale) in [0.5, 0.98, 1.0, 1.02, 1.5].iter().enumerate() {
                    let d_deg = radius * scale / 111_194.93;
                    let lat = clat + d_deg * bearing.cos();
                    let lon = clon + d_deg * bearing.sin() / clat.to_radians().cos();
                    points.push((format!("P{i}-{j}"), lat, lon));
                }
            }
            let records = points.iter().map(|(id, lat, lon)| {
                RawRecord::new(id, &lat.to_string(), &lon.to_string(), "50")
            });
            let (store, _) = PointStore::from_records(records);

            let hits = ProximityScanner::new(radius).scan(&store, center);
            let got: Vec<String> = hits.iter().map(|c| c.point.id.0.clone()).collect();
            assert_eq!(got, brute_force(&store, center, radius), "center {clat},{clon}");
            assert!(hits.iter().all(|c| c.distance_m <= radius));
        }
    }

    #[test]
    fn test_across_antimeridian() {
        let store = store_of(&[("EAST", 10.0, 179.9995, 50), ("WEST", 10.0, -179.9995, 50)]);
        let scanner = ProximityScanner::new(300.0);

        let hits = scanner.scan(&store, Position::new(10.0, 179.9999));
        let ids: Vec<&str> = hits.iter().map(|c| c.point.id.as_str()).collect();
        assert_eq!(ids, vec!["EAST", "WEST"]);
    }

    #[test]
    fn test_near_pole_box_stays_finite() {
        let bounds = SearchBox::around(Position::new(90.0, 0.0), 300.0);
        assert!(bounds.lon_delta.is_finite());
        assert!(bounds.lon_delta > 180.0);

        let store = store_of(&[("POLE", 89.999, 135.0, 50)]);
        let hits = ProximityScanner::new(300.0).scan(&store, Position::new(89.999, -45.0));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_duplicates_scanned_independently() {
        let store = store_of(&[("R1", 45.0001, 7.0, 50), ("R1", 45.0002, 7.0, 70)]);
        let hits = ProximityScanner::new(300.0).scan(&store, Position::new(45.0, 7.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].point.limit, 50);
        assert_eq!(hits[1].point.limit, 70);
    }

    #[test]
    fn test_identical_stores_identical_results() {
        let rows = [("R1", 45.0001, 7.0, 50), ("R2", 45.001, 7.001, 70), ("R3", 45.1, 7.0, 90)];
        let first = store_of(&rows);
        let second = store_of(&rows);
        let scanner = ProximityScanner::new(300.0);

        for &(lat, lon) in &[(45.0, 7.0), (45.0005, 7.0005), (45.1, 7.0), (0.0, 0.0)] {
            let pos = Position::new(lat, lon);
            let a: Vec<(String, f64)> =
                scanner.scan(&first, pos).iter().map(|c| (c.point.id.0.clone(), c.distance_m)).collect();
            let b: Vec<(String, f64)> =
                scanner.scan(&second, pos).iter().map(|c| (c.point.id.0.clone(), c.distance_m)).collect();
            assert_eq!(a, b);
        }
    }
}
