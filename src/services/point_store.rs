//! Immutable set of radar points for the session
//!
//! Records that fail field parsing are skipped and counted, never fatal.
//! Duplicate ids are kept: every instance is scanned, and `get` returns
//! the last one loaded.

use crate::domain::error::SentinelError;
use crate::domain::types::{Point, PointId};
use crate::io::RecordSource;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

/// One database row as produced by a loader, before validation.
///
/// A `None` field means the row did not have that column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub id: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub limit: Option<String>,
}

impl RawRecord {
    pub fn new(id: &str, lat: &str, lon: &str, limit: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            lat: Some(lat.to_string()),
            lon: Some(lon.to_string()),
            limit: Some(limit.to_string()),
        }
    }
}

/// Counts from a load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct PointStore {
    points: Vec<Point>,
    /// id -> index of the last point loaded with that id
    by_id: FxHashMap<PointId, usize>,
}

impl PointStore {
    /// Load from a record source. Fails only if the source cannot be read.
    pub fn load(source: &dyn RecordSource) -> Result<(Self, LoadReport), SentinelError> {
        let records = source.read_records()?;
        let (store, report) = Self::from_records(records);

        info!(
            source = %source.describe(),
            accepted = %report.accepted,
            skipped = %report.skipped,
            "point_store_loaded"
        );
        if store.is_empty() {
            warn!(source = %source.describe(), "point_store_empty");
        }

        Ok((store, report))
    }

    /// Build a store from raw records, skipping the malformed ones
    pub fn from_records<I>(records: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut store = Self::default();
        let mut report = LoadReport::default();

        for (row, record) in records.into_iter().enumerate() {
            match parse_record(record) {
                Ok(point) => {
                    store.push(point);
                    report.accepted += 1;
                }
                Err(e) => {
                    debug!(row = %row, error = %e, "record_skipped");
                    report.skipped += 1;
                }
            }
        }

        (store, report)
    }

    fn push(&mut self, point: Point) {
        let idx = self.points.len();
        if self.by_id.insert(point.id.clone(), idx).is_some() {
            debug!(id = %point.id, "duplicate_point_id");
        }
        self.points.push(point);
    }

    /// All points in insertion order
    pub fn all(&self) -> &[Point] {
        &self.points
    }

    /// Look up by id; with duplicates the last loaded instance wins
    pub fn get(&self, id: &PointId) -> Option<&Point> {
        self.by_id.get(id).map(|&idx| &self.points[idx])
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, SentinelError> {
    match field.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SentinelError::rejected(format!("missing {name}"))),
    }
}

fn parse_coord(field: &Option<String>, name: &str) -> Result<f64, SentinelError> {
    let raw = required(field, name)?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(SentinelError::rejected(format!("invalid {name}: {raw:?}"))),
    }
}

fn parse_record(record: RawRecord) -> Result<Point, SentinelError> {
    let lat = parse_coord(&record.lat, "lat")?;
    let lon = parse_coord(&record.lon, "lon")?;

    let raw_limit = required(&record.limit, "limit")?;
    let limit = raw_limit
        .parse::<i32>()
        .map_err(|_| SentinelError::rejected(format!("invalid limit: {raw_limit:?}")))?;

    let id = record.id.ok_or_else(|| SentinelError::rejected("missing id"))?;

    Ok(Point { id: PointId(id), lat, lon, limit })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paris() -> RawRecord {
        RawRecord::new("R1", "48.8566", "2.3522", "50")
    }

    #[test]
    fn test_from_records_accepts_valid() {
        let (store, report) = PointStore::from_records(vec![
            paris(),
            RawRecord::new("R2", " 45.0 ", "7.5", " 90 "),
        ]);

        assert_eq!(report, LoadReport { accepted: 2, skipped: 0 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[0].id.as_str(), "R1");
        assert_eq!(store.all()[1].lat, 45.0);
        assert_eq!(store.all()[1].limit, 90);
    }

    #[test]
    fn test_skips_malformed_records() {
        let records = vec![
            RawRecord::new("id", "name", "type", "lat"), // header row
            RawRecord::new("R1", "abc", "2.0", "50"),
            RawRecord::new("R2", "48.0", "", "50"),
            RawRecord::new("R3", "48.0", "2.0", "50.5"),
            RawRecord::new("R4", "NaN", "2.0", "50"),
            RawRecord { id: Some("R5".into()), lat: Some("48.0".into()), ..Default::default() },
            RawRecord::default(),
            paris(),
        ];
        let (store, report) = PointStore::from_records(records);

        assert_eq!(report, LoadReport { accepted: 1, skipped: 7 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.all()[0].id.as_str(), "R1");
    }

    #[test]
    fn test_empty_input_is_empty_store() {
        let (store, report) = PointStore::from_records(Vec::new());
        assert!(store.is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn test_duplicates_are_kept_last_wins_lookup() {
        let (store, report) = PointStore::from_records(vec![
            RawRecord::new("R1", "48.0", "2.0", "50"),
            RawRecord::new("R1", "49.0", "3.0", "70"),
        ]);

        assert_eq!(report.accepted, 2);
        assert_eq!(store.len(), 2);
        let found = store.get(&PointId::from("R1")).unwrap();
        assert_eq!(found.limit, 70);
        assert_eq!(found.lat, 49.0);
    }

    #[test]
    fn test_get_unknown() {
        let (store, _) = PointStore::from_records(vec![paris()]);
        assert!(store.get(&PointId::from("nope")).is_none());
    }

    struct BrokenSource;

    impl RecordSource for BrokenSource {
        fn describe(&self) -> String {
            "broken".to_string()
        }

        fn read_records(&self) -> Result<Vec<RawRecord>, SentinelError> {
            Err(SentinelError::unavailable("broken", "permission denied"))
        }
    }

    #[test]
    fn test_load_propagates_unavailable_source() {
        let err = PointStore::load(&BrokenSource).unwrap_err();
        assert!(matches!(err, SentinelError::SourceUnavailable { .. }));
    }
}
