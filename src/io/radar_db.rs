//! Radar database file reader
//!
//! Format: one radar per line, fields separated by `;`.
//! Field 0 = id, 3 = latitude, 4 = longitude, 5 = speed limit.
//! Other fields (name, road, direction...) are ignored. Short rows become
//! records with missing fields and are rejected by the point store, as are
//! header rows.
//!
//! A field that starts with `"` is quoted: `;` inside it is literal and `""`
//! is an escaped quote. Quoted fields never span lines.

use crate::domain::error::SentinelError;
use crate::io::RecordSource;
use crate::services::point_store::RawRecord;
use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use tracing::debug;

const FIELD_ID: usize = 0;
const FIELD_LAT: usize = 3;
const FIELD_LON: usize = 4;
const FIELD_LIMIT: usize = 5;

const DELIMITER: char = ';';
const QUOTE: char = '"';

pub struct RadarDbFile {
    path: PathBuf,
}

impl RadarDbFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for RadarDbFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read_records(&self) -> Result<Vec<RawRecord>, SentinelError> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| SentinelError::unavailable(format!("radar database {}", self.describe()), e))?;

        let text = String::from_utf8_lossy(&bytes);
        let records = parse_rows(&text);
        debug!(path = %self.describe(), rows = %records.len(), "radar_db_read");
        Ok(records)
    }
}

/// Split one line into fields, honoring quoted fields
fn split_fields(line: &str) -> SmallVec<[String; 8]> {
    let mut fields = SmallVec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    chars.next();
                    field.push(QUOTE);
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            QUOTE if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            // Leading blanks are dropped so ` "x"` is still a quoted field
            c if at_field_start && c.is_whitespace() => {}
            c => {
                field.push(c);
                at_field_start = false;
            }
        }
    }
    fields.push(field);
    fields
}

/// Split database text into raw records, one per non-blank line
pub fn parse_rows(text: &str) -> Vec<RawRecord> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields = split_fields(line);
            let field = |idx: usize| fields.get(idx).map(|f| f.trim().to_string());
            RawRecord {
                id: field(FIELD_ID),
                lat: field(FIELD_LAT),
                lon: field(FIELD_LON),
                limit: field(FIELD_LIMIT),
            }
        })
        .collect()
}
