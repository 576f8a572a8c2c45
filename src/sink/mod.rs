/// Result sinks: where a finished run is written.
///
/// - `csv`             - troubleshooting CSVs plus a JSON snapshot
/// - `feature_service` - hosted station/zone layers, updated in place
///
/// A sink sees the run only after every station and zone is final.

pub mod csv;
pub mod feature_service;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::model::{StationResult, ZoneResult};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service rejected request: {0}")]
    Service(String),
    #[error("{batch} failed after {attempts} attempts: {last}")]
    Exhausted {
        batch: String,
        attempts: u32,
        last: Box<SinkError>,
    },
}

/// Everything one run produced, in roster order for stations and zone-code
/// order for zones.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_date: NaiveDateTime,
    pub stations: Vec<StationResult>,
    pub zones: Vec<ZoneResult>,
}

impl RunSnapshot {
    pub fn assembled_count(&self) -> usize {
        self.stations.iter().filter(|s| s.is_assembled()).count()
    }
}

pub trait ResultSink {
    fn name(&self) -> &str;
    fn publish(&self, snapshot: &RunSnapshot) -> Result<(), SinkError>;
}

/// Types a WIMS attribute for writing: unsigned digit strings become integers, values with
/// a `.` become floats, staffing level `sl` keeps its leading digit, and
/// anything else is text.
pub fn typed_attribute(key: &str, raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    if key == "sl" {
        if let Some(level) = raw.chars().next().and_then(|c| c.to_digit(10)) {
            return Value::from(level);
        }
    }
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::from(i);
        }
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            return Value::from(f);
        }
    }
    Value::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_typing() {
        assert_eq!(typed_attribute("rh", "15"), Value::from(15));
        assert_eq!(typed_attribute("ppt_24", "0.05"), Value::from(0.05));
        assert_eq!(typed_attribute("sl", "3+"), Value::from(3u32));
        assert_eq!(typed_attribute("sl", "2-"), Value::from(2u32));
        assert_eq!(typed_attribute("msgc", "16Y2"), Value::from("16Y2"));
        assert_eq!(typed_attribute("wdir", ""), Value::Null);
    }

    #[test]
    fn test_only_plain_digit_strings_become_integers() {
        assert_eq!(typed_attribute("kbdi", "-12"), Value::from("-12"), "signed text stays text");
        assert_eq!(typed_attribute("kbdi", "+12"), Value::from("+12"));
        assert_eq!(typed_attribute("kbdi", "0012"), Value::from(12));
        assert_eq!(
            typed_attribute("sta_id", "99999999999999999999"),
            Value::from("99999999999999999999"),
            "digits too large for an integer stay text"
        );
    }
}
