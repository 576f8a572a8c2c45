/// Percentile reference tables and the percentile classifier.
///
/// Each (station, index) pair has an ordered set of right-open ranges
/// `[lower, upper)` mapped to an integer percentile. Tables are loaded once
/// from `Percentiles.csv`, validated here, and only queried afterwards.
///
/// CSV columns: `StationID, Component, GreaterThanEqualTo, LessThan, Percentile`.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::model::IndexKind;
use crate::stations::normalize_station_id;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read table {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("station {station} {kind}: range [{lower}, {upper}) is empty or inverted")]
    InvertedRange {
        station: String,
        kind: IndexKind,
        lower: f64,
        upper: f64,
    },
    #[error("station {station} {kind}: range starting at {lower} overlaps the previous range ending at {previous_upper}")]
    Overlap {
        station: String,
        kind: IndexKind,
        lower: f64,
        previous_upper: f64,
    },
    #[error("station {station} {kind}: percentile {percentile} outside 0-100")]
    PercentileOutOfRange {
        station: String,
        kind: IndexKind,
        percentile: i64,
    },
    #[error("missing column value '{0}'")]
    MissingValue(String),
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileRange {
    pub lower: f64,
    pub upper: f64,
    pub percentile: u8,
}

/// Outcome of a percentile lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Percentile(u8),
    /// No range matched and the value is inside the table's span, or is
    /// not a number.
    Gap,
}

impl Lookup {
    pub fn percentile(self) -> Option<u8> {
        match self {
            Lookup::Percentile(p) => Some(p),
            Lookup::Gap => None,
        }
    }
}

/// Ordered, non-overlapping ranges for one (station, index) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileTable {
    ranges: Vec<PercentileRange>,
    gaps: usize,
}

impl PercentileTable {
    /// Sorts and validates `ranges`. Overlapping or inverted ranges are
    /// rejected; gaps are counted and left for the classifier to report.
    pub fn from_ranges(
        station: &str,
        kind: IndexKind,
        mut ranges: Vec<PercentileRange>,
    ) -> Result<Self, TableError> {
        ranges.sort_by(|a, b| a.lower.total_cmp(&b.lower));

        let mut gaps = 0;
        for (i, range) in ranges.iter().enumerate() {
            if !(range.lower < range.upper) {
                return Err(TableError::InvertedRange {
                    station: station.to_string(),
                    kind,
                    lower: range.lower,
                    upper: range.upper,
                });
            }
            if i > 0 {
                let previous = &ranges[i - 1];
                if range.lower < previous.upper {
                    return Err(TableError::Overlap {
                        station: station.to_string(),
                        kind,
                        lower: range.lower,
                        previous_upper: previous.upper,
                    });
                }
                if range.lower > previous.upper {
                    gaps += 1;
                }
            }
        }

        Ok(PercentileTable { ranges, gaps })
    }

    pub fn ranges(&self) -> &[PercentileRange] {
        &self.ranges
    }

    pub fn gap_count(&self) -> usize {
        self.gaps
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Maps `value` to a percentile.
    ///
    /// Below the first lower bound is 0; above the last upper bound is 100.
    /// A value that no range contains (between two ranges, or exactly on
    /// the last upper bound) is a `Gap`.
    pub fn classify(&self, value: f64) -> Lookup {
        if value.is_nan() {
            return Lookup::Gap;
        }
        let (Some(first), Some(last)) = (self.ranges.first(), self.ranges.last()) else {
            return Lookup::Gap;
        };
        if value < first.lower {
            return Lookup::Percentile(0);
        }
        if value > last.upper {
            return Lookup::Percentile(100);
        }
        self.ranges
            .iter()
            .find(|r| r.lower <= value && value < r.upper)
            .map(|r| Lookup::Percentile(r.percentile))
            .unwrap_or(Lookup::Gap)
    }
}

// ---------------------------------------------------------------------------
// Table set
// ---------------------------------------------------------------------------

/// All percentile tables for a run, keyed by (station id, index).
#[derive(Debug, Clone, Default)]
pub struct PercentileTables {
    tables: HashMap<(String, IndexKind), PercentileTable>,
}

impl PercentileTables {
    pub fn get(&self, station_id: &str, kind: IndexKind) -> Option<&PercentileTable> {
        self.tables.get(&(station_id.to_string(), kind))
    }

    pub fn insert(&mut self, station_id: &str, kind: IndexKind, table: PercentileTable) {
        self.tables.insert((station_id.to_string(), kind), table);
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, IndexKind), &PercentileTable)> {
        self.tables.iter()
    }
}

#[derive(Debug, Deserialize)]
struct PercentileRow {
    #[serde(rename = "StationID")]
    station_id: String,
    #[serde(rename = "Component")]
    component: String,
    #[serde(rename = "GreaterThanEqualTo")]
    lower: f64,
    #[serde(rename = "LessThan")]
    upper: f64,
    #[serde(rename = "Percentile")]
    percentile: i64,
}

/// Outcome of loading the percentile CSV: usable tables plus the per-table
/// problems that caused a table to be dropped.
#[derive(Debug, Default)]
pub struct TableLoad {
    pub tables: PercentileTables,
    pub rejected: Vec<TableError>,
}

/// Loads percentile tables from a CSV file.
///
/// A malformed table only drops that (station, index) pair; the rest of the
/// file still loads. An unreadable file or malformed row is an error.
pub fn load_tables<P: AsRef<Path>>(path: P) -> Result<TableLoad, TableError> {
    let path_str = path.as_ref().display().to_string();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())
        .map_err(|source| TableError::Read { path: path_str.clone(), source })?;
    load_tables_from_reader(reader, &path_str)
}

pub fn load_tables_from_str(contents: &str) -> Result<TableLoad, TableError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    load_tables_from_reader(reader, "<inline>")
}

fn load_tables_from_reader<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    path: &str,
) -> Result<TableLoad, TableError> {
    // Insertion-ordered grouping keeps rejection messages stable.
    let mut grouped: Vec<((String, IndexKind), Vec<PercentileRange>)> = Vec::new();
    // Keys with a bad row; the whole table is dropped, not just the row.
    let mut poisoned: HashSet<(String, IndexKind)> = HashSet::new();
    let mut load = TableLoad::default();

    for row in reader.deserialize::<PercentileRow>() {
        let row = row.map_err(|source| TableError::Read { path: path.to_string(), source })?;
        let Some(kind) = IndexKind::from_component(&row.component) else {
            warn!(station = %row.station_id, component = %row.component, "ignoring percentile row for untracked component");
            continue;
        };
        let station = normalize_station_id(&row.station_id);
        if station.is_empty() {
            return Err(TableError::MissingValue("StationID".to_string()));
        }

        if !(0..=100).contains(&row.percentile) {
            poisoned.insert((station.clone(), kind));
            load.rejected.push(TableError::PercentileOutOfRange {
                station,
                kind,
                percentile: row.percentile,
            });
            continue;
        }

        let range = PercentileRange {
            lower: row.lower,
            upper: row.upper,
            percentile: row.percentile as u8,
        };
        let key = (station, kind);
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ranges)) => ranges.push(range),
            None => grouped.push((key, vec![range])),
        }
    }

    for ((station, kind), ranges) in grouped {
        if poisoned.contains(&(station.clone(), kind)) {
            warn!(station = %station, index = %kind, "rejecting percentile table with an out-of-range percentile");
            continue;
        }
        match PercentileTable::from_ranges(&station, kind, ranges) {
            Ok(table) => {
                if table.gap_count() > 0 {
                    warn!(
                        station = %station,
                        index = %kind,
                        gaps = table.gap_count(),
                        "percentile table has gaps; values inside them will be unknown"
                    );
                }
                load.tables.insert(&station, kind, table);
            }
            Err(e) => {
                warn!(station = %station, index = %kind, error = %e, "rejecting percentile table");
                load.rejected.push(e);
            }
        }
    }

    Ok(load)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
