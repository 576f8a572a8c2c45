/// Station roster for the fire danger service.
///
/// The roster (`AllStation.csv`) lists one row per (station, zone) pair.
/// A station belonging to several zones appears on several rows; it is
/// processed once and contributes to every zone it is listed under.
///
/// CSV columns: `StationID, StationName, PSA, FuelModelCode`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// Reference data for one weather station.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    /// Six-digit station identifier.
    pub station_id: String,
    pub name: String,
    /// NFDRS fuel model code passed to the index request (e.g. `Y`).
    pub fuel_model: String,
    /// Zones (PSAs) this station is averaged into, in roster order.
    pub zones: Vec<String>,
}

/// Immutable roster loaded once per run, in roster order.
#[derive(Debug, Clone, Default)]
pub struct StationRoster {
    stations: Vec<Station>,
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("roster row {row}: missing StationID")]
    MissingStationId { row: usize },
    #[error("station {station}: conflicting fuel models '{first}' and '{second}'")]
    ConflictingFuelModel {
        station: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "StationID")]
    station_id: String,
    #[serde(rename = "StationName")]
    name: String,
    #[serde(rename = "PSA", default)]
    zone: String,
    #[serde(rename = "FuelModelCode", default)]
    fuel_model: String,
}

/// Zero-pads numeric station identifiers to six digits (`45101` -> `045101`).
/// Non-numeric identifiers are only trimmed.
pub fn normalize_station_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>6}", trimmed)
    } else {
        trimmed.to_string()
    }
}

impl StationRoster {
    pub fn from_stations(stations: Vec<Station>) -> Self {
        StationRoster { stations }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Looks up a station by identifier. Returns `None` if not found.
    pub fn find_station(&self, station_id: &str) -> Option<&Station> {
        let id = normalize_station_id(station_id);
        self.stations.iter().find(|s| s.station_id == id)
    }

    pub fn all_station_ids(&self) -> Vec<&str> {
        self.stations.iter().map(|s| s.station_id.as_str()).collect()
    }

    /// Zone code -> member station ids, sorted by zone code. Zones equal to
    /// `excluded_zone` (the roster's "not in any zone" marker) are skipped.
    pub fn zone_members(&self, excluded_zone: &str) -> BTreeMap<String, Vec<String>> {
        let mut members: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for station in &self.stations {
            for zone in &station.zones {
                if zone == excluded_zone {
                    continue;
                }
                members
                    .entry(zone.clone())
                    .or_default()
                    .push(station.station_id.clone());
            }
        }
        members
    }
}

/// Loads the station roster from a CSV file.
pub fn load_roster<P: AsRef<Path>>(path: P) -> Result<StationRoster, RosterError> {
    let path_str = path.as_ref().display().to_string();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path.as_ref())
        .map_err(|source| RosterError::Read { path: path_str.clone(), source })?;
    roster_from_reader(reader, &path_str)
}

pub fn load_roster_from_str(contents: &str) -> Result<StationRoster, RosterError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    roster_from_reader(reader, "<inline>")
}

fn roster_from_reader<R: std::io::Read>(
    mut reader: csv::Reader<R>,
    path: &str,
) -> Result<StationRoster, RosterError> {
    let mut stations: Vec<Station> = Vec::new();

    for (i, row) in reader.deserialize::<RosterRow>().enumerate() {
        let row = row.map_err(|source| RosterError::Read { path: path.to_string(), source })?;
        let station_id = normalize_station_id(&row.station_id);
        if station_id.is_empty() {
            // Header is row 1.
            return Err(RosterError::MissingStationId { row: i + 2 });
        }
        let zone = row.zone.trim().to_string();
        let fuel_model = row.fuel_model.trim().to_string();

        match stations.iter_mut().find(|s| s.station_id == station_id) {
            Some(existing) => {
                if existing.fuel_model.is_empty() {
                    existing.fuel_model = fuel_model;
                } else if !fuel_model.is_empty() && existing.fuel_model != fuel_model {
                    return Err(RosterError::ConflictingFuelModel {
                        station: station_id,
                        first: existing.fuel_model.clone(),
                        second: fuel_model,
                    });
                }
                if !zone.is_empty() && !existing.zones.contains(&zone) {
                    existing.zones.push(zone);
                }
            }
            None => stations.push(Station {
                station_id,
                name: row.name.trim().to_string(),
                fuel_model,
                zones: if zone.is_empty() { Vec::new() } else { vec![zone] },
            }),
        }
    }

    Ok(StationRoster { stations })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = "StationID,StationName,PSA,FuelModelCode\n\
                          45101,Alpha RAWS,NC01,Y\n\
                          45102,Bravo RAWS,NC01,Y\n\
                          45101,Alpha RAWS,NC02,Y\n\
                          45205,Charlie RAWS,Non-PSA,V\n\
                          045301,Delta RAWS,NC02,\n";

    #[test]
    fn test_station_ids_are_zero_padded_to_six_digits() {
        assert_eq!(normalize_station_id("45101"), "045101");
        assert_eq!(normalize_station_id(" 045101 "), "045101");
        assert_eq!(normalize_station_id("1234567"), "1234567");
        assert_eq!(normalize_station_id("KPIA"), "KPIA");
    }

    #[test]
    fn test_roster_merges_multi_zone_stations() {
        let roster = load_roster_from_str(ROSTER).expect("roster should parse");
        assert_eq!(roster.len(), 4, "45101 listed twice should load once");

        let alpha = roster.find_station("45101").expect("Alpha should be present");
        assert_eq!(alpha.zones, vec!["NC01".to_string(), "NC02".to_string()]);
        assert_eq!(alpha.fuel_model, "Y");
    }

    #[test]
    fn test_roster_preserves_file_order() {
        let roster = load_roster_from_str(ROSTER).unwrap();
        assert_eq!(
            roster.all_station_ids(),
            vec!["045101", "045102", "045205", "045301"]
        );
    }

    #[test]
    fn test_zone_members_skip_excluded_zone() {
        let roster = load_roster_from_str(ROSTER).unwrap();
        let members = roster.zone_members("Non-PSA");

        assert_eq!(members.len(), 2);
        assert_eq!(members["NC01"], vec!["045101", "045102"]);
        assert_eq!(members["NC02"], vec!["045101", "045301"]);
        assert!(!members.contains_key("Non-PSA"));
    }

    #[test]
    fn test_find_station_returns_none_for_unknown_id() {
        let roster = load_roster_from_str(ROSTER).unwrap();
        assert!(roster.find_station("999999").is_none());
    }

    #[test]
    fn test_conflicting_fuel_models_are_rejected() {
        let csv = "StationID,StationName,PSA,FuelModelCode\n\
                   45101,Alpha,NC01,Y\n\
                   45101,Alpha,NC02,V\n";
        assert!(matches!(
            load_roster_from_str(csv),
            Err(RosterError::ConflictingFuelModel { .. })
        ));
    }
}
