/// CSV + JSON snapshot sink.
///
/// Writes into the run's output directory:
///   stations.csv             one row per station, failed stations included
///   zones.csv                one row per zone
///   station_zone_inputs.csv  per (zone, station) values feeding the zone averages
///   snapshot.json            the full run as JSON

use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::model::{IndexKind, StationResult, StationStatus, Trend, ZoneResult};
use crate::sink::{ResultSink, RunSnapshot, SinkError};

pub const STATIONS_FILE: &str = "stations.csv";
pub const ZONES_FILE: &str = "zones.csv";
pub const ZONE_INPUTS_FILE: &str = "station_zone_inputs.csv";
pub const SNAPSHOT_FILE: &str = "snapshot.json";

pub struct CsvSink {
    output_dir: PathBuf,
}

impl CsvSink {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        CsvSink {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.output_dir.join(file)
    }

    fn write_rows<T: Serialize>(&self, file: &str, rows: &[T]) -> Result<(), SinkError> {
        let path = self.path(file);
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|source| SinkError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

impl ResultSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn publish(&self, snapshot: &RunSnapshot) -> Result<(), SinkError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| SinkError::Io {
            path: self.output_dir.display().to_string(),
            source,
        })?;

        let stations: Vec<StationRow> = snapshot.stations.iter().map(StationRow::from).collect();
        self.write_rows(STATIONS_FILE, &stations)?;

        let zones: Vec<ZoneRow> = snapshot.zones.iter().map(ZoneRow::from).collect();
        self.write_rows(ZONES_FILE, &zones)?;

        self.write_rows(ZONE_INPUTS_FILE, &zone_input_rows(&snapshot.stations))?;

        let json_path = self.path(SNAPSHOT_FILE);
        let file = File::create(&json_path).map_err(|source| SinkError::Io {
            path: json_path.display().to_string(),
            source,
        })?;
        serde_json::to_writer_pretty(file, snapshot)?;

        info!(
            dir = %self.output_dir.display(),
            stations = stations.len(),
            zones = zones.len(),
            "wrote CSV outputs"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

fn label(trend: &Option<Trend>) -> Option<&'static str> {
    trend.as_ref().map(|t| t.label.as_str())
}

fn magnitude(trend: &Option<Trend>) -> Option<f64> {
    trend.as_ref().map(|t| t.magnitude)
}

#[derive(Debug, Serialize)]
struct StationRow<'a> {
    #[serde(rename = "StationID")]
    station_id: &'a str,
    #[serde(rename = "StationName")]
    station_name: &'a str,
    #[serde(rename = "PSA")]
    zones: String,
    status: &'static str,
    failed_stage: Option<String>,
    reason: Option<&'a str>,
    ec: Option<f64>,
    ec_percentile: Option<u8>,
    ec_trend: Option<&'static str>,
    ec_trend_change: Option<f64>,
    ec_fcast: Option<f64>,
    ec_fcast_percentile: Option<u8>,
    ec_fcast_trend: Option<&'static str>,
    bi: Option<f64>,
    bi_percentile: Option<u8>,
    bi_trend: Option<&'static str>,
    bi_trend_change: Option<f64>,
    bi_fcast: Option<f64>,
    bi_fcast_percentile: Option<u8>,
    bi_fcast_trend: Option<&'static str>,
    nfdr_datetime: Option<String>,
    #[serde(rename = "NFDRS_Data_URL")]
    nfdrs_url: Option<&'a str>,
    #[serde(rename = "NFDRS_Fcast_URL")]
    forecast_url: Option<&'a str>,
    #[serde(rename = "Obs_Data_URL")]
    obs_url: Option<&'a str>,
}

impl<'a> From<&'a StationResult> for StationRow<'a> {
    fn from(r: &'a StationResult) -> Self {
        let (status, failed_stage, reason) = match &r.status {
            StationStatus::Assembled => ("assembled", None, None),
            StationStatus::Failed { stage, reason } => {
                ("failed", Some(stage.to_string()), Some(reason.as_str()))
            }
        };
        StationRow {
            station_id: &r.station_id,
            station_name: &r.station_name,
            zones: r.zones.join(";"),
            status,
            failed_stage,
            reason,
            ec: r.erc.current_value,
            ec_percentile: r.erc.current_percentile,
            ec_trend: label(&r.erc.current_trend),
            ec_trend_change: magnitude(&r.erc.current_trend),
            ec_fcast: r.erc.forecast_value,
            ec_fcast_percentile: r.erc.forecast_percentile,
            ec_fcast_trend: label(&r.erc.forecast_trend),
            bi: r.bi.current_value,
            bi_percentile: r.bi.current_percentile,
            bi_trend: label(&r.bi.current_trend),
            bi_trend_change: magnitude(&r.bi.current_trend),
            bi_fcast: r.bi.forecast_value,
            bi_fcast_percentile: r.bi.forecast_percentile,
            bi_fcast_trend: label(&r.bi.forecast_trend),
            nfdr_datetime: r
                .latest_record_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string()),
            nfdrs_url: r.urls.nfdrs.as_deref(),
            forecast_url: r.urls.forecast.as_deref(),
            obs_url: r.urls.observation.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ZoneRow<'a> {
    #[serde(rename = "PSANationalCode")]
    zone: &'a str,
    nfdr_dt: Option<String>,
    member_count: usize,
    assembled_count: usize,
    avg_ec_percentile: Option<f64>,
    avg_ec_trend: Option<&'static str>,
    avg_ec_fcast_percentile: Option<f64>,
    avg_ec_fcast_trend: Option<&'static str>,
    avg_bi_percentile: Option<f64>,
    avg_bi_trend: Option<&'static str>,
    avg_bi_fcast_percentile: Option<f64>,
    avg_bi_fcast_trend: Option<&'static str>,
}

impl<'a> From<&'a ZoneResult> for ZoneRow<'a> {
    fn from(z: &'a ZoneResult) -> Self {
        ZoneRow {
            zone: &z.zone,
            nfdr_dt: z.report_date.map(|d| d.format("%Y-%m-%d").to_string()),
            member_count: z.member_count,
            assembled_count: z.assembled_count,
            avg_ec_percentile: z.erc.avg_percentile,
            avg_ec_trend: label(&z.erc.trend),
            avg_ec_fcast_percentile: z.erc.avg_forecast_percentile,
            avg_ec_fcast_trend: label(&z.erc.forecast_trend),
            avg_bi_percentile: z.bi.avg_percentile,
            avg_bi_trend: label(&z.bi.trend),
            avg_bi_fcast_percentile: z.bi.avg_forecast_percentile,
            avg_bi_fcast_trend: label(&z.bi.forecast_trend),
        }
    }
}

#[derive(Debug, Serialize)]
struct ZoneInputRow<'a> {
    #[serde(rename = "StationID")]
    station_id: &'a str,
    #[serde(rename = "PSA")]
    zone: &'a str,
    #[serde(rename = "ERC_per")]
    erc_percentile: Option<u8>,
    #[serde(rename = "ERC_fcast_per")]
    erc_forecast_percentile: Option<u8>,
    #[serde(rename = "ERC_initial")]
    erc_initial: Option<f64>,
    #[serde(rename = "ERC_final")]
    erc_final: Option<f64>,
    #[serde(rename = "ERC_fcast_initial")]
    erc_forecast_initial: Option<f64>,
    #[serde(rename = "ERC_fcast_final")]
    erc_forecast_final: Option<f64>,
    #[serde(rename = "BI_per")]
    bi_percentile: Option<u8>,
    #[serde(rename = "BI_fcast_per")]
    bi_forecast_percentile: Option<u8>,
    #[serde(rename = "BI_initial")]
    bi_initial: Option<f64>,
    #[serde(rename = "BI_final")]
    bi_final: Option<f64>,
    #[serde(rename = "BI_fcast_initial")]
    bi_forecast_initial: Option<f64>,
    #[serde(rename = "BI_fcast_final")]
    bi_forecast_final: Option<f64>,
}

fn zone_input_rows(stations: &[StationResult]) -> Vec<ZoneInputRow<'_>> {
    let mut rows = Vec::new();
    for station in stations {
        let erc = station.metrics(IndexKind::Erc);
        let bi = station.metrics(IndexKind::Bi);
        for zone in &station.zones {
            rows.push(ZoneInputRow {
                station_id: &station.station_id,
                zone,
                erc_percentile: erc.current_percentile,
                erc_forecast_percentile: erc.forecast_percentile,
                erc_initial: erc.current_window.map(|w| w.initial),
                erc_final: erc.current_window.map(|w| w.final_value),
                erc_forecast_initial: erc.forecast_window.map(|w| w.initial),
                erc_forecast_final: erc.forecast_window.map(|w| w.final_value),
                bi_percentile: bi.current_percentile,
                bi_forecast_percentile: bi.forecast_percentile,
                bi_initial: bi.current_window.map(|w| w.initial),
                bi_final: bi.current_window.map(|w| w.final_value),
                bi_forecast_initial: bi.forecast_window.map(|w| w.initial),
                bi_forecast_final: bi.forecast_window.map(|w| w.final_value),
            });
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::trend::classify;
    use crate::model::{
        AcquisitionUrls, FlatRecord, IndexMetrics, StationStage, TrendWindow, ZoneIndexSummary,
    };
    use chrono::NaiveDate;

    fn snapshot() -> RunSnapshot {
        let run_date = NaiveDate::from_ymd_opt(2024, 7, 22)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let erc = IndexMetrics {
            current_value: Some(47.0),
            current_percentile: Some(90),
            current_trend: Some(classify(42.0, 47.0)),
            current_window: Some(TrendWindow { initial: 42.0, final_value: 47.0 }),
            ..IndexMetrics::default()
        };
        let ok = StationResult {
            station_id: "045101".to_string(),
            station_name: "Alpha RAWS".to_string(),
            zones: vec!["NC01".to_string(), "NC02".to_string()],
            status: StationStatus::Assembled,
            urls: AcquisitionUrls {
                nfdrs: Some("https://wims.test/nfdrs?stn=045101".to_string()),
                ..AcquisitionUrls::default()
            },
            erc,
            bi: IndexMetrics::default(),
            latest_record_time: Some(run_date),
            latest_attributes: FlatRecord::new(),
        };
        let failed = StationResult::failed(
            "045102",
            "Bravo RAWS",
            &["NC01".to_string()],
            AcquisitionUrls {
                nfdrs: Some("https://wims.test/nfdrs?stn=045102".to_string()),
                ..AcquisitionUrls::default()
            },
            StationStage::Fetching,
            "timed out".to_string(),
        );
        let zone = ZoneResult {
            zone: "NC01".to_string(),
            report_date: Some(run_date.date()),
            member_count: 2,
            assembled_count: 1,
            erc: ZoneIndexSummary {
                avg_percentile: Some(90.0),
                trend: Some(classify(42.0, 47.0)),
                ..ZoneIndexSummary::default()
            },
            bi: ZoneIndexSummary::default(),
        };
        RunSnapshot {
            run_date,
            stations: vec![ok, failed],
            zones: vec![zone],
        }
    }

    #[test]
    fn test_publish_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path().join("out"));
        sink.publish(&snapshot()).expect("publish should succeed");

        for file in [STATIONS_FILE, ZONES_FILE, ZONE_INPUTS_FILE, SNAPSHOT_FILE] {
            assert!(dir.path().join("out").join(file).exists(), "{} should exist", file);
        }
    }

    #[test]
    fn test_failed_station_row_keeps_url_and_blanks_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvSink::new(dir.path());
        sink.publish(&snapshot()).unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join(STATIONS_FILE)).unwrap();
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
        assert_eq!(&rows[0][col("ec_percentile")], "90");
        assert_eq!(&rows[0][col("ec_trend")], "Increase");
        assert_eq!(&rows[0][col("PSA")], "NC01;NC02");

        assert_eq!(&rows[1][col("status")], "failed");
        assert_eq!(&rows[1][col("failed_stage")], "fetching");
        assert_eq!(&rows[1][col("ec_percentile")], "");
        assert_eq!(&rows[1][col("NFDRS_Data_URL")], "https://wims.test/nfdrs?stn=045102");
    }

    #[test]
    fn test_zone_inputs_have_one_row_per_station_zone_pair() {
        let dir = tempfile::tempdir().unwrap();
        CsvSink::new(dir.path()).publish(&snapshot()).unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join(ZONE_INPUTS_FILE)).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3, "045101 in two zones plus 045102 in one");
    }

    #[test]
    fn test_snapshot_json_round_trips_through_serde_value() {
        let dir = tempfile::tempdir().unwrap();
        CsvSink::new(dir.path()).publish(&snapshot()).unwrap();

        let text = fs::read_to_string(dir.path().join(SNAPSHOT_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["stations"][1]["status"]["state"], "failed");
        assert_eq!(value["zones"][0]["erc"]["trend"]["label"], "Increase");
    }
}
