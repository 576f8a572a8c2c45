/// Core data types for the fire danger percentile/trend service.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O, only types and the small amount of behaviour that
/// belongs to them (display names, field keys, missing-value constructors).

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Index kinds
// ---------------------------------------------------------------------------

/// The two fire danger indices tracked per station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IndexKind {
    /// Energy Release Component.
    Erc,
    /// Burning Index.
    Bi,
}

impl IndexKind {
    pub const ALL: [IndexKind; 2] = [IndexKind::Erc, IndexKind::Bi];

    /// Tag carrying this index in a WIMS NFDRS record.
    pub fn field_key(&self) -> &'static str {
        match self {
            IndexKind::Erc => "ec",
            IndexKind::Bi => "bi",
        }
    }

    /// Component name used in the percentile reference table.
    pub fn component(&self) -> &'static str {
        match self {
            IndexKind::Erc => "ERC",
            IndexKind::Bi => "BI",
        }
    }

    pub fn from_component(component: &str) -> Option<Self> {
        match component.trim().to_ascii_uppercase().as_str() {
            "ERC" | "EC" => Some(IndexKind::Erc),
            "BI" => Some(IndexKind::Bi),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component())
    }
}

// ---------------------------------------------------------------------------
// Raw and reconciled records
// ---------------------------------------------------------------------------

/// Flat `tag -> text` record exactly as the remote source returned it.
pub type FlatRecord = BTreeMap<String, String>;

/// One NFDRS index reading (observed or forecast) for a station.
///
/// Produced by the acquisition adapter. `hour` is kept separate from `date`
/// so the reconciler owns timestamp construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub date: NaiveDate,
    pub hour: u32,
    /// Model priority rank; lower wins among same-day candidates.
    pub model_priority: u32,
    pub erc: Option<f64>,
    pub bi: Option<f64>,
    /// Every tag of the source record, including the ones parsed above.
    pub fields: FlatRecord,
}

impl RawRecord {
    pub fn index_value(&self, kind: IndexKind) -> Option<f64> {
        match kind {
            IndexKind::Erc => self.erc,
            IndexKind::Bi => self.bi,
        }
    }
}

/// One weather observation for a station.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub fields: FlatRecord,
}

/// The single record chosen to represent one station-day.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalDailyRecord {
    pub timestamp: NaiveDateTime,
    pub model_priority: u32,
    pub erc: Option<f64>,
    pub bi: Option<f64>,
    /// Index fields, plus observation fields when exactly one observation
    /// shared this record's timestamp. Index fields win on name clashes.
    pub attributes: FlatRecord,
    pub observation_merged: bool,
}

impl CanonicalDailyRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn index_value(&self, kind: IndexKind) -> Option<f64> {
        match kind {
            IndexKind::Erc => self.erc,
            IndexKind::Bi => self.bi,
        }
    }
}

// ---------------------------------------------------------------------------
// Trend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendLabel {
    Increase,
    Decrease,
    #[serde(rename = "No Change")]
    NoChange,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Increase => "Increase",
            TrendLabel::Decrease => "Decrease",
            TrendLabel::NoChange => "No Change",
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified change between two index values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub label: TrendLabel,
    /// `|final - initial|`, rounded to one decimal place.
    pub magnitude: f64,
    /// Signed difference, unrounded. Kept for direction wording in logs.
    #[serde(skip)]
    pub diff: f64,
}

/// The two values a trend was computed from. Zone aggregation averages these
/// rather than voting over per-station labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendWindow {
    pub initial: f64,
    #[serde(rename = "final")]
    pub final_value: f64,
}

// ---------------------------------------------------------------------------
// Station output
// ---------------------------------------------------------------------------

/// Per-index metrics for one station. `None` means unknown / missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexMetrics {
    pub current_value: Option<f64>,
    pub current_percentile: Option<u8>,
    pub current_trend: Option<Trend>,
    pub current_window: Option<TrendWindow>,
    pub forecast_value: Option<f64>,
    pub forecast_percentile: Option<u8>,
    pub forecast_trend: Option<Trend>,
    pub forecast_window: Option<TrendWindow>,
}

/// URLs used to acquire a station's data. Preserved even when the station
/// fails, so operators can replay the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionUrls {
    /// Observed-index URL at the reporting hour that was accepted (or the
    /// first hour tried, if none returned data).
    pub nfdrs: Option<String>,
    pub forecast: Option<String>,
    pub observation: Option<String>,
}

/// Processing stage a station was in when it reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StationStage {
    Fetching,
    Reconciling,
    Classifying,
    Assembled,
}

impl fmt::Display for StationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StationStage::Fetching => "fetching",
            StationStage::Reconciling => "reconciling",
            StationStage::Classifying => "classifying",
            StationStage::Assembled => "assembled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StationStatus {
    Assembled,
    Failed { stage: StationStage, reason: String },
}

/// Per-station output of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationResult {
    pub station_id: String,
    pub station_name: String,
    pub zones: Vec<String>,
    pub status: StationStatus,
    pub urls: AcquisitionUrls,
    pub erc: IndexMetrics,
    pub bi: IndexMetrics,
    /// Timestamp of the latest canonical observed record.
    pub latest_record_time: Option<NaiveDateTime>,
    /// Merged attributes of today's canonical record, for pass-through.
    pub latest_attributes: FlatRecord,
}

impl StationResult {
    /// A station whose every derived field is missing. Acquisition
    /// metadata is kept.
    pub fn failed(
        station_id: &str,
        station_name: &str,
        zones: &[String],
        urls: AcquisitionUrls,
        stage: StationStage,
        reason: String,
    ) -> Self {
        StationResult {
            station_id: station_id.to_string(),
            station_name: station_name.to_string(),
            zones: zones.to_vec(),
            status: StationStatus::Failed { stage, reason },
            urls,
            erc: IndexMetrics::default(),
            bi: IndexMetrics::default(),
            latest_record_time: None,
            latest_attributes: FlatRecord::new(),
        }
    }

    pub fn is_assembled(&self) -> bool {
        matches!(self.status, StationStatus::Assembled)
    }

    pub fn metrics(&self, kind: IndexKind) -> &IndexMetrics {
        match kind {
            IndexKind::Erc => &self.erc,
            IndexKind::Bi => &self.bi,
        }
    }
}

// ---------------------------------------------------------------------------
// Zone output
// ---------------------------------------------------------------------------

/// Zone-level summary of one index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneIndexSummary {
    /// Mean of member current percentiles, 2 decimals.
    pub avg_percentile: Option<f64>,
    /// Trend of (mean initial, mean final) over members.
    pub trend: Option<Trend>,
    pub avg_forecast_percentile: Option<f64>,
    pub forecast_trend: Option<Trend>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneResult {
    pub zone: String,
    /// Run date; missing when the zone failed.
    pub report_date: Option<NaiveDate>,
    pub member_count: usize,
    pub assembled_count: usize,
    pub erc: ZoneIndexSummary,
    pub bi: ZoneIndexSummary,
}

impl ZoneResult {
    pub fn missing(zone: &str, member_count: usize) -> Self {
        ZoneResult {
            zone: zone.to_string(),
            report_date: None,
            member_count,
            assembled_count: 0,
            erc: ZoneIndexSummary::default(),
            bi: ZoneIndexSummary::default(),
        }
    }

    pub fn summary(&self, kind: IndexKind) -> &ZoneIndexSummary {
        match kind {
            IndexKind::Erc => &self.erc,
            IndexKind::Bi => &self.bi,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
