/// Zone aggregator.
///
/// Runs only after every station has reached a terminal state. For each
/// zone it averages the member stations' percentiles and trend windows;
/// the zone trend is the trend of the averaged window, not a vote over
/// member labels. Failed members contribute nothing.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::analysis::trend::{self, round_to};
use crate::model::{
    IndexKind, IndexMetrics, StationResult, Trend, TrendWindow, ZoneIndexSummary, ZoneResult,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneError {
    #[error("zone {zone}: {index} {metric} is not a finite number")]
    NonFinite {
        zone: String,
        index: IndexKind,
        metric: &'static str,
    },
}

/// Aggregates every zone in `members` (zone code -> station ids).
///
/// A zone-level error blanks that zone only.
pub fn aggregate_zones(
    results: &[StationResult],
    members: &BTreeMap<String, Vec<String>>,
    report_date: NaiveDate,
    deadband: f64,
) -> Vec<ZoneResult> {
    let by_id: HashMap<&str, &StationResult> =
        results.iter().map(|r| (r.station_id.as_str(), r)).collect();

    members
        .iter()
        .map(|(zone, ids)| {
            let member_results: Vec<&StationResult> =
                ids.iter().filter_map(|id| by_id.get(id.as_str()).copied()).collect();
            match aggregate_zone(zone, ids.len(), &member_results, report_date, deadband) {
                Ok(result) => result,
                Err(e) => {
                    warn!(zone = %zone, error = %e, "zone aggregation failed");
                    ZoneResult::missing(zone, ids.len())
                }
            }
        })
        .collect()
}

pub fn aggregate_zone(
    zone: &str,
    member_count: usize,
    members: &[&StationResult],
    report_date: NaiveDate,
    deadband: f64,
) -> Result<ZoneResult, ZoneError> {
    let assembled: Vec<&StationResult> =
        members.iter().copied().filter(|r| r.is_assembled()).collect();

    info!(
        zone = %zone,
        members = member_count,
        assembled = assembled.len(),
        "aggregating zone"
    );

    Ok(ZoneResult {
        zone: zone.to_string(),
        report_date: Some(report_date),
        member_count,
        assembled_count: assembled.len(),
        erc: summarize(zone, IndexKind::Erc, &assembled, deadband)?,
        bi: summarize(zone, IndexKind::Bi, &assembled, deadband)?,
    })
}

fn summarize(
    zone: &str,
    kind: IndexKind,
    members: &[&StationResult],
    deadband: f64,
) -> Result<ZoneIndexSummary, ZoneError> {
    let metrics: Vec<&IndexMetrics> = members.iter().map(|r| r.metrics(kind)).collect();

    let avg_percentile = average_percentile(zone, kind, "percentile", &metrics, |m| {
        m.current_percentile
    })?;
    let avg_forecast_percentile =
        average_percentile(zone, kind, "forecast percentile", &metrics, |m| {
            m.forecast_percentile
        })?;
    let trend = zone_trend(zone, kind, "trend", &metrics, |m| m.current_window, deadband)?;
    let forecast_trend = zone_trend(
        zone,
        kind,
        "forecast trend",
        &metrics,
        |m| m.forecast_window,
        deadband,
    )?;

    Ok(ZoneIndexSummary {
        avg_percentile,
        trend,
        avg_forecast_percentile,
        forecast_trend,
    })
}

fn average_percentile<F>(
    zone: &str,
    kind: IndexKind,
    metric: &'static str,
    metrics: &[&IndexMetrics],
    select: F,
) -> Result<Option<f64>, ZoneError>
where
    F: Fn(&IndexMetrics) -> Option<u8>,
{
    let values: Vec<f64> = metrics.iter().filter_map(|m| select(*m)).map(f64::from).collect();
    let Some(avg) = mean(&values) else {
        return Ok(None);
    };
    let avg = finite(zone, kind, metric, avg)?;
    let rounded = round_to(avg, 2);
    info!(zone = %zone, index = %kind, metric, mean = rounded, "zone mean");
    Ok(Some(rounded))
}

fn zone_trend<F>(
    zone: &str,
    kind: IndexKind,
    metric: &'static str,
    metrics: &[&IndexMetrics],
    select: F,
    deadband: f64,
) -> Result<Option<Trend>, ZoneError>
where
    F: Fn(&IndexMetrics) -> Option<TrendWindow>,
{
    let windows: Vec<TrendWindow> = metrics.iter().filter_map(|m| select(*m)).collect();
    let initials: Vec<f64> = windows.iter().map(|w| w.initial).collect();
    let finals: Vec<f64> = windows.iter().map(|w| w.final_value).collect();

    let (Some(initial), Some(final_value)) = (mean(&initials), mean(&finals)) else {
        return Ok(None);
    };
    let window = TrendWindow {
        initial: finite(zone, kind, metric, initial)?,
        final_value: finite(zone, kind, metric, final_value)?,
    };

    let t = trend::classify_window(&window, deadband);
    info!(zone = %zone, index = %kind, metric, trend = %t.label, change = %trend::describe(&t), "zone trend");
    Ok(Some(t))
}

/// Arithmetic mean; `None` for an empty set.
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn finite(zone: &str, index: IndexKind, metric: &'static str, value: f64) -> Result<f64, ZoneError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ZoneError::NonFinite {
            zone: zone.to_string(),
            index,
            metric,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
