/// Series reconciler: one canonical record per station-day.
///
/// Steps, applied separately to the observed and forecast series:
///   1. timestamp = report date + report hour
///   2. keep only the two trend-window dates
///   3. sort by (timestamp, model priority)
///   4. first record per date wins
///   5. merge the observation sharing the exact timestamp, if exactly one does
///
/// Pure functions of their inputs; the run date is passed in.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::ingest::wims::record_timestamp;
use crate::model::{CanonicalDailyRecord, ObservationRecord, RawRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("record dated {date} has invalid reporting hour {hour}")]
    InvalidTimestamp { date: NaiveDate, hour: u32 },
}

/// Canonical series for both trend windows of one station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledSeries {
    /// Up to two records: two days ago, then today.
    pub observed: Vec<CanonicalDailyRecord>,
    /// Up to two records: tomorrow, then three days out.
    pub forecast: Vec<CanonicalDailyRecord>,
}

/// The two dates bounding the observed trend window.
pub fn observed_window(today: NaiveDate) -> [NaiveDate; 2] {
    [today - Duration::days(2), today]
}

/// The two dates bounding the forecast trend window.
pub fn forecast_window(today: NaiveDate) -> [NaiveDate; 2] {
    [today + Duration::days(1), today + Duration::days(3)]
}

pub fn reconcile(
    observed: &[RawRecord],
    forecast: &[RawRecord],
    observations: &[ObservationRecord],
    today: NaiveDate,
) -> Result<ReconciledSeries, ReconcileError> {
    Ok(ReconciledSeries {
        observed: reconcile_observed(observed, observations, today)?,
        forecast: reconcile_forecast(forecast, today)?,
    })
}

pub fn reconcile_observed(
    records: &[RawRecord],
    observations: &[ObservationRecord],
    today: NaiveDate,
) -> Result<Vec<CanonicalDailyRecord>, ReconcileError> {
    let mut canonical = canonicalize(records, observed_window(today))?;

    let mut stamped = Vec::with_capacity(observations.len());
    for obs in observations {
        let timestamp = record_timestamp(obs.date, obs.hour).ok_or(
            ReconcileError::InvalidTimestamp {
                date: obs.date,
                hour: obs.hour,
            },
        )?;
        stamped.push((timestamp, obs));
    }

    for record in &mut canonical {
        merge_observation(record, &stamped);
    }
    Ok(canonical)
}

pub fn reconcile_forecast(
    records: &[RawRecord],
    today: NaiveDate,
) -> Result<Vec<CanonicalDailyRecord>, ReconcileError> {
    canonicalize(records, forecast_window(today))
}

fn canonicalize(
    records: &[RawRecord],
    window: [NaiveDate; 2],
) -> Result<Vec<CanonicalDailyRecord>, ReconcileError> {
    let mut stamped: Vec<(NaiveDateTime, &RawRecord)> = Vec::new();
    for record in records {
        let timestamp = record_timestamp(record.date, record.hour).ok_or(
            ReconcileError::InvalidTimestamp {
                date: record.date,
                hour: record.hour,
            },
        )?;
        if window.contains(&record.date) {
            stamped.push((timestamp, record));
        }
    }

    // Stable: equal (timestamp, priority) keeps source order.
    stamped.sort_by_key(|(timestamp, record)| (*timestamp, record.model_priority));

    let mut canonical: Vec<CanonicalDailyRecord> = Vec::new();
    for (timestamp, record) in stamped {
        if canonical.iter().any(|c| c.date() == record.date) {
            continue;
        }
        canonical.push(CanonicalDailyRecord {
            timestamp,
            model_priority: record.model_priority,
            erc: record.erc,
            bi: record.bi,
            attributes: record.fields.clone(),
            observation_merged: false,
        });
    }

    Ok(canonical)
}

/// Left join on exact timestamp. Ambiguous matches (two or more) are skipped.
fn merge_observation(
    record: &mut CanonicalDailyRecord,
    observations: &[(NaiveDateTime, &ObservationRecord)],
) {
    let mut matching = observations
        .iter()
        .filter(|(timestamp, _)| *timestamp == record.timestamp);

    let (Some((_, obs)), None) = (matching.next(), matching.next()) else {
        return;
    };

    for (key, value) in &obs.fields {
        record
            .attributes
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    record.observation_merged = true;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
