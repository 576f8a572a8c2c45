/// Acquisition adapter: bounded retries and reporting-hour fallback.
///
/// Every request goes through one bounded retry loop. The observed-index
/// request additionally walks the reporting-hour policy table (13, 12, 14 by
/// default), accepting the first hour that returns any records. An empty
/// response is a reason to try the next hour, never a retry.
///
/// No sorting or deduplication happens here; that belongs to the reconciler.

use chrono::{Duration as DateDuration, NaiveDate};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ingest::wims::{
    FetchError, RecordType, SeriesRequest, SeriesSource, to_observation, to_raw_record,
};
use crate::model::{AcquisitionUrls, FlatRecord, ObservationRecord, RawRecord};
use crate::stations::Station;

/// Default hour-fallback order for the observed-index request.
pub const DEFAULT_REPORTING_HOURS: [u32; 3] = [13, 12, 14];
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Days of observed history requested before the run date.
const OBSERVED_LOOKBACK_DAYS: i64 = 2;
/// Days of forecast requested after the run date.
const FORECAST_LOOKAHEAD_DAYS: i64 = 3;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPolicy {
    pub retry: RetryPolicy,
    /// Reporting hours tried for the observed-index request, in order.
    pub reporting_hours: Vec<u32>,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        AcquisitionPolicy {
            retry: RetryPolicy::default(),
            reporting_hours: DEFAULT_REPORTING_HOURS.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    ObservedIndex,
    ForecastIndex,
    Observation,
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SeriesKind::ObservedIndex => "observed index",
            SeriesKind::ForecastIndex => "forecast index",
            SeriesKind::Observation => "observation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("{series} fetch failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        series: SeriesKind,
        attempts: u32,
        #[source]
        last: FetchError,
    },
    #[error("no reporting hours configured")]
    NoReportingHours,
}

/// Result of one request at one reporting hour, after retries.
#[derive(Debug)]
pub enum FetchOutcome<T> {
    Success(Vec<T>),
    /// Zero records at this hour; the caller moves to the next hour.
    EmptyTryNext(u32),
    ExhaustedRetries(AcquisitionError),
}

/// Observed-index records and the reporting hour they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedSeries {
    /// `None` when every hour came back empty.
    pub hour: Option<u32>,
    pub records: Vec<RawRecord>,
}

/// Everything fetched for one station. Each series fails independently.
#[derive(Debug)]
pub struct StationSeries {
    pub urls: AcquisitionUrls,
    pub observed: Result<ObservedSeries, AcquisitionError>,
    pub forecast: Result<Vec<RawRecord>, AcquisitionError>,
    pub observations: Result<Vec<ObservationRecord>, AcquisitionError>,
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

/// Fetches and converts one request, retrying any failure up to
/// `policy.max_attempts` times in total.
pub fn fetch_with_retry<T, F>(
    source: &dyn SeriesSource,
    request: &SeriesRequest,
    series: SeriesKind,
    policy: &RetryPolicy,
    convert: F,
) -> Result<Vec<T>, AcquisitionError>
where
    F: Fn(FlatRecord) -> Result<T, FetchError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = source
            .fetch(request)
            .and_then(|records| records.into_iter().map(&convert).collect::<Result<Vec<T>, _>>());

        match result {
            Ok(records) => return Ok(records),
            Err(e) if attempt < attempts => {
                info!(
                    station = %request.station_id,
                    series = %series,
                    attempt,
                    error = %e,
                    "download failed, retrying"
                );
                if !policy.delay.is_zero() {
                    std::thread::sleep(policy.delay);
                }
                attempt += 1;
            }
            Err(e) => {
                return Err(AcquisitionError::ExhaustedRetries {
                    series,
                    attempts,
                    last: e,
                });
            }
        }
    }
}

fn fetch_at_hour(
    source: &dyn SeriesSource,
    request: &SeriesRequest,
    policy: &RetryPolicy,
) -> FetchOutcome<RawRecord> {
    match fetch_with_retry(source, request, SeriesKind::ObservedIndex, policy, to_raw_record) {
        Ok(records) if records.is_empty() => {
            FetchOutcome::EmptyTryNext(request.hour.unwrap_or_default())
        }
        Ok(records) => FetchOutcome::Success(records),
        Err(e) => FetchOutcome::ExhaustedRetries(e),
    }
}

/// Walks the reporting-hour table until one hour returns records.
///
/// Returns the records with the accepted hour and the URL of the request
/// that produced them. When every hour is empty the result is an empty
/// series and the URL of the first hour tried.
pub fn fetch_observed_with_fallback(
    source: &dyn SeriesSource,
    base: &SeriesRequest,
    policy: &AcquisitionPolicy,
) -> (Option<String>, Result<ObservedSeries, AcquisitionError>) {
    let mut first_url = None;

    for &hour in &policy.reporting_hours {
        let request = base.with_hour(hour);
        let url = source.describe(&request);
        if first_url.is_none() {
            first_url = Some(url.clone());
        }

        match fetch_at_hour(source, &request, &policy.retry) {
            FetchOutcome::Success(records) => {
                debug!(station = %base.station_id, hour, records = records.len(), "observed index accepted");
                return (
                    Some(url),
                    Ok(ObservedSeries {
                        hour: Some(hour),
                        records,
                    }),
                );
            }
            FetchOutcome::EmptyTryNext(hour) => {
                info!(station = %base.station_id, hour, "no observed index at this hour, trying next");
            }
            FetchOutcome::ExhaustedRetries(e) => return (Some(url), Err(e)),
        }
    }

    if first_url.is_none() {
        return (None, Err(AcquisitionError::NoReportingHours));
    }
    warn!(station = %base.station_id, "no observed index at any reporting hour");
    (first_url, Ok(ObservedSeries::default()))
}

/// Fetches the observed, forecast, and observation series for one station.
pub fn acquire_station_series(
    source: &dyn SeriesSource,
    station: &Station,
    today: NaiveDate,
    policy: &AcquisitionPolicy,
) -> StationSeries {
    acquire_station_series_recorded(source, station, today, policy, |_| {})
}

/// Same as `acquire_station_series`, handing the URLs known so far to
/// `record` before each fetch and once the reporting hour is settled.
pub fn acquire_station_series_recorded<F>(
    source: &dyn SeriesSource,
    station: &Station,
    today: NaiveDate,
    policy: &AcquisitionPolicy,
    mut record: F,
) -> StationSeries
where
    F: FnMut(&AcquisitionUrls),
{
    let observed_request = SeriesRequest {
        station_id: station.station_id.clone(),
        fuel_model: station.fuel_model.clone(),
        start: today - DateDuration::days(OBSERVED_LOOKBACK_DAYS),
        end: today,
        hour: None,
        record_type: RecordType::HistoricalIndex,
    };
    let forecast_request = SeriesRequest {
        start: today,
        end: today + DateDuration::days(FORECAST_LOOKAHEAD_DAYS),
        record_type: RecordType::ForecastIndex,
        ..observed_request.clone()
    };
    let observation_request = SeriesRequest {
        start: today,
        end: today,
        record_type: RecordType::Observation,
        ..observed_request.clone()
    };

    // Until the fallback settles, the first hour's URL stands in for nfdrs.
    let mut urls = AcquisitionUrls {
        nfdrs: policy
            .reporting_hours
            .first()
            .map(|&hour| source.describe(&observed_request.with_hour(hour))),
        forecast: Some(source.describe(&forecast_request)),
        observation: Some(source.describe(&observation_request)),
    };
    record(&urls);

    let (nfdrs_url, observed) = fetch_observed_with_fallback(source, &observed_request, policy);
    urls.nfdrs = nfdrs_url;
    record(&urls);

    let forecast = fetch_with_retry(
        source,
        &forecast_request,
        SeriesKind::ForecastIndex,
        &policy.retry,
        to_raw_record,
    );
    let observations = fetch_with_retry(
        source,
        &observation_request,
        SeriesKind::Observation,
        &policy.retry,
        to_observation,
    );

    for failure in [
        observed.as_ref().err(),
        forecast.as_ref().err(),
        observations.as_ref().err(),
    ]
    .into_iter()
    .flatten()
    {
        warn!(station = %station.station_id, error = %failure, "series unavailable");
    }

    StationSeries {
        urls,
        observed,
        forecast,
        observations,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;
    use crate::ingest::scripted::ScriptedSource;

    fn station() -> Station {
        Station {
            station_id: "045101".to_string(),
            name: "Alpha RAWS".to_string(),
            fuel_model: "Y".to_string(),
            zones: vec!["NC01".to_string()],
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 22).unwrap()
    }

    fn no_delay() -> AcquisitionPolicy {
        AcquisitionPolicy {
            retry: RetryPolicy {
                max_attempts: 5,
                delay: Duration::ZERO,
            },
            ..AcquisitionPolicy::default()
        }
    }

    fn observed_request() -> SeriesRequest {
        SeriesRequest {
            station_id: "045101".to_string(),
            fuel_model: "Y".to_string(),
            start: NaiveDate::from_ymd_opt(2024, 7, 20).unwrap(),
            end: today(),
            hour: None,
            record_type: RecordType::HistoricalIndex,
        }
    }

    #[test]
    fn test_hour_13_accepted_first() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(13), fixture_nfdrs_observed_xml());
        let (url, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        let series = result.expect("hour 13 has data");
        assert_eq!(series.hour, Some(13));
        assert_eq!(series.records.len(), 4);
        assert!(url.unwrap().contains("time=13"));
        assert_eq!(source.hours_requested(RecordType::HistoricalIndex), vec![Some(13)]);
    }

    #[test]
    fn test_empty_13_falls_back_to_12_without_asking_14() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(13), fixture_empty_xml())
            .respond(RecordType::HistoricalIndex, Some(12), fixture_nfdrs_noon_xml())
            .respond(RecordType::HistoricalIndex, Some(14), fixture_nfdrs_observed_xml());
        let (url, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        let series = result.expect("hour 12 has data");
        assert_eq!(series.hour, Some(12));
        assert_eq!(series.records[0].hour, 12);
        assert!(url.unwrap().contains("time=12"), "URL should be the accepted hour's");
        assert_eq!(
            source.hours_requested(RecordType::HistoricalIndex),
            vec![Some(13), Some(12)],
            "hour 14 must not be consulted once 12 returned data"
        );
    }

    #[test]
    fn test_all_hours_empty_is_empty_series_not_error() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(13), fixture_empty_xml())
            .respond(RecordType::HistoricalIndex, Some(12), fixture_empty_xml())
            .respond(RecordType::HistoricalIndex, Some(14), fixture_empty_xml());
        let (url, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        let series = result.expect("empty is not a failure");
        assert_eq!(series.hour, None);
        assert!(series.records.is_empty());
        assert!(url.unwrap().contains("time=13"), "falls back to the first hour's URL");
    }

    #[test]
    fn test_transient_failures_are_retried_on_the_same_hour() {
        let source = ScriptedSource::new()
            .fail_times(RecordType::HistoricalIndex, Some(13), 3)
            .respond(RecordType::HistoricalIndex, Some(13), fixture_nfdrs_observed_xml());
        let (_, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        assert_eq!(result.expect("fourth attempt succeeds").hour, Some(13));
        assert_eq!(
            source.hours_requested(RecordType::HistoricalIndex),
            vec![Some(13); 4],
            "a failure retries the same hour rather than falling back"
        );
    }

    #[test]
    fn test_retries_stop_after_max_attempts() {
        let source = ScriptedSource::new().fail_times(RecordType::HistoricalIndex, Some(13), 99);
        let (url, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        match result {
            Err(AcquisitionError::ExhaustedRetries { attempts, series, .. }) => {
                assert_eq!(attempts, 5);
                assert_eq!(series, SeriesKind::ObservedIndex);
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        assert_eq!(source.hours_requested(RecordType::HistoricalIndex).len(), 5);
        assert!(url.is_some(), "URL is kept even when the fetch fails");
    }

    #[test]
    fn test_unparseable_record_counts_as_failed_attempt() {
        let bad = "<nfdrs><row><nfdr_dt>tomorrow</nfdr_dt><nfdr_tm>13</nfdr_tm><mp>1</mp></row></nfdrs>";
        let source = ScriptedSource::new().respond(RecordType::HistoricalIndex, Some(13), bad);
        let (_, result) = fetch_observed_with_fallback(&source, &observed_request(), &no_delay());

        assert!(matches!(
            result,
            Err(AcquisitionError::ExhaustedRetries { last: FetchError::Field { .. }, .. })
        ));
    }

    #[test]
    fn test_acquire_station_series_fetches_all_three_series() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(13), fixture_nfdrs_observed_xml())
            .respond(RecordType::ForecastIndex, None, fixture_nfdrs_forecast_xml())
            .respond(RecordType::Observation, None, fixture_observations_xml());
        let series = acquire_station_series(&source, &station(), today(), &no_delay());

        assert_eq!(series.observed.unwrap().records.len(), 4);
        assert_eq!(series.forecast.unwrap().len(), 4);
        assert_eq!(series.observations.unwrap().len(), 2);

        let urls = series.urls;
        assert!(urls.nfdrs.unwrap().contains("start=20-Jul-24&end=22-Jul-24"));
        assert!(urls.forecast.unwrap().contains("start=22-Jul-24&end=25-Jul-24"));
        assert!(urls.observation.unwrap().contains("start=22-Jul-24&end=22-Jul-24"));
    }

    #[test]
    fn test_forecast_failure_leaves_observed_series_intact() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(13), fixture_nfdrs_observed_xml())
            .fail_times(RecordType::ForecastIndex, None, 99)
            .respond(RecordType::Observation, None, fixture_observations_xml());
        let series = acquire_station_series(&source, &station(), today(), &no_delay());

        assert!(series.observed.is_ok());
        assert!(series.forecast.is_err());
        assert!(series.observations.is_ok());
        assert!(series.urls.forecast.is_some());
    }

    #[test]
    fn test_recorded_urls_settle_on_the_accepted_hour() {
        let source = ScriptedSource::new()
            .respond(RecordType::HistoricalIndex, Some(12), fixture_nfdrs_noon_xml())
            .respond(RecordType::ForecastIndex, None, fixture_nfdrs_forecast_xml());
        let mut seen = Vec::new();
        let series = acquire_station_series_recorded(&source, &station(), today(), &no_delay(), |urls| {
            seen.push(urls.clone())
        });

        assert_eq!(seen.len(), 2, "recorded before fetching and after the fallback");
        assert!(
            seen[0].nfdrs.as_deref().unwrap_or_default().contains("time=13"),
            "first hour's URL is known before any fetch"
        );
        assert!(seen[0].forecast.is_some() && seen[0].observation.is_some());
        assert!(seen[1].nfdrs.as_deref().unwrap_or_default().contains("time=12"));
        assert_eq!(seen[1], series.urls);
    }
}
