/// Station processor.
///
/// Drives one station through `Fetching -> Reconciling -> Classifying ->
/// Assembled`. Any error ends the station in `Failed` at the stage it was
/// in; the caller never sees a panic or an `Err`, only a `StationResult`.
///
/// Insufficient data is not a failure: it leaves the affected metric
/// `None` and the other metrics untouched.

use chrono::{Duration, NaiveDate};
use std::cell::{Cell, RefCell};
use tracing::{info, warn};

use crate::analysis::reconcile::{ReconcileError, ReconciledSeries, reconcile};
use crate::analysis::trend::{self, TREND_DEADBAND};
use crate::ingest::acquire::{AcquisitionError, AcquisitionPolicy, acquire_station_series_recorded};
use crate::ingest::wims::SeriesSource;
use crate::model::{
    AcquisitionUrls, CanonicalDailyRecord, IndexKind, IndexMetrics, ObservationRecord, RawRecord,
    StationResult, StationStage, StationStatus, TrendWindow,
};
use crate::percentiles::{Lookup, PercentileTables};
use crate::stations::Station;

#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl StationError {
    pub fn stage(&self) -> StationStage {
        match self {
            StationError::Acquisition(_) => StationStage::Fetching,
            StationError::Reconcile(_) => StationStage::Reconciling,
        }
    }
}

/// Read-only inputs shared by every station in a run.
#[derive(Debug, Clone, Copy)]
pub struct StationContext<'a> {
    pub tables: &'a PercentileTables,
    pub today: NaiveDate,
    pub deadband: f64,
}

impl<'a> StationContext<'a> {
    pub fn new(tables: &'a PercentileTables, today: NaiveDate) -> Self {
        StationContext {
            tables,
            today,
            deadband: TREND_DEADBAND,
        }
    }
}

/// Where a station has got to: the stage it last entered and the
/// acquisition URLs known so far. Readable after the station unwinds.
#[derive(Debug)]
pub struct StationProgress {
    stage: Cell<StationStage>,
    urls: RefCell<AcquisitionUrls>,
}

impl Default for StationProgress {
    fn default() -> Self {
        StationProgress {
            stage: Cell::new(StationStage::Fetching),
            urls: RefCell::new(AcquisitionUrls::default()),
        }
    }
}

impl StationProgress {
    pub fn new() -> Self {
        StationProgress::default()
    }

    pub fn stage(&self) -> StationStage {
        self.stage.get()
    }

    pub fn urls(&self) -> AcquisitionUrls {
        self.urls.try_borrow().map(|u| u.clone()).unwrap_or_default()
    }

    fn enter(&self, stage: StationStage) {
        self.stage.set(stage);
    }

    fn record_urls(&self, urls: &AcquisitionUrls) {
        if let Ok(mut current) = self.urls.try_borrow_mut() {
            current.clone_from(urls);
        }
    }
}

/// Fetches, reconciles and classifies one station.
pub fn process_station(
    source: &dyn SeriesSource,
    station: &Station,
    ctx: &StationContext<'_>,
    policy: &AcquisitionPolicy,
) -> StationResult {
    process_station_tracked(source, station, ctx, policy, &StationProgress::new())
}

/// Same as `process_station`, recording each stage and the acquisition URLs
/// in `progress` as they become known, so a caller can rebuild a failed
/// result for a station that unwound.
pub fn process_station_tracked(
    source: &dyn SeriesSource,
    station: &Station,
    ctx: &StationContext<'_>,
    policy: &AcquisitionPolicy,
    progress: &StationProgress,
) -> StationResult {
    info!(station = %station.station_id, name = %station.name, "processing station");
    progress.enter(StationStage::Fetching);

    let series = acquire_station_series_recorded(source, station, ctx.today, policy, |urls| {
        progress.record_urls(urls)
    });
    let urls = series.urls;

    let observed = match series.observed {
        Ok(observed) => observed.records,
        Err(e) => return fail(station, urls, StationError::from(e)),
    };
    // A missing forecast or observation series only blanks what depends on it.
    let forecast = series.forecast.unwrap_or_default();
    let observations = series.observations.unwrap_or_default();

    let assembled = assemble_tracked(
        station,
        urls.clone(),
        &observed,
        &forecast,
        &observations,
        ctx,
        progress,
    );
    match assembled {
        Ok(result) => result,
        Err(e) => fail(station, urls, e),
    }
}

/// Reconciling and classifying stages, from already-fetched series.
pub fn assemble_station(
    station: &Station,
    urls: AcquisitionUrls,
    observed: &[RawRecord],
    forecast: &[RawRecord],
    observations: &[ObservationRecord],
    ctx: &StationContext<'_>,
) -> Result<StationResult, StationError> {
    let progress = StationProgress::new();
    assemble_tracked(station, urls, observed, forecast, observations, ctx, &progress)
}

fn assemble_tracked(
    station: &Station,
    urls: AcquisitionUrls,
    observed: &[RawRecord],
    forecast: &[RawRecord],
    observations: &[ObservationRecord],
    ctx: &StationContext<'_>,
    progress: &StationProgress,
) -> Result<StationResult, StationError> {
    progress.enter(StationStage::Reconciling);
    let reconciled = reconcile(observed, forecast, observations, ctx.today)?;

    progress.enter(StationStage::Classifying);

    let erc = index_metrics(station, IndexKind::Erc, &reconciled, ctx);
    let bi = index_metrics(station, IndexKind::Bi, &reconciled, ctx);

    let latest = reconciled.observed.last();
    let latest_attributes = latest
        .filter(|r| r.date() == ctx.today)
        .map(|r| r.attributes.clone())
        .unwrap_or_default();

    progress.enter(StationStage::Assembled);
    Ok(StationResult {
        station_id: station.station_id.clone(),
        station_name: station.name.clone(),
        zones: station.zones.clone(),
        status: StationStatus::Assembled,
        urls,
        erc,
        bi,
        latest_record_time: latest.map(|r| r.timestamp),
        latest_attributes,
    })
}

fn fail(station: &Station, urls: AcquisitionUrls, error: StationError) -> StationResult {
    let stage = error.stage();
    warn!(station = %station.station_id, stage = %stage, error = %error, "station failed");
    StationResult::failed(
        &station.station_id,
        &station.name,
        &station.zones,
        urls,
        stage,
        error.to_string(),
    )
}

fn index_metrics(
    station: &Station,
    kind: IndexKind,
    reconciled: &ReconciledSeries,
    ctx: &StationContext<'_>,
) -> IndexMetrics {
    let id = station.station_id.as_str();
    let mut metrics = IndexMetrics::default();

    // Current percentile and trend need today's record as the latest one.
    match reconciled.observed.last() {
        Some(latest) if latest.date() == ctx.today => {
            metrics.current_value = latest.index_value(kind);
            metrics.current_percentile = percentile(id, kind, metrics.current_value, ctx);
            metrics.current_window = window(&reconciled.observed, kind);
            metrics.current_trend = metrics.current_window.map(|w| {
                let t = trend::classify_window(&w, ctx.deadband);
                info!(station = %id, index = %kind, trend = %t.label, change = %trend::describe(&t), "current trend");
                t
            });
            if metrics.current_window.is_none() {
                info!(station = %id, index = %kind, "not enough observed data for a trend");
            }
        }
        _ => warn!(station = %id, index = %kind, "no new data available for today"),
    }

    let tomorrow = ctx.today + Duration::days(1);
    if let Some(first) = reconciled.forecast.first().filter(|r| r.date() == tomorrow) {
        metrics.forecast_value = first.index_value(kind);
        metrics.forecast_percentile = percentile(id, kind, metrics.forecast_value, ctx);
    }
    metrics.forecast_window = window(&reconciled.forecast, kind);
    metrics.forecast_trend = metrics.forecast_window.map(|w| {
        let t = trend::classify_window(&w, ctx.deadband);
        info!(station = %id, index = %kind, trend = %t.label, change = %trend::describe(&t), "forecast trend");
        t
    });
    if metrics.forecast_window.is_none() {
        info!(station = %id, index = %kind, "not enough forecast data for a trend");
    }

    metrics
}

/// First and second canonical records of a window, if both carry a value.
fn window(records: &[CanonicalDailyRecord], kind: IndexKind) -> Option<TrendWindow> {
    match records {
        [first, second, ..] => Some(TrendWindow {
            initial: first.index_value(kind)?,
            final_value: second.index_value(kind)?,
        }),
        _ => None,
    }
}

fn percentile(
    station_id: &str,
    kind: IndexKind,
    value: Option<f64>,
    ctx: &StationContext<'_>,
) -> Option<u8> {
    let value = value?;
    let Some(table) = ctx.tables.get(station_id, kind) else {
        warn!(station = %station_id, index = %kind, "no percentile table for station");
        return None;
    };
    match table.classify(value) {
        Lookup::Percentile(p) => Some(p),
        Lookup::Gap => {
            warn!(station = %station_id, index = %kind, value, "unable to determine percentile");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
