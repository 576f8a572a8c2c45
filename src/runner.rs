/// Batch runner for the fire danger service.
///
/// One run:
/// 1. Loads the station roster and percentile tables (read-only for the run)
/// 2. Processes every station to a terminal state, optionally on a worker pool
/// 3. Aggregates zones once all stations are final
/// 4. Hands the snapshot to each configured sink
///
/// Station failures never stop the run; only a sink can fail it.

use chrono::NaiveDateTime;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;
use tracing::{error, info, warn};

use crate::analysis::station::{StationContext, StationProgress, process_station_tracked};
use crate::analysis::trend::TREND_DEADBAND;
use crate::analysis::zones::aggregate_zones;
use crate::ingest::acquire::AcquisitionPolicy;
use crate::ingest::wims::SeriesSource;
use crate::model::{AcquisitionUrls, StationResult, StationStage, ZoneResult};
use crate::percentiles::{PercentileTables, TableError, load_tables};
use crate::sink::{ResultSink, RunSnapshot, SinkError};
use crate::stations::{RosterError, Station, StationRoster, load_roster};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Station worker threads (default: 1, sequential in roster order)
    pub workers: usize,

    /// Trend deadband in raw index units (default: 3.0)
    pub deadband: f64,

    /// Roster zone code for stations outside every zone (default: "Non-PSA")
    pub excluded_zone: String,

    pub policy: AcquisitionPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            deadband: TREND_DEADBAND,
            excluded_zone: "Non-PSA".to_string(),
            policy: AcquisitionPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("station roster is empty")]
    EmptyRoster,
    #[error("runner used before initialize()")]
    NotInitialized,
}

// ---------------------------------------------------------------------------
// Runner state
// ---------------------------------------------------------------------------

pub struct Runner {
    config: RunnerConfig,
    source: Arc<dyn SeriesSource>,
    roster: Option<Arc<StationRoster>>,
    tables: Arc<PercentileTables>,
}

impl Runner {
    /// Create a runner with default configuration
    pub fn new(source: Arc<dyn SeriesSource>) -> Self {
        Self::with_config(RunnerConfig::default(), source)
    }

    pub fn with_config(config: RunnerConfig, source: Arc<dyn SeriesSource>) -> Self {
        Self {
            config,
            source,
            roster: None,
            tables: Arc::new(PercentileTables::default()),
        }
    }

    /// Load the roster and percentile tables from disk.
    pub fn initialize<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        roster_path: P,
        percentile_path: Q,
    ) -> Result<(), RunError> {
        let roster = load_roster(roster_path)?;
        let load = load_tables(percentile_path)?;
        if !load.rejected.is_empty() {
            warn!(rejected = load.rejected.len(), "some percentile tables were rejected");
        }
        self.initialize_with(roster, load.tables)
    }

    /// Use an already-loaded roster and table set.
    pub fn initialize_with(
        &mut self,
        roster: StationRoster,
        tables: PercentileTables,
    ) -> Result<(), RunError> {
        if roster.is_empty() {
            return Err(RunError::EmptyRoster);
        }
        info!(stations = roster.len(), tables = tables.len(), "runner initialized");
        self.roster = Some(Arc::new(roster));
        self.tables = Arc::new(tables);
        Ok(())
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn roster(&self) -> Option<&StationRoster> {
        self.roster.as_deref()
    }

    /// Process every station to a terminal state. Results come back in
    /// roster order regardless of worker count.
    pub fn process_all_stations(&self, run_date: NaiveDateTime) -> Result<Vec<StationResult>, RunError> {
        let roster = self.roster.clone().ok_or(RunError::NotInitialized)?;
        let today = run_date.date();

        info!(
            stations = roster.len(),
            workers = self.config.workers,
            date = %today,
            "processing stations"
        );

        if self.config.workers <= 1 {
            let results = roster
                .stations()
                .iter()
                .map(|station| {
                    run_one(
                        self.source.as_ref(),
                        station,
                        &self.tables,
                        today,
                        self.config.deadband,
                        &self.config.policy,
                    )
                })
                .collect();
            return Ok(results);
        }

        let pool = ThreadPool::new(self.config.workers);
        let (tx, rx) = mpsc::channel();

        for (index, station) in roster.stations().iter().enumerate() {
            let tx = tx.clone();
            let station = station.clone();
            let source = Arc::clone(&self.source);
            let tables = Arc::clone(&self.tables);
            let deadband = self.config.deadband;
            let policy = self.config.policy.clone();

            pool.execute(move || {
                let result = run_one(source.as_ref(), &station, &tables, today, deadband, &policy);
                // Receiver outlives the pool; a send error means the run was abandoned.
                let _ = tx.send((index, result));
            });
        }
        drop(tx);
        pool.join();

        let mut slots: Vec<Option<StationResult>> = vec![None; roster.len()];
        for (index, result) in rx {
            slots[index] = Some(result);
        }

        let results = slots
            .into_iter()
            .zip(roster.stations())
            .map(|(slot, station)| {
                slot.unwrap_or_else(|| {
                    error!(station = %station.station_id, "station worker produced no result");
                    StationResult::failed(
                        &station.station_id,
                        &station.name,
                        &station.zones,
                        AcquisitionUrls::default(),
                        StationStage::Fetching,
                        "station worker produced no result".to_string(),
                    )
                })
            })
            .collect();
        Ok(results)
    }

    /// Aggregate zones from final station results.
    pub fn aggregate_zones(&self, results: &[StationResult], run_date: NaiveDateTime) -> Result<Vec<ZoneResult>, RunError> {
        let roster = self.roster.as_ref().ok_or(RunError::NotInitialized)?;
        let members = roster.zone_members(&self.config.excluded_zone);
        Ok(aggregate_zones(results, &members, run_date.date(), self.config.deadband))
    }

    /// Stations, then zones.
    pub fn run(&self, run_date: NaiveDateTime) -> Result<RunSnapshot, RunError> {
        let stations = self.process_all_stations(run_date)?;
        let zones = self.aggregate_zones(&stations, run_date)?;

        let snapshot = RunSnapshot {
            run_date,
            stations,
            zones,
        };
        info!(
            stations = snapshot.stations.len(),
            assembled = snapshot.assembled_count(),
            zones = snapshot.zones.len(),
            "run complete"
        );
        Ok(snapshot)
    }
}

/// Hands the snapshot to each sink in order. Every sink is attempted; the
/// first error is returned.
pub fn publish(snapshot: &RunSnapshot, sinks: &[Box<dyn ResultSink>]) -> Result<(), SinkError> {
    let mut first_error = None;
    for sink in sinks {
        match sink.publish(snapshot) {
            Ok(()) => info!(sink = sink.name(), "published"),
            Err(e) => {
                error!(sink = sink.name(), error = %e, "publish failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Processes one station, turning a panic into a failed result at the stage
/// the station had reached, with the URLs it had already built.
fn run_one(
    source: &dyn SeriesSource,
    station: &Station,
    tables: &PercentileTables,
    today: chrono::NaiveDate,
    deadband: f64,
    policy: &AcquisitionPolicy,
) -> StationResult {
    let ctx = StationContext {
        tables,
        today,
        deadband,
    };
    let progress = StationProgress::new();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        process_station_tracked(source, station, &ctx, policy, &progress)
    }));

    outcome.unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unexpected failure".to_string());
        let stage = progress.stage();
        error!(station = %station.station_id, stage = %stage, reason = %reason, "station panicked");
        StationResult::failed(
            &station.station_id,
            &station.name,
            &station.zones,
            progress.urls(),
            stage,
            reason,
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::scripted::ScriptedSource;
    use crate::stations::load_roster_from_str;

    const ROSTER: &str = "StationID,StationName,PSA,FuelModelCode\n\
                          45101,Alpha RAWS,NC01,Y\n\
                          45102,Bravo RAWS,NC01,Y\n";

    #[test]
    fn test_runner_creation() {
        let runner = Runner::new(Arc::new(ScriptedSource::new()));
        assert_eq!(runner.config().workers, 1);
        assert_eq!(runner.config().deadband, 3.0);
        assert!(runner.roster().is_none());
    }

    #[test]
    fn test_custom_runner_config() {
        let config = RunnerConfig {
            workers: 4,
            excluded_zone: "NONE".to_string(),
            ..RunnerConfig::default()
        };
        let runner = Runner::with_config(config, Arc::new(ScriptedSource::new()));
        assert_eq!(runner.config().workers, 4);
        assert_eq!(runner.config().excluded_zone, "NONE");
    }

    #[test]
    fn test_runner_requires_initialization() {
        let runner = Runner::new(Arc::new(ScriptedSource::new()));
        let run_date = chrono::NaiveDate::from_ymd_opt(2024, 7, 22)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        assert!(matches!(runner.run(run_date), Err(RunError::NotInitialized)));
    }

    #[test]
    fn test_empty_roster_is_rejected() {
        let mut runner = Runner::new(Arc::new(ScriptedSource::new()));
        let result = runner.initialize_with(StationRoster::default(), PercentileTables::default());
        assert!(matches!(result, Err(RunError::EmptyRoster)));
    }

    #[test]
    fn test_initialize_with_roster() {
        let mut runner = Runner::new(Arc::new(ScriptedSource::new()));
        let roster = load_roster_from_str(ROSTER).unwrap();
        runner
            .initialize_with(roster, PercentileTables::default())
            .expect("initialize should succeed");
        assert_eq!(runner.roster().map(|r| r.len()), Some(2));
    }

    // See tests/pipeline.rs for full-run integration tests
}
