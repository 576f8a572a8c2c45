//! Fire Danger Service - daily percentile and trend run
//!
//! One invocation:
//! 1. Loads firedanger.toml, the station roster and the percentile tables
//! 2. Pulls observed, forecast and observation series from WIMS per station
//! 3. Classifies ERC/BI percentiles and trends per station, then per zone
//! 4. Writes CSV/JSON outputs and, when configured, updates the feature service
//!
//! Usage:
//!   firedanger                                # today, firedanger.toml
//!   firedanger --date 2024-07-22 --dry-run    # re-run a date, CSV only
//!   firedanger --config /etc/firedanger.toml --workers 8
//!
//! Environment:
//!   FIREDANGER_USERNAME / FIREDANGER_PASSWORD - feature service login (.env supported)
//!   RUST_LOG - log filter (default: info)

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::Parser;
use firedanger_service::config::{self, DEFAULT_CONFIG_PATH};
use firedanger_service::ingest::wims::WimsClient;
use firedanger_service::logging;
use firedanger_service::runner::{self, Runner, RunnerConfig};
use firedanger_service::sink::ResultSink;
use firedanger_service::sink::csv::CsvSink;
use firedanger_service::sink::feature_service::FeatureServiceSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "firedanger", about = "NFDRS percentile and trend analysis")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run date (YYYY-MM-DD), overrides run.run_date
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Station worker threads, overrides run.workers
    #[arg(long)]
    workers: Option<usize>,

    /// Skip the feature service; still write CSV/JSON outputs
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = config::load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(workers) = args.workers {
        cfg.run.workers = workers;
    }
    cfg.validate()?;

    let run_date = cfg.resolve_run_date(args.date)?;
    let log_path = logging::init(&cfg.run.log_dir, run_date.date())
        .with_context(|| format!("opening log in {}", cfg.run.log_dir.display()))?;

    info!(run_date = %run_date, log = %log_path.display(), "fire danger run starting");

    // Credentials are checked before any station is fetched.
    let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(CsvSink::new(&cfg.run.output_dir))];
    match (&cfg.feature_service, args.dry_run) {
        (Some(fs), false) => {
            let credentials = config::load_credentials()?;
            sinks.push(Box::new(FeatureServiceSink::new(
                fs.clone(),
                credentials,
                cfg.wims.timeout(),
            )?));
        }
        (Some(_), true) => warn!("dry run: feature service update skipped"),
        (None, _) => info!("no feature service configured; writing CSV outputs only"),
    }

    let source = WimsClient::new(cfg.wims.endpoints(), cfg.wims.timeout())?;
    let mut runner = Runner::with_config(
        RunnerConfig {
            workers: cfg.run.workers,
            deadband: cfg.trend.deadband,
            excluded_zone: cfg.run.excluded_zone.clone(),
            policy: cfg.wims.acquisition_policy(),
        },
        Arc::new(source),
    );
    runner
        .initialize(&cfg.run.roster_path, &cfg.run.percentile_path)
        .context("loading reference tables")?;

    let snapshot = runner.run(run_date)?;

    if let Err(e) = runner::publish(&snapshot, &sinks) {
        bail!("publishing results failed: {}", e);
    }

    info!(
        assembled = snapshot.assembled_count(),
        stations = snapshot.stations.len(),
        zones = snapshot.zones.len(),
        "fire danger run finished"
    );
    Ok(())
}
