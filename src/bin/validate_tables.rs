//! Reference table checker
//!
//! Loads the station roster and percentile tables named in the config and
//! reports problems before a run hits them:
//!   - percentile tables rejected at load (overlaps, inverted ranges, bad percentiles)
//!   - tables with gaps (values inside a gap classify as unknown)
//!   - roster stations missing an ERC or BI table
//!   - zones where no member station has a table
//!
//! Exits non-zero if any table failed to load.
//!
//! Usage:
//!   cargo run --bin validate_tables -- --config firedanger.toml

use anyhow::{Context, Result};
use clap::Parser;
use firedanger_service::config::{self, DEFAULT_CONFIG_PATH};
use firedanger_service::logging;
use firedanger_service::model::IndexKind;
use firedanger_service::percentiles::load_tables;
use firedanger_service::stations::load_roster;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "validate_tables", about = "Check the roster and percentile tables")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() -> Result<()> {
    logging::init_console();
    let args = Args::parse();
    let cfg = config::load_config(&args.config)?;

    let roster = load_roster(&cfg.run.roster_path)
        .with_context(|| format!("loading {}", cfg.run.roster_path.display()))?;
    let load = load_tables(&cfg.run.percentile_path)
        .with_context(|| format!("loading {}", cfg.run.percentile_path.display()))?;

    info!(stations = roster.len(), tables = load.tables.len(), "reference tables loaded");

    for rejected in &load.rejected {
        error!(problem = %rejected, "rejected percentile table");
    }

    let mut gapped = 0;
    for ((station, kind), table) in load.tables.iter() {
        if table.gap_count() > 0 {
            gapped += 1;
            warn!(station = %station, index = %kind, gaps = table.gap_count(), "table has gaps");
        }
    }

    let mut missing = 0;
    for station in roster.stations() {
        for kind in IndexKind::ALL {
            if load.tables.get(&station.station_id, kind).is_none() {
                missing += 1;
                warn!(station = %station.station_id, name = %station.name, index = %kind, "no percentile table");
            }
        }
    }

    // A zone whose members all lack tables will always report missing averages.
    let members = roster.zone_members(&cfg.run.excluded_zone);
    let mut unclassifiable_zones = 0;
    for (zone, ids) in &members {
        let classifiable = ids.iter().any(|id| {
            IndexKind::ALL
                .iter()
                .any(|kind| load.tables.get(id, *kind).is_some())
        });
        if !classifiable {
            unclassifiable_zones += 1;
            warn!(zone = %zone, members = ids.len(), "no member station has a percentile table");
        }
    }
    let unzoned = roster
        .stations()
        .iter()
        .filter(|s| s.zones.iter().all(|z| *z == cfg.run.excluded_zone))
        .count();
    if unzoned > 0 {
        info!(stations = unzoned, "stations outside every zone");
    }

    println!("Stations:            {}", roster.len());
    println!("Zones:               {}", members.len());
    println!("Zones w/o tables:    {}", unclassifiable_zones);
    println!("Tables loaded:       {}", load.tables.len());
    println!("Tables rejected:     {}", load.rejected.len());
    println!("Tables with gaps:    {}", gapped);
    println!("Missing tables:      {}", missing);

    if !load.rejected.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
