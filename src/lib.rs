/// firedanger_service: daily NFDRS fire danger percentile and trend analysis.
///
/// # Module structure
///
/// ```text
/// firedanger_service
/// ├── model       - shared data types (RawRecord, StationResult, ZoneResult, Trend, …)
/// ├── config      - service configuration (firedanger.toml) and credentials
/// ├── logging     - console + per-run log file setup
/// ├── stations    - station roster (AllStation.csv) and zone membership
/// ├── percentiles - per-station ERC/BI percentile tables (Percentiles.csv)
/// ├── runner      - one run: stations on a worker pool, then zones, then sinks
/// ├── ingest
/// │   ├── wims     - WIMS NFDRS/observation XML: URL construction + parsing
/// │   ├── acquire  - retry and reporting-hour fallback per series
/// │   ├── scripted - canned series source for offline runs and tests
/// │   └── fixtures (test only) - representative WIMS response payloads
/// ├── analysis
/// │   ├── reconcile - one canonical record per day, observations merged
/// │   ├── trend     - Increase / Decrease / No Change with a deadband
/// │   ├── station   - per-station pipeline with failure isolation
/// │   └── zones     - zone averages and zone trends
/// └── sink
///     ├── csv             - CSV/JSON troubleshooting outputs
///     └── feature_service - hosted feature layer updates
/// ```

/// Public modules
pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod percentiles;
pub mod runner;
pub mod sink;
pub mod stations;
