/// Run configuration loader - parses firedanger.toml
///
/// Keeps paths, endpoints, retry policy and the feature-service target out
/// of the code. Every key has a default, so an empty (or absent) file
/// describes a CSV-only run against the public WIMS endpoints.

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::trend::TREND_DEADBAND;
use crate::ingest::acquire::{
    AcquisitionPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_REPORTING_HOURS, RetryPolicy,
};
use crate::ingest::wims::{DEFAULT_NFDRS_URL, DEFAULT_OBS_URL, WimsEndpoints};

pub const DEFAULT_CONFIG_PATH: &str = "firedanger.toml";
pub const USERNAME_VAR: &str = "FIREDANGER_USERNAME";
pub const PASSWORD_VAR: &str = "FIREDANGER_PASSWORD";

const RUN_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("run_date '{0}' is neither \"current\" nor YYYY-MM-DD HH:MM:SS")]
    RunDate(String),
    #[error("{0} must be set when [feature_service] is configured")]
    MissingCredential(&'static str),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub run: RunSection,
    pub wims: WimsSection,
    pub trend: TrendSection,
    pub feature_service: Option<FeatureServiceSection>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSection {
    /// `"current"` or a fixed `YYYY-MM-DD HH:MM:SS` for re-runs.
    pub run_date: String,
    pub roster_path: PathBuf,
    pub percentile_path: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Station worker threads; 1 processes stations sequentially.
    pub workers: usize,
    /// Roster zone code meaning "not in any zone".
    pub excluded_zone: String,
}

impl Default for RunSection {
    fn default() -> Self {
        RunSection {
            run_date: "current".to_string(),
            roster_path: PathBuf::from("AllStation.csv"),
            percentile_path: PathBuf::from("Percentiles.csv"),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            workers: 1,
            excluded_zone: "Non-PSA".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WimsSection {
    pub nfdrs_url: String,
    pub obs_url: String,
    /// Hour-fallback order for the observed-index request.
    pub reporting_hours: Vec<u32>,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for WimsSection {
    fn default() -> Self {
        WimsSection {
            nfdrs_url: DEFAULT_NFDRS_URL.to_string(),
            obs_url: DEFAULT_OBS_URL.to_string(),
            reporting_hours: DEFAULT_REPORTING_HOURS.to_vec(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl WimsSection {
    pub fn endpoints(&self) -> WimsEndpoints {
        WimsEndpoints {
            nfdrs_url: self.nfdrs_url.clone(),
            obs_url: self.obs_url.clone(),
        }
    }

    pub fn acquisition_policy(&self) -> AcquisitionPolicy {
        AcquisitionPolicy {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            reporting_hours: self.reporting_hours.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendSection {
    pub deadband: f64,
}

impl Default for TrendSection {
    fn default() -> Self {
        TrendSection {
            deadband: TREND_DEADBAND,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureServiceSection {
    pub portal_url: String,
    pub station_layer_url: String,
    pub zone_layer_url: String,
    pub station_key_field: String,
    pub zone_key_field: String,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub zone_batch_size: usize,
    /// Fixed offset applied to datetimes written to the service.
    pub utc_offset_hours: i32,
    /// WIMS attributes copied verbatim onto station rows.
    pub passthrough_fields: Vec<String>,
}

impl Default for FeatureServiceSection {
    fn default() -> Self {
        FeatureServiceSection {
            portal_url: "https://www.arcgis.com".to_string(),
            station_layer_url: String::new(),
            zone_layer_url: String::new(),
            station_key_field: "NWSID_Clean".to_string(),
            zone_key_field: "PSANationalCode".to_string(),
            max_attempts: 5,
            retry_delay_secs: 30,
            zone_batch_size: 50,
            utc_offset_hours: -7,
            passthrough_fields: Vec::new(),
        }
    }
}

/// Feature-service login, read from the environment.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Loads the config file. A missing file at the default path yields the
/// defaults; a missing file anywhere else is an error.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        return Ok(ServiceConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path_str.clone(),
        source,
    })?;
    let config = parse_config(&contents).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse { path: path_str, source },
        other => other,
    })?;
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: "<inline>".to_string(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.workers == 0 {
            return Err(ConfigError::Invalid("run.workers must be at least 1".into()));
        }
        if self.wims.max_attempts == 0 {
            return Err(ConfigError::Invalid("wims.max_attempts must be at least 1".into()));
        }
        if self.wims.reporting_hours.is_empty() {
            return Err(ConfigError::Invalid("wims.reporting_hours must not be empty".into()));
        }
        if let Some(hour) = self.wims.reporting_hours.iter().find(|h| **h > 23) {
            return Err(ConfigError::Invalid(format!("reporting hour {} is past 23", hour)));
        }
        if !(self.trend.deadband.is_finite() && self.trend.deadband >= 0.0) {
            return Err(ConfigError::Invalid("trend.deadband must be a non-negative number".into()));
        }
        if let Some(fs) = &self.feature_service {
            if fs.zone_batch_size == 0 || fs.max_attempts == 0 {
                return Err(ConfigError::Invalid(
                    "feature_service batch size and attempts must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// Resolves `run.run_date`, with an optional date override from the
    /// command line.
    pub fn resolve_run_date(&self, override_date: Option<NaiveDate>) -> Result<NaiveDateTime, ConfigError> {
        if let Some(date) = override_date {
            return date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| ConfigError::RunDate(date.to_string()));
        }
        parse_run_date(&self.run.run_date)
    }
}

pub fn parse_run_date(raw: &str) -> Result<NaiveDateTime, ConfigError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("current") {
        return Ok(Local::now().naive_local());
    }
    NaiveDateTime::parse_from_str(raw, RUN_DATE_FORMAT)
        .map_err(|_| ConfigError::RunDate(raw.to_string()))
}

/// Reads feature-service credentials from the environment, loading `.env`
/// first if present.
pub fn load_credentials() -> Result<Credentials, ConfigError> {
    dotenv::dotenv().ok();
    let username = std::env::var(USERNAME_VAR)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingCredential(USERNAME_VAR))?;
    let password = std::env::var(PASSWORD_VAR)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingCredential(PASSWORD_VAR))?;
    Ok(Credentials { username, password })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = parse_config("").expect("empty config is valid");
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.wims.reporting_hours, vec![13, 12, 14]);
        assert_eq!(config.wims.max_attempts, 5);
        assert_eq!(config.trend.deadband, 3.0);
        assert_eq!(config.run.excluded_zone, "Non-PSA");
        assert!(config.feature_service.is_none(), "no feature service unless configured");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            [run]
            workers = 4
            run_date = "2024-07-22 14:00:00"

            [wims]
            reporting_hours = [14, 13]

            [feature_service]
            station_layer_url = "https://services.example.test/FeatureServer/0"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.run.workers, 4);
        assert_eq!(config.run.roster_path, PathBuf::from("AllStation.csv"));
        assert_eq!(config.wims.reporting_hours, vec![14, 13]);
        assert_eq!(config.wims.max_attempts, 5);

        let fs = config.feature_service.expect("section present");
        assert_eq!(fs.station_key_field, "NWSID_Clean");
        assert_eq!(fs.zone_batch_size, 50);
        assert_eq!(fs.retry_delay_secs, 30);
    }

    #[test]
    fn test_fixed_run_date_is_parsed() {
        let config = parse_config("[run]\nrun_date = \"2024-07-22 14:30:00\"").unwrap();
        let run_date = config.resolve_run_date(None).unwrap();
        assert_eq!(run_date.date(), NaiveDate::from_ymd_opt(2024, 7, 22).unwrap());
    }

    #[test]
    fn test_command_line_date_overrides_config() {
        let config = parse_config("[run]\nrun_date = \"2024-07-22 14:30:00\"").unwrap();
        let override_date = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let run_date = config.resolve_run_date(Some(override_date)).unwrap();
        assert_eq!(run_date.date(), override_date);
    }

    #[test]
    fn test_bad_run_date_is_rejected() {
        assert!(matches!(parse_run_date("yesterday"), Err(ConfigError::RunDate(_))));
        assert!(parse_run_date("current").is_ok());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        assert!(matches!(parse_config("[run]\nworkers = 0"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse_config("[wims]\nreporting_hours = []"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse_config("[wims]\nreporting_hours = [25]"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse_config("[trend]\ndeadband = -1.0"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_types_are_parse_errors() {
        assert!(matches!(parse_config("[run]\nworkers = \"many\""), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_custom_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load_config(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "svc".to_string(),
            password: "hunter2".to_string(),
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"), "password leaked: {}", shown);
    }
}
