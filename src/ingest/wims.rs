/// WIMS (Weather Information Management System) client.
///
/// Handles URL construction, XML parsing, and typed conversion for the two
/// WIMS xsql endpoints used by the service:
///   nfdrs.xsql - NFDRS index records (type `N` observed, `F` forecast)
///   obs.xsql   - weather observation records
///
/// Responses are a root element holding one element per record; each
/// record's children are `tag -> text` pairs. See `fixtures.rs` for
/// annotated examples.

use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use std::time::Duration;

use crate::model::{FlatRecord, ObservationRecord, RawRecord};

pub const DEFAULT_NFDRS_URL: &str = "https://famprod.nwcg.gov/prod-wims/xsql/nfdrs.xsql";
pub const DEFAULT_OBS_URL: &str = "https://famprod.nwcg.gov/prod-wims/xsql/obs.xsql";

/// Date format used in WIMS request parameters (`22-Jul-24`).
const REQUEST_DATE_FORMAT: &str = "%d-%b-%y";
/// Date format used in WIMS response records (`07/22/2024`).
const RECORD_DATE_FORMAT: &str = "%m/%d/%Y";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single request failed. Every variant is retried by the acquisition
/// adapter.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP error: {0}")]
    Http(u16),
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("field '{field}' has unparseable value '{value}'")]
    Field { field: String, value: String },
    #[error("record is missing field '{0}'")]
    MissingField(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchError::Http(status.as_u16()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Observed NFDRS indices (`type=N`).
    HistoricalIndex,
    /// Forecast NFDRS indices (`type=F`).
    ForecastIndex,
    Observation,
}

impl RecordType {
    fn type_param(&self) -> &'static str {
        match self {
            RecordType::HistoricalIndex => "N",
            RecordType::ForecastIndex => "F",
            RecordType::Observation => "",
        }
    }
}

/// Parameters of one WIMS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub station_id: String,
    pub fuel_model: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Reporting hour; `None` requests every hour.
    pub hour: Option<u32>,
    pub record_type: RecordType,
}

impl SeriesRequest {
    pub fn with_hour(&self, hour: u32) -> Self {
        SeriesRequest { hour: Some(hour), ..self.clone() }
    }
}

/// Base endpoints. Overridable from config so tests and mirrors can point
/// elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimsEndpoints {
    pub nfdrs_url: String,
    pub obs_url: String,
}

impl Default for WimsEndpoints {
    fn default() -> Self {
        WimsEndpoints {
            nfdrs_url: DEFAULT_NFDRS_URL.to_string(),
            obs_url: DEFAULT_OBS_URL.to_string(),
        }
    }
}

/// Builds the WIMS URL for a request.
///
/// All of the xsql parameters are always present, empty when unused, to
/// match what the service expects.
pub fn build_url(endpoints: &WimsEndpoints, request: &SeriesRequest) -> String {
    let (base, fuel_model) = match request.record_type {
        RecordType::Observation => (&endpoints.obs_url, ""),
        _ => (&endpoints.nfdrs_url, request.fuel_model.as_str()),
    };
    let hour = request.hour.map(|h| h.to_string()).unwrap_or_default();

    format!(
        "{}?stn={}&sig=&type={}&fmodel={}&start={}&end={}&time={}&sort=&ndays=&user=",
        base,
        request.station_id,
        request.record_type.type_param(),
        fuel_model,
        request.start.format(REQUEST_DATE_FORMAT),
        request.end.format(REQUEST_DATE_FORMAT),
        hour
    )
}

// ---------------------------------------------------------------------------
// Source seam
// ---------------------------------------------------------------------------

/// Anything that can answer a `SeriesRequest` with flat records.
///
/// `Sync` so one source can be shared by station workers.
pub trait SeriesSource: Send + Sync {
    fn fetch(&self, request: &SeriesRequest) -> Result<Vec<FlatRecord>, FetchError>;

    /// URL that identifies the request, kept as acquisition metadata.
    fn describe(&self, request: &SeriesRequest) -> String;
}

/// Live WIMS over HTTP.
pub struct WimsClient {
    client: reqwest::blocking::Client,
    endpoints: WimsEndpoints,
}

impl WimsClient {
    pub fn new(endpoints: WimsEndpoints, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("firedanger_service/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(WimsClient { client, endpoints })
    }
}

impl SeriesSource for WimsClient {
    fn fetch(&self, request: &SeriesRequest) -> Result<Vec<FlatRecord>, FetchError> {
        let url = build_url(&self.endpoints, request);
        let response = self.client.get(&url).send()?;

        if !response.status().is_success() {
            return Err(FetchError::Http(response.status().as_u16()));
        }

        let body = response.text()?;
        parse_records(&body)
    }

    fn describe(&self, request: &SeriesRequest) -> String {
        build_url(&self.endpoints, request)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parses a WIMS XML body into flat records, one per child of the root.
///
/// A root with no children is a valid, empty response.
pub fn parse_records(xml: &str) -> Result<Vec<FlatRecord>, FetchError> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<FlatRecord> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    2 => current = Some(FlatRecord::new()),
                    3 => {
                        field = Some(name);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                // <tag/> at depth 2 is an empty record field list; at depth 3 an empty field.
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    1 => records.push(FlatRecord::new()),
                    2 => {
                        if let Some(record) = current.as_mut() {
                            record.insert(name, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if depth == 3 {
                    let unescaped = t.unescape().map_err(|e| FetchError::Xml(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(c)) => {
                if depth == 3 {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                match depth {
                    3 => {
                        if let (Some(record), Some(name)) = (current.as_mut(), field.take()) {
                            record.insert(name, text.trim().to_string());
                        }
                    }
                    2 => {
                        if let Some(record) = current.take() {
                            records.push(record);
                        }
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FetchError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FetchError::Xml("document ended inside an element".to_string()));
    }

    Ok(records)
}

fn required<'a>(record: &'a FlatRecord, key: &str) -> Result<&'a str, FetchError> {
    record
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FetchError::MissingField(key.to_string()))
}

fn parse_date(record: &FlatRecord, key: &str) -> Result<NaiveDate, FetchError> {
    let raw = required(record, key)?;
    NaiveDate::parse_from_str(raw, RECORD_DATE_FORMAT).map_err(|_| FetchError::Field {
        field: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_u32(record: &FlatRecord, key: &str) -> Result<u32, FetchError> {
    let raw = required(record, key)?;
    raw.parse().map_err(|_| FetchError::Field {
        field: key.to_string(),
        value: raw.to_string(),
    })
}

/// Optional numeric field: absent or blank is `None`, garbage is an error.
fn parse_optional_f64(record: &FlatRecord, key: &str) -> Result<Option<f64>, FetchError> {
    match record.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| FetchError::Field {
            field: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Converts a flat NFDRS record (`nfdr_dt`, `nfdr_tm`, `mp`, `ec`, `bi`).
pub fn to_raw_record(record: FlatRecord) -> Result<RawRecord, FetchError> {
    Ok(RawRecord {
        date: parse_date(&record, "nfdr_dt")?,
        hour: parse_u32(&record, "nfdr_tm")?,
        model_priority: parse_u32(&record, "mp")?,
        erc: parse_optional_f64(&record, "ec")?,
        bi: parse_optional_f64(&record, "bi")?,
        fields: record,
    })
}

/// Converts a flat observation record (`obs_dt`, `obs_tm`).
pub fn to_observation(record: FlatRecord) -> Result<ObservationRecord, FetchError> {
    Ok(ObservationRecord {
        date: parse_date(&record, "obs_dt")?,
        hour: parse_u32(&record, "obs_tm")?,
        fields: record,
    })
}

/// `date + hour` as a comparable timestamp; `None` for hours past 23.
pub fn record_timestamp(date: NaiveDate, hour: u32) -> Option<NaiveDateTime> {
    date.and_hms_opt(hour, 0, 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fixtures::*;

    fn request(record_type: RecordType, hour: Option<u32>) -> SeriesRequest {
        SeriesRequest {
            station_id: "045101".to_string(),
            fuel_model: "Y".to_string(),
            start: NaiveDate::from_ymd_opt(2024, 7, 20).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 7, 22).unwrap(),
            hour,
            record_type,
        }
    }

    // --- URL construction ---------------------------------------------------

    #[test]
    fn test_nfdrs_url_carries_station_fuel_model_dates_and_hour() {
        let url = build_url(&WimsEndpoints::default(), &request(RecordType::HistoricalIndex, Some(13)));
        assert_eq!(
            url,
            "https://famprod.nwcg.gov/prod-wims/xsql/nfdrs.xsql?stn=045101&sig=&type=N&fmodel=Y\
             &start=20-Jul-24&end=22-Jul-24&time=13&sort=&ndays=&user="
        );
    }

    #[test]
    fn test_forecast_url_has_type_f_and_no_hour() {
        let url = build_url(&WimsEndpoints::default(), &request(RecordType::ForecastIndex, None));
        assert!(url.contains("type=F"), "forecast must request type F, got {}", url);
        assert!(url.contains("&time=&"), "forecast must not filter by hour, got {}", url);
    }

    #[test]
    fn test_observation_url_targets_obs_endpoint_without_fuel_model() {
        let url = build_url(&WimsEndpoints::default(), &request(RecordType::Observation, None));
        assert!(url.starts_with(DEFAULT_OBS_URL));
        assert!(url.contains("&fmodel=&"), "observations are not fuel-model specific: {}", url);
    }

    // --- Parsing ------------------------------------------------------------

    #[test]
    fn test_parse_nfdrs_fixture() {
        let records = parse_records(fixture_nfdrs_observed_xml()).expect("fixture should parse");
        assert_eq!(records.len(), 4);
        assert_eq!(records[0]["nfdr_dt"], "07/20/2024");
        assert_eq!(records[0]["ec"], "42");
        assert_eq!(records[0]["msgc"], "16Y2");
    }

    #[test]
    fn test_parse_empty_root_is_empty_not_error() {
        assert!(parse_records(fixture_empty_xml()).unwrap().is_empty());
        assert!(parse_records("<nfdrs/>").unwrap().is_empty());
    }

    #[test]
    fn test_parse_truncated_document_is_error() {
        let result = parse_records("<nfdrs><row><nfdr_dt>07/20/2024</nfdr_dt>");
        assert!(matches!(result, Err(FetchError::Xml(_))), "got {:?}", result);
    }

    #[test]
    fn test_parse_keeps_empty_fields() {
        let records = parse_records("<obs><row><obs_dt>07/22/2024</obs_dt><wdir/></row></obs>").unwrap();
        assert_eq!(records[0]["wdir"], "");
    }

    #[test]
    fn test_to_raw_record_parses_typed_fields() {
        let records = parse_records(fixture_nfdrs_observed_xml()).unwrap();
        let raw = to_raw_record(records[0].clone()).expect("record should convert");
        assert_eq!(raw.date, NaiveDate::from_ymd_opt(2024, 7, 20).unwrap());
        assert_eq!(raw.hour, 13);
        assert_eq!(raw.model_priority, 1);
        assert_eq!(raw.erc, Some(42.0));
        assert_eq!(raw.bi, Some(38.0));
    }

    #[test]
    fn test_blank_index_is_none_but_garbage_is_error() {
        let mut record = FlatRecord::new();
        record.insert("nfdr_dt".into(), "07/22/2024".into());
        record.insert("nfdr_tm".into(), "13".into());
        record.insert("mp".into(), "1".into());
        record.insert("ec".into(), "".into());
        record.insert("bi".into(), "41".into());
        let raw = to_raw_record(record.clone()).unwrap();
        assert_eq!(raw.erc, None);

        record.insert("ec".into(), "n/a".into());
        assert!(matches!(to_raw_record(record), Err(FetchError::Field { .. })));
    }

    #[test]
    fn test_missing_date_is_error() {
        let mut record = FlatRecord::new();
        record.insert("obs_tm".into(), "13".into());
        assert!(matches!(to_observation(record), Err(FetchError::MissingField(_))));
    }

    #[test]
    fn test_record_timestamp_rejects_out_of_range_hour() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 22).unwrap();
        assert!(record_timestamp(date, 13).is_some());
        assert!(record_timestamp(date, 24).is_none());
    }
}
