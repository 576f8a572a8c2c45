/// In-memory `SeriesSource` that answers from canned XML bodies.
///
/// Used by the test suites and for replaying saved WIMS responses without
/// network access. Responses are keyed by (station, record type, hour); a
/// response registered without a station applies to every station. Requests
/// with no registered response get an empty record set.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::ingest::wims::{
    FetchError, RecordType, SeriesRequest, SeriesSource, WimsEndpoints, build_url, parse_records,
};
use crate::model::FlatRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScriptKey {
    station_id: Option<String>,
    record_type: RecordType,
    hour: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    endpoints: WimsEndpoints,
    responses: HashMap<ScriptKey, String>,
    /// Remaining forced failures per key, consumed before the response.
    failures: Mutex<HashMap<ScriptKey, u32>>,
    requests: Mutex<Vec<SeriesRequest>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        ScriptedSource::default()
    }

    /// Registers `body` for every station.
    pub fn respond(self, record_type: RecordType, hour: Option<u32>, body: &str) -> Self {
        self.insert_response(None, record_type, hour, body)
    }

    pub fn respond_for(
        self,
        station_id: &str,
        record_type: RecordType,
        hour: Option<u32>,
        body: &str,
    ) -> Self {
        self.insert_response(Some(station_id.to_string()), record_type, hour, body)
    }

    /// The next `times` matching requests fail with a transport error.
    pub fn fail_times(self, record_type: RecordType, hour: Option<u32>, times: u32) -> Self {
        self.insert_failure(None, record_type, hour, times)
    }

    pub fn fail_times_for(
        self,
        station_id: &str,
        record_type: RecordType,
        hour: Option<u32>,
        times: u32,
    ) -> Self {
        self.insert_failure(Some(station_id.to_string()), record_type, hour, times)
    }

    fn insert_response(
        mut self,
        station_id: Option<String>,
        record_type: RecordType,
        hour: Option<u32>,
        body: &str,
    ) -> Self {
        let key = ScriptKey { station_id, record_type, hour };
        self.responses.insert(key, body.to_string());
        self
    }

    fn insert_failure(
        self,
        station_id: Option<String>,
        record_type: RecordType,
        hour: Option<u32>,
        times: u32,
    ) -> Self {
        let key = ScriptKey { station_id, record_type, hour };
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, times);
        self
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<SeriesRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Hours requested for `record_type`, in order, across all stations.
    pub fn hours_requested(&self, record_type: RecordType) -> Vec<Option<u32>> {
        self.requests()
            .into_iter()
            .filter(|r| r.record_type == record_type)
            .map(|r| r.hour)
            .collect()
    }

    /// Station-specific key first, then the all-stations key.
    fn keys_for(request: &SeriesRequest) -> [ScriptKey; 2] {
        [
            ScriptKey {
                station_id: Some(request.station_id.clone()),
                record_type: request.record_type,
                hour: request.hour,
            },
            ScriptKey {
                station_id: None,
                record_type: request.record_type,
                hour: request.hour,
            },
        ]
    }
}

impl SeriesSource for ScriptedSource {
    fn fetch(&self, request: &SeriesRequest) -> Result<Vec<FlatRecord>, FetchError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let keys = Self::keys_for(request);

        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            for key in &keys {
                if let Some(remaining) = failures.get_mut(key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(FetchError::Transport(format!(
                            "scripted failure for station {}",
                            request.station_id
                        )));
                    }
                }
            }
        }

        match keys.iter().find_map(|key| self.responses.get(key)) {
            Some(body) => parse_records(body),
            None => Ok(Vec::new()),
        }
    }

    fn describe(&self, request: &SeriesRequest) -> String {
        build_url(&self.endpoints, request)
    }
}
