/// Hosted feature-service sink (ArcGIS REST).
///
/// Flow per run:
///   1. generateToken with the service account from the environment
///   2. query each layer for the object ids of this run's stations / zones
///   3. applyEdits updates: all stations in one batch, zones in chunks
///
/// Every request batch is retried up to `max_attempts` times. Exhausting a
/// batch is the only error in the system that fails a run.

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Credentials, FeatureServiceSection};
use crate::model::{IndexKind, StationResult, Trend, ZoneResult};
use crate::sink::{ResultSink, RunSnapshot, SinkError, typed_attribute};

const OBJECT_ID_FIELD: &str = "OBJECTID";

pub struct FeatureServiceSink {
    client: reqwest::blocking::Client,
    settings: FeatureServiceSection,
    credentials: Credentials,
}

impl FeatureServiceSink {
    pub fn new(
        settings: FeatureServiceSection,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(FeatureServiceSink {
            client,
            settings,
            credentials,
        })
    }

    /// Runs `op` until it succeeds or `max_attempts` is reached.
    fn with_retry<T, F>(&self, batch: &str, mut op: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Result<T, SinkError>,
    {
        let attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    warn!(batch, attempt, error = %e, "feature service request failed, retrying");
                    std::thread::sleep(Duration::from_secs(self.settings.retry_delay_secs));
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SinkError::Exhausted {
                        batch: batch.to_string(),
                        attempts,
                        last: Box::new(e),
                    });
                }
            }
        }
    }

    fn generate_token(&self) -> Result<String, SinkError> {
        let url = format!(
            "{}/sharing/rest/generateToken",
            self.settings.portal_url.trim_end_matches('/')
        );
        let body: Value = self
            .client
            .post(&url)
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
                ("referer", self.settings.portal_url.as_str()),
                ("expiration", "120"),
                ("f", "json"),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        check_service_error(&body)?;

        body["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SinkError::Service("generateToken response has no token".to_string()))
    }

    /// Key value -> OBJECTID for the features matching `keys`.
    fn object_ids(
        &self,
        layer_url: &str,
        key_field: &str,
        keys: &[String],
        token: &str,
    ) -> Result<HashMap<String, i64>, SinkError> {
        let url = format!(
            "{}/query?where={}&outFields={}&returnGeometry=false&f=json&token={}",
            layer_url.trim_end_matches('/'),
            urlencoding::encode(&in_where_clause(key_field, keys)),
            urlencoding::encode(&format!("{},{}", OBJECT_ID_FIELD, key_field)),
            urlencoding::encode(token)
        );
        let body: Value = self.client.get(&url).send()?.error_for_status()?.json()?;
        check_service_error(&body)?;
        Ok(parse_object_ids(&body, key_field))
    }

    fn apply_updates(&self, layer_url: &str, updates: &[Value], token: &str) -> Result<usize, SinkError> {
        let url = format!("{}/applyEdits", layer_url.trim_end_matches('/'));
        let updates_json = serde_json::to_string(updates)?;
        let body: Value = self
            .client
            .post(&url)
            .form(&[
                ("updates", updates_json.as_str()),
                ("f", "json"),
                ("token", token),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        check_service_error(&body)?;
        count_update_successes(&body, updates.len())
    }

    fn publish_stations(&self, stations: &[StationResult], run_date: NaiveDateTime, token: &str) -> Result<(), SinkError> {
        let s = &self.settings;
        let keys: Vec<String> = stations.iter().map(|r| r.station_id.clone()).collect();
        let ids = self.with_retry("station object ids", || {
            self.object_ids(&s.station_layer_url, &s.station_key_field, &keys, token)
        })?;

        let updates: Vec<Value> = stations
            .iter()
            .filter_map(|r| match ids.get(&r.station_id) {
                Some(oid) => Some(station_feature(r, *oid, s, run_date)),
                None => {
                    warn!(station = %r.station_id, "station not found in feature service");
                    None
                }
            })
            .collect();

        let updated = self.with_retry("station updates", || {
            self.apply_updates(&s.station_layer_url, &updates, token)
        })?;
        info!(updated, "station layer updated");
        Ok(())
    }

    fn publish_zones(&self, zones: &[ZoneResult], token: &str) -> Result<(), SinkError> {
        let s = &self.settings;
        let keys: Vec<String> = zones.iter().map(|z| z.zone.clone()).collect();
        let ids = self.with_retry("zone object ids", || {
            self.object_ids(&s.zone_layer_url, &s.zone_key_field, &keys, token)
        })?;

        let updates: Vec<Value> = zones
            .iter()
            .filter_map(|z| ids.get(&z.zone).map(|oid| zone_feature(z, *oid)))
            .collect();

        for (i, chunk) in updates.chunks(s.zone_batch_size.max(1)).enumerate() {
            let batch = format!("zone updates batch {}", i + 1);
            let updated = self.with_retry(&batch, || self.apply_updates(&s.zone_layer_url, chunk, token))?;
            info!(batch = i + 1, updated, "zone layer batch updated");
        }
        Ok(())
    }
}

impl ResultSink for FeatureServiceSink {
    fn name(&self) -> &str {
        "feature_service"
    }

    fn publish(&self, snapshot: &RunSnapshot) -> Result<(), SinkError> {
        let result = self
            .with_retry("token", || self.generate_token())
            .and_then(|token| {
                self.publish_stations(&snapshot.stations, snapshot.run_date, &token)?;
                self.publish_zones(&snapshot.zones, &token)
            });
        if let Err(e) = &result {
            error!(error = %e, "feature service update failed; operator action needed");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Request / response shaping
// ---------------------------------------------------------------------------

/// `"FIELD" IN ('a', 'b')`, with single quotes in values doubled.
pub fn in_where_clause(field: &str, keys: &[String]) -> String {
    let values: Vec<String> = keys
        .iter()
        .map(|k| format!("'{}'", k.replace('\'', "''")))
        .collect();
    format!("\"{}\" IN ({})", field, values.join(", "))
}

fn check_service_error(body: &Value) -> Result<(), SinkError> {
    match body.get("error") {
        Some(err) => Err(SinkError::Service(
            err["message"].as_str().unwrap_or("unknown service error").to_string(),
        )),
        None => Ok(()),
    }
}

fn parse_object_ids(body: &Value, key_field: &str) -> HashMap<String, i64> {
    body["features"]
        .as_array()
        .map(|features| {
            features
                .iter()
                .filter_map(|f| {
                    let attrs = &f["attributes"];
                    let oid = attrs[OBJECT_ID_FIELD].as_i64()?;
                    let key = match &attrs[key_field] {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key, oid))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn count_update_successes(body: &Value, expected: usize) -> Result<usize, SinkError> {
    let results = body["updateResults"]
        .as_array()
        .ok_or_else(|| SinkError::Service("applyEdits response has no updateResults".to_string()))?;
    let ok = results
        .iter()
        .filter(|r| r["success"].as_bool().unwrap_or(false))
        .count();
    if ok < expected {
        return Err(SinkError::Service(format!("{} of {} updates failed", expected - ok, expected)));
    }
    Ok(ok)
}

/// Epoch milliseconds for a local naive datetime at a fixed UTC offset.
pub fn epoch_millis(local: NaiveDateTime, utc_offset_hours: i32) -> Option<i64> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.timestamp_millis())
}

fn trend_label(trend: &Option<Trend>) -> Value {
    trend.as_ref().map(|t| Value::from(t.label.as_str())).unwrap_or(Value::Null)
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn station_feature(
    r: &StationResult,
    object_id: i64,
    settings: &FeatureServiceSection,
    run_date: NaiveDateTime,
) -> Value {
    let mut attrs = Map::new();
    attrs.insert(OBJECT_ID_FIELD.to_string(), Value::from(object_id));

    for kind in IndexKind::ALL {
        let m = r.metrics(kind);
        let p = kind.field_key();
        attrs.insert(format!("{}_percentile", p), opt(m.current_percentile));
        attrs.insert(format!("{}_trend", p), trend_label(&m.current_trend));
        attrs.insert(format!("{}_fcast", p), opt(m.forecast_value));
        attrs.insert(format!("{}_fcast_percentile", p), opt(m.forecast_percentile));
        attrs.insert(format!("{}_fcast_trend", p), trend_label(&m.forecast_trend));
    }

    attrs.insert("NFDRS_Data_URL".to_string(), opt(r.urls.nfdrs.clone()));
    attrs.insert("Obs_Data_URL".to_string(), opt(r.urls.observation.clone()));
    attrs.insert(
        "nfdr_datetime".to_string(),
        opt(r.latest_record_time.and_then(|t| epoch_millis(t, settings.utc_offset_hours))),
    );
    attrs.insert(
        "run_datetime".to_string(),
        opt(epoch_millis(run_date, settings.utc_offset_hours)),
    );

    for field in &settings.passthrough_fields {
        let value = r
            .latest_attributes
            .get(field)
            .map(|raw| typed_attribute(field, raw))
            .unwrap_or(Value::Null);
        attrs.insert(field.clone(), value);
    }

    json!({ "attributes": attrs })
}

fn zone_feature(z: &ZoneResult, object_id: i64) -> Value {
    let mut attrs = Map::new();
    attrs.insert(OBJECT_ID_FIELD.to_string(), Value::from(object_id));
    for kind in IndexKind::ALL {
        let s = z.summary(kind);
        let p = kind.field_key();
        attrs.insert(format!("avg_{}_percentile", p), opt(s.avg_percentile));
        attrs.insert(format!("avg_{}_trend", p), trend_label(&s.trend));
        attrs.insert(format!("avg_{}_fcast_percentile", p), opt(s.avg_forecast_percentile));
        attrs.insert(format!("avg_{}_fcast_trend", p), trend_label(&s.forecast_trend));
    }
    attrs.insert(
        "nfdr_dt".to_string(),
        opt(z.report_date.map(|d| d.format("%m/%d/%Y").to_string())),
    );
    json!({ "attributes": attrs })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
