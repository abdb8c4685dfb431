//! Input samples and their JSON forms.
//!
//! Accepted shapes:
//!
//! - a bare number (or numeric string): one scalar reading
//! - an object of `name → number`: one reading per stream
//! - an array of `{"name": .., "value": ..}` records
//! - an envelope object with `payload` and any of `timestamp`, `reset`,
//!   `config`, `label`, `severity`
//!
//! Envelope keys found in a bare object are taken as envelope fields, so
//! `{"timestamp": 1700000000000, "pressure": 4.5}` works as expected. The
//! flip side is that `payload`, `timestamp`, `reset`, `config`, `label` and
//! `severity` are reserved at the top level: a sensor with one of those
//! names must be sent inside `payload`, where every key is a sensor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::ConfigOverrides;
use crate::error::{EngineError, Result};

const ENVELOPE_KEYS: [&str; 6] = ["payload", "timestamp", "reset", "config", "label", "severity"];

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Scalar(f64),
    Named(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// `None` for control-only messages such as a bare reset.
    pub reading: Option<Reading>,
    pub severity: Option<String>,
    pub label: Option<String>,
    pub reset: bool,
    pub config: Option<ConfigOverrides>,
}

impl Sample {
    pub fn scalar(timestamp: i64, value: f64) -> Self {
        Self::with_reading(timestamp, Reading::Scalar(value))
    }

    pub fn named<K: Into<String>>(timestamp: i64, readings: impl IntoIterator<Item = (K, f64)>) -> Self {
        let map = readings.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::with_reading(timestamp, Reading::Named(map))
    }

    pub fn reset_only(timestamp: i64) -> Self {
        Self {
            timestamp,
            reading: None,
            severity: None,
            label: None,
            reset: true,
            config: None,
        }
    }

    fn with_reading(timestamp: i64, reading: Reading) -> Self {
        Self {
            timestamp,
            reading: Some(reading),
            severity: None,
            label: None,
            reset: false,
            config: None,
        }
    }

    /// Parses one NDJSON line.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| EngineError::InvalidInput(format!("malformed JSON: {e}")))?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(obj) = value else {
            return Ok(Self::with_reading(now_millis(), parse_payload(value)?));
        };

        let has_envelope = ENVELOPE_KEYS.iter().any(|k| obj.contains_key(*k));
        if !has_envelope {
            return Ok(Self::with_reading(now_millis(), parse_payload(value)?));
        }

        let timestamp = match obj.get("timestamp") {
            Some(ts) => parse_timestamp(ts)?,
            None => now_millis(),
        };
        let reset = match obj.get("reset") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(EngineError::InvalidInput(format!("reset must be a boolean, got {other}")));
            }
        };
        let config = match obj.get("config") {
            None | Some(Value::Null) => None,
            Some(c) => Some(
                serde_json::from_value::<ConfigOverrides>(c.clone())
                    .map_err(|e| EngineError::Config(format!("invalid config override: {e}")))?,
            ),
        };

        let reading = match obj.get("payload") {
            Some(Value::Null) => None,
            Some(payload) => Some(parse_payload(payload)?),
            None => {
                let rest: Map<String, Value> = obj
                    .iter()
                    .filter(|(k, _)| !ENVELOPE_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if rest.is_empty() {
                    None
                } else {
                    Some(parse_payload(&Value::Object(rest))?)
                }
            }
        };

        Ok(Self {
            timestamp,
            reading,
            severity: text_field(obj, "severity"),
            label: text_field(obj, "label"),
            reset,
            config,
        })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_timestamp(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| EngineError::InvalidInput(format!("bad timestamp {n}"))),
        Value::String(s) => {
            if let Ok(ms) = s.trim().parse::<i64>() {
                return Ok(ms);
            }
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| EngineError::InvalidInput(format!("bad timestamp '{s}': {e}")))
        }
        other => Err(EngineError::InvalidInput(format!("bad timestamp {other}"))),
    }
}

fn parse_number(value: &Value) -> Result<f64> {
    let x = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match x {
        Some(x) if x.is_finite() => Ok(x),
        _ => Err(EngineError::InvalidInput(format!("non-numeric value {value}"))),
    }
}

fn parse_payload(value: &Value) -> Result<Reading> {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                return Err(EngineError::InvalidInput("empty multi-sensor payload".into()));
            }
            let readings = map
                .iter()
                .map(|(k, v)| {
                    parse_number(v)
                        .map(|x| (k.clone(), x))
                        .map_err(|_| EngineError::InvalidInput(format!("non-numeric value for '{k}': {v}")))
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(Reading::Named(readings))
        }
        Value::Array(items) => {
            if items.is_empty() {
                return Err(EngineError::InvalidInput("empty multi-sensor payload".into()));
            }
            let mut readings = BTreeMap::new();
            for item in items {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| EngineError::InvalidInput(format!("expected {{name, value}} record, got {item}")))?;
                let v = item
                    .get("value")
                    .ok_or_else(|| EngineError::InvalidInput(format!("record '{name}' has no value")))?;
                readings.insert(name.to_string(), parse_number(v)?);
            }
            Ok(Reading::Named(readings))
        }
        other => parse_number(other).map(Reading::Scalar),
    }
}
