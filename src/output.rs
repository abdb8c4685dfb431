//! Output records and sink routing.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Method;
use crate::detect::hysteresis::HysteresisInfo;
use crate::detect::{Contribution, Severity};
use crate::health::HealthReport;
use crate::predict::{Forecast, RulEstimate};
use crate::stream::StreamRecord;

/// Which of the two logical outputs a record goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sink {
    Normal,
    Anomaly,
}

/// Per-stream entry of a multi-sensor payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutput {
    pub value: f64,
    pub is_anomaly: bool,
    pub raw_anomaly: bool,
    pub severity: Severity,
    pub status_text: String,
    pub warmup: bool,
    pub buffer_size: usize,
    #[serde(flatten)]
    pub details: BTreeMap<String, f64>,
    pub hysteresis: HysteresisInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Forecast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rul: Option<RulEstimate>,
}

impl From<StreamRecord> for StreamOutput {
    fn from(r: StreamRecord) -> Self {
        Self {
            value: r.value,
            is_anomaly: r.verdict.is_anomaly,
            raw_anomaly: r.raw_anomaly,
            severity: r.verdict.severity,
            status_text: r.verdict.status_text,
            warmup: r.verdict.warmup,
            buffer_size: r.buffer_size,
            details: r.verdict.details,
            hysteresis: r.hysteresis,
            prediction: r.prediction,
            rul: r.rul,
        }
    }
}

/// Echo of the ingested value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Scalar(f64),
    /// A bundle scored as one vector (PCA, model).
    Vector(BTreeMap<String, f64>),
    /// A bundle fanned out to per-stream detectors.
    Streams(BTreeMap<String, StreamOutput>),
}

/// One record per ingested sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub payload: Payload,
    pub is_anomaly: bool,
    pub raw_anomaly: bool,
    pub severity: Severity,
    pub method: Method,
    pub buffer_size: usize,
    pub window_size: usize,
    pub timestamp: i64,
    pub warmup: bool,
    pub status_text: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_contributor: Option<String>,
    pub hysteresis: HysteresisInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_sensors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Forecast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rul: Option<RulEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Severity supplied with the sample, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_severity: Option<String>,
}

impl Output {
    /// Anomalous records go to the anomaly sink; everything else,
    /// warm-up included, to the normal one.
    pub fn sink(&self) -> Sink {
        if self.is_anomaly {
            Sink::Anomaly
        } else {
            Sink::Normal
        }
    }

    /// Per-stream entry by name, for multi-sensor payloads.
    pub fn stream(&self, name: &str) -> Option<&StreamOutput> {
        match &self.payload {
            Payload::Streams(map) => map.get(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Output {
        Output {
            payload: Payload::Scalar(1.5),
            is_anomaly: false,
            raw_anomaly: false,
            severity: Severity::Normal,
            method: Method::ZScore,
            buffer_size: 3,
            window_size: 100,
            timestamp: 42,
            warmup: false,
            status_text: "ok".into(),
            details: BTreeMap::from([("zScore".to_string(), 0.5)]),
            contributions: Vec::new(),
            top_contributor: None,
            hysteresis: HysteresisInfo::default(),
            anomaly_sensors: None,
            sensor_count: None,
            input_format: None,
            prediction: None,
            rul: None,
            health: None,
            label: None,
            label_severity: None,
        }
    }

    #[test]
    fn test_serialized_shape() {
        let v = serde_json::to_value(base()).unwrap();
        assert_eq!(v["payload"], 1.5);
        assert_eq!(v["isAnomaly"], false);
        assert_eq!(v["method"], "zscore");
        assert_eq!(v["zScore"], 0.5);
        assert_eq!(v["hysteresis"]["consecutiveAnomalies"], 0);
        assert!(v.get("anomalySensors").is_none());
        assert!(v.get("rul").is_none());
    }

    #[test]
    fn test_sink_follows_final_flag() {
        let mut out = base();
        assert_eq!(out.sink(), Sink::Normal);
        out.is_anomaly = true;
        assert_eq!(out.sink(), Sink::Anomaly);
    }
}
