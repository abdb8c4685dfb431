//! Per-stream detector state and the multi-stream multiplexer.
//!
//! A [`Channel`] owns everything one univariate stream needs between
//! samples. [`MultiStream`] keeps one channel per name, created on first
//! sight. [`VectorChannel`] treats a named bundle as one feature vector for
//! the PCA and model methods.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::stats;
use crate::config::EngineConfig;
use crate::detect::hysteresis::{Hysteresis, HysteresisInfo};
use crate::detect::pca::PcaDetector;
use crate::detect::{model, zscore, Estimator, Severity, Verdict};
use crate::error::{EngineError, Result};
use crate::health::{HealthInput, ReliabilityTracker, StreamHealth};
use crate::predict::{rul, trend, Forecast, RulEstimate};
use crate::window::SlidingWindow;

/// Result of one sample on one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub value: f64,
    pub raw_anomaly: bool,
    /// Debounced verdict.
    pub verdict: Verdict,
    pub hysteresis: HysteresisInfo,
    pub buffer_size: usize,
    pub prediction: Option<Forecast>,
    pub rul: Option<RulEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub window: SlidingWindow<f64>,
    pub estimator: Estimator,
    pub hysteresis: Hysteresis,
    pub reliability: ReliabilityTracker,
}

impl Channel {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            window: SlidingWindow::new(cfg.window_size),
            estimator: Estimator::for_method(cfg.method),
            hysteresis: Hysteresis::default(),
            reliability: ReliabilityTracker::default(),
        }
    }

    /// Scores `x` under `cfg`, which may differ from the configuration the
    /// channel was built with. The window follows `cfg.window_size`; a
    /// different method scores with fresh estimator state and leaves the
    /// channel's own estimator untouched.
    pub fn ingest(&mut self, timestamp: i64, x: f64, cfg: &EngineConfig) -> StreamRecord {
        self.window.resize(cfg.window_size);
        self.window.push(timestamp, x);
        let mut scratch = Estimator::for_method(cfg.method);
        let raw = if scratch.method() == self.estimator.method() {
            self.estimator.ingest(&self.window, x, cfg)
        } else {
            scratch.ingest(&self.window, x, cfg)
        };
        self.finish(raw, x, cfg)
    }

    /// Scores `x` with an external model's output instead of the estimator.
    pub fn ingest_model(&mut self, timestamp: i64, x: f64, output: &[f64], cfg: &EngineConfig) -> StreamRecord {
        self.window.resize(cfg.window_size);
        self.window.push(timestamp, x);
        let raw = model::evaluate(&[x], output, &cfg.model);
        self.finish(raw, x, cfg)
    }

    /// Debounces a raw verdict for the newest sample and attaches the side
    /// channels.
    fn finish(&mut self, raw: Verdict, x: f64, cfg: &EngineConfig) -> StreamRecord {
        let raw_anomaly = raw.is_anomaly;
        let warmup = raw.warmup;
        let (verdict, hysteresis) = self.hysteresis.apply(raw, &cfg.hysteresis);
        if !warmup {
            self.reliability.record(x, verdict.is_anomaly);
        }

        let prediction = cfg
            .trend
            .enabled
            .then(|| trend::forecast(&self.window, &cfg.trend))
            .flatten();
        let rul = cfg
            .rul
            .enabled
            .then(|| rul::estimate(&self.window, &cfg.rul))
            .flatten();

        StreamRecord {
            value: x,
            raw_anomaly,
            verdict,
            hysteresis,
            buffer_size: self.window.len(),
            prediction,
            rul,
        }
    }

    /// Applies a changed configuration. The window keeps its newest samples;
    /// estimator state is rebuilt only when the method changes.
    pub fn reconfigure(&mut self, cfg: &EngineConfig) {
        self.window.resize(cfg.window_size);
        let fresh = Estimator::for_method(cfg.method);
        if fresh.method() != self.estimator.method() {
            self.estimator = fresh;
        }
    }

    pub fn reset(&mut self) {
        self.window.reset();
        self.estimator.reset();
        self.hysteresis.reset();
        self.reliability.reset();
    }

    /// Health-scoring inputs for the latest record.
    pub fn health_input(&self, record: &StreamRecord, cfg: &EngineConfig) -> HealthInput {
        let values = self.window.values();
        let (z, mean, _) = zscore::z_score(&values, record.value);
        let deviation_pct = if mean == 0.0 {
            0.0
        } else {
            (record.value - mean) / mean.abs() * 100.0
        };
        let (trend, slope) = match &record.prediction {
            Some(f) => (f.trend, f.slope),
            None => {
                let reg = stats::linear_regression(&self.window.last_n(cfg.trend.lookback.max(2)));
                (reg.trend(), reg.slope)
            }
        };
        HealthInput {
            is_anomaly: record.verdict.is_anomaly,
            z_score: z,
            deviation_pct,
            trend,
            slope,
            confidence: record.rul.as_ref().map(|r| r.confidence),
        }
    }

    pub fn stream_health<'a>(
        &self,
        name: &'a str,
        record: &StreamRecord,
        cfg: &EngineConfig,
    ) -> StreamHealth<'a> {
        let input = self.health_input(record, cfg);
        let reliability_factor = self.reliability.reliability_factor(input.confidence);
        StreamHealth {
            name,
            input,
            reliability_factor,
        }
    }
}

/// Fan-out result over all streams present in one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiRecord {
    pub records: BTreeMap<String, StreamRecord>,
    pub any_anomaly: bool,
    pub any_raw_anomaly: bool,
    pub severity: Severity,
    pub anomaly_sensors: Vec<String>,
    pub all_warmup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiStream {
    pub streams: BTreeMap<String, Channel>,
}

impl MultiStream {
    pub fn ingest(&mut self, timestamp: i64, readings: &BTreeMap<String, f64>, cfg: &EngineConfig) -> MultiRecord {
        let mut records = BTreeMap::new();
        for (name, &x) in readings {
            let channel = self.streams.entry(name.clone()).or_insert_with(|| {
                debug!(stream = %name, "new stream");
                Channel::new(cfg)
            });
            records.insert(name.clone(), channel.ingest(timestamp, x, cfg));
        }
        aggregate(records)
    }

    pub fn reconfigure(&mut self, cfg: &EngineConfig) {
        for channel in self.streams.values_mut() {
            channel.reconfigure(cfg);
        }
    }

    pub fn reset(&mut self) {
        self.streams.clear();
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

fn aggregate(records: BTreeMap<String, StreamRecord>) -> MultiRecord {
    let anomaly_sensors: Vec<String> = records
        .iter()
        .filter(|(_, r)| r.verdict.is_anomaly)
        .map(|(name, _)| name.clone())
        .collect();
    let severity = records
        .values()
        .map(|r| r.verdict.severity)
        .max()
        .unwrap_or(Severity::Normal);
    MultiRecord {
        any_anomaly: !anomaly_sensors.is_empty(),
        any_raw_anomaly: records.values().any(|r| r.raw_anomaly),
        all_warmup: records.values().all(|r| r.verdict.warmup),
        severity,
        anomaly_sensors,
        records,
    }
}

/// Result of one named bundle scored as a single vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub raw_anomaly: bool,
    pub verdict: Verdict,
    pub hysteresis: HysteresisInfo,
    pub buffer_size: usize,
}

/// A named bundle treated as one feature vector.
///
/// The feature order is the sorted name list of the first bundle seen; later
/// bundles must carry the same names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorChannel {
    pub features: Vec<String>,
    pub window: SlidingWindow<Vec<f64>>,
    pub pca: PcaDetector,
    pub hysteresis: Hysteresis,
}

impl VectorChannel {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            features: Vec::new(),
            window: SlidingWindow::new(cfg.window_size),
            pca: PcaDetector::default(),
            hysteresis: Hysteresis::default(),
        }
    }

    /// Orders a bundle by the channel's features without changing state.
    pub fn row_for(&self, readings: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
        if self.features.is_empty() {
            return Ok(readings.values().copied().collect());
        }
        if readings.len() != self.features.len() {
            return Err(self.mismatch(readings));
        }
        self.features
            .iter()
            .map(|f| readings.get(f).copied().ok_or_else(|| self.mismatch(readings)))
            .collect()
    }

    fn mismatch(&self, readings: &BTreeMap<String, f64>) -> EngineError {
        let got: Vec<&str> = readings.keys().map(String::as_str).collect();
        EngineError::InvalidInput(format!(
            "expected sensors [{}], got [{}]",
            self.features.join(", "),
            got.join(", ")
        ))
    }

    fn push(&mut self, timestamp: i64, readings: &BTreeMap<String, f64>, row: Vec<f64>, cfg: &EngineConfig) {
        if self.features.is_empty() {
            self.features = readings.keys().cloned().collect();
        }
        self.window.resize(cfg.window_size);
        self.window.push(timestamp, row);
    }

    pub fn ingest_pca(
        &mut self,
        timestamp: i64,
        readings: &BTreeMap<String, f64>,
        cfg: &EngineConfig,
    ) -> Result<VectorRecord> {
        let row = self.row_for(readings)?;
        // Only a training step can fault; keep what it would overwrite.
        let rollback = (!self.pca.is_trained()).then(|| (self.features.clone(), self.window.clone()));
        self.push(timestamp, readings, row.clone(), cfg);
        let rows = self.window.values();
        let raw = self
            .pca
            .ingest(&self.features, &rows, &row, cfg.warmup_samples(), &cfg.pca);
        if let Some(model) = &self.pca.model {
            if !model.is_finite() {
                self.pca.reset();
                if let Some((features, window)) = rollback {
                    self.features = features;
                    self.window = window;
                }
                return Err(EngineError::NumericFault(
                    "PCA training produced non-finite values".into(),
                ));
            }
        }
        Ok(self.finish(raw, cfg))
    }

    pub fn ingest_model(
        &mut self,
        timestamp: i64,
        readings: &BTreeMap<String, f64>,
        row: Vec<f64>,
        output: &[f64],
        cfg: &EngineConfig,
    ) -> VectorRecord {
        let raw = model::evaluate(&row, output, &cfg.model);
        self.push(timestamp, readings, row, cfg);
        self.finish(raw, cfg)
    }

    fn finish(&mut self, raw: Verdict, cfg: &EngineConfig) -> VectorRecord {
        let raw_anomaly = raw.is_anomaly;
        let (verdict, hysteresis) = self.hysteresis.apply(raw, &cfg.hysteresis);
        VectorRecord {
            raw_anomaly,
            verdict,
            hysteresis,
            buffer_size: self.window.len(),
        }
    }

    pub fn reconfigure(&mut self, cfg: &EngineConfig) {
        self.window.resize(cfg.window_size);
    }

    pub fn reset(&mut self) {
        self.features.clear();
        self.window.reset();
        self.pca.reset();
        self.hysteresis.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Method;

    fn cfg() -> EngineConfig {
        EngineConfig {
            window_size: 10,
            zscore_threshold: 2.0,
            zscore_warning: 1.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_streams_created_lazily() {
        let cfg = cfg();
        let mut multi = MultiStream::default();
        let mut bundle = BTreeMap::new();
        bundle.insert("a".to_string(), 1.0);
        multi.ingest(0, &bundle, &cfg);
        assert_eq!(multi.len(), 1);
        bundle.insert("b".to_string(), 2.0);
        let rec = multi.ingest(1, &bundle, &cfg);
        assert_eq!(multi.len(), 2);
        assert!(rec.records["b"].verdict.warmup);
        assert!(!rec.records["a"].verdict.warmup);
    }

    #[test]
    fn test_worst_severity_and_offenders() {
        let cfg = cfg();
        let mut multi = MultiStream::default();
        for i in 0..12 {
            let mut bundle = BTreeMap::new();
            bundle.insert("flat".to_string(), 5.0 + (i % 2) as f64 * 0.1);
            bundle.insert("spiky".to_string(), 1.0 + (i % 3) as f64 * 0.1);
            multi.ingest(i, &bundle, &cfg);
        }
        let mut bundle = BTreeMap::new();
        bundle.insert("flat".to_string(), 5.0);
        bundle.insert("spiky".to_string(), 50.0);
        let rec = multi.ingest(12, &bundle, &cfg);
        assert!(rec.any_anomaly);
        assert_eq!(rec.anomaly_sensors, vec!["spiky".to_string()]);
        assert_eq!(rec.severity, Severity::Critical);
        assert!(!rec.records["flat"].verdict.is_anomaly);
    }

    #[test]
    fn test_reconfigure_keeps_window_and_swaps_estimator() {
        let mut cfg = cfg();
        let mut ch = Channel::new(&cfg);
        for i in 0..10 {
            ch.ingest(i, i as f64, &cfg);
        }
        cfg.window_size = 4;
        cfg.method = Method::Cusum;
        ch.reconfigure(&cfg);
        assert_eq!(ch.window.values(), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(ch.estimator.method(), Method::Cusum);
    }

    #[test]
    fn test_vector_channel_rejects_changed_sensor_set() {
        let cfg = EngineConfig {
            method: Method::Pca,
            ..cfg()
        };
        let mut ch = VectorChannel::new(&cfg);
        let mut bundle = BTreeMap::new();
        bundle.insert("x".to_string(), 1.0);
        bundle.insert("y".to_string(), 2.0);
        ch.ingest_pca(0, &bundle, &cfg).unwrap();
        assert_eq!(ch.features, vec!["x".to_string(), "y".to_string()]);

        bundle.remove("y");
        bundle.insert("z".to_string(), 2.0);
        let err = ch.ingest_pca(1, &bundle, &cfg).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(ch.window.len(), 1);
    }

    #[test]
    fn test_overflowing_training_leaves_window_alone() {
        let cfg = EngineConfig {
            method: Method::Pca,
            ..cfg()
        };
        let need = cfg.warmup_samples();
        let mut ch = VectorChannel::new(&cfg);
        for t in 0..need - 1 {
            let bundle = BTreeMap::from([("x".to_string(), 1e308), ("y".to_string(), t as f64)]);
            assert!(ch.ingest_pca(t as i64, &bundle, &cfg).unwrap().verdict.warmup);
        }
        let before = ch.clone();

        let bundle = BTreeMap::from([("x".to_string(), 1e308), ("y".to_string(), 0.5)]);
        let err = ch.ingest_pca(need as i64, &bundle, &cfg).unwrap_err();
        assert!(matches!(err, EngineError::NumericFault(_)));
        assert_eq!(ch, before);
        assert_eq!(ch.window.len(), need - 1);
    }

    #[test]
    fn test_one_off_method_leaves_estimator_alone() {
        let cfg = EngineConfig {
            method: Method::Ema,
            ..cfg()
        };
        let mut ch = Channel::new(&cfg);
        for i in 0..8 {
            ch.ingest(i, 10.0 + (i % 2) as f64, &cfg);
        }
        let estimator = ch.estimator.clone();

        let other = EngineConfig {
            method: Method::Cusum,
            window_size: 4,
            ..cfg.clone()
        };
        let rec = ch.ingest(8, 10.0, &other);
        assert_eq!(rec.buffer_size, 4);
        assert_eq!(ch.estimator, estimator);

        let rec = ch.ingest(9, 11.0, &cfg);
        assert_eq!(rec.buffer_size, 5);
        assert_eq!(ch.estimator.method(), Method::Ema);
    }
}
