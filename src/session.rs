//! Detector session: routes samples, owns all per-stream state, builds
//! output records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConfigOverrides, EngineConfig, Method};
use crate::detect::hysteresis::HysteresisInfo;
use crate::detect::Severity;
use crate::error::{EngineError, Result};
use crate::health::{HealthAggregator, HealthReport};
use crate::output::{Output, Payload, StreamOutput};
use crate::runtime::{ModelRuntime, RuntimeError};
use crate::sample::{Reading, Sample};
use crate::state::{Snapshot, STATE_VERSION};
use crate::stream::{Channel, MultiRecord, MultiStream, StreamRecord, VectorChannel, VectorRecord};

/// Stream name used for scalar input in health reports.
const SCALAR_STREAM: &str = "value";

/// Everything a session learns from its samples.
#[derive(Debug, Clone, Default)]
struct Detectors {
    scalar: Option<Channel>,
    vector: Option<VectorChannel>,
    streams: MultiStream,
    health: HealthAggregator,
}

/// One detector instance. Calls are expected to be serial.
pub struct Session {
    config: EngineConfig,
    state: Detectors,
    runtime: Option<Arc<dyn ModelRuntime>>,
    fallback_logged: bool,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(method = %config.method, window = config.window_size, "detector session created");
        Ok(Self {
            config,
            state: Detectors::default(),
            runtime: None,
            fallback_logged: false,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Makes a model runtime available to the `ml` method.
    pub fn attach_runtime(&mut self, runtime: Arc<dyn ModelRuntime>) {
        self.runtime = Some(runtime);
    }

    pub fn runtime(&self) -> Option<&Arc<dyn ModelRuntime>> {
        self.runtime.as_ref()
    }

    /// Scores one sample with the statistical estimators.
    ///
    /// A sample's `config` overrides apply to that sample only. Returns
    /// `Ok(None)` for control-only samples (a bare reset, or overrides with
    /// no reading). A bad override is rejected before anything changes.
    pub fn ingest(&mut self, sample: &Sample) -> Result<Option<Output>> {
        let one_shot = self.one_shot_config(sample)?;
        self.score(sample, one_shot.as_ref())
    }

    /// Like [`Session::ingest`], but delegates to the attached model runtime
    /// when the method is `ml` and the runtime is healthy.
    ///
    /// The sample's reset flag is applied only once the model has answered.
    /// A failed model call is logged and the sample passes through as a
    /// normal record with a `model error` status; no detector state changes.
    pub async fn ingest_async(&mut self, sample: &Sample) -> Result<Option<Output>> {
        let one_shot = self.one_shot_config(sample)?;
        let method = one_shot.as_ref().unwrap_or(&self.config).method;
        let runtime = self
            .runtime
            .as_ref()
            .filter(|rt| method == Method::Model && rt.is_healthy())
            .cloned();
        let (Some(runtime), Some(reading)) = (runtime, &sample.reading) else {
            return self.score(sample, one_shot.as_ref());
        };

        // After a reset the bundle is ordered as a first one.
        let row = match (reading, &self.state.vector) {
            (Reading::Scalar(x), _) => vec![*x],
            (Reading::Named(map), Some(vector)) if !sample.reset => vector.row_for(map)?,
            (Reading::Named(map), _) => map.values().copied().collect(),
        };
        let cfg = one_shot.as_ref().unwrap_or(&self.config);
        let model_id = &cfg.model.model_id;
        let output = match runtime.predict(model_id, &row).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, %model_id, "model prediction failed; passing sample through");
                return Ok(Some(self.state.passed_through(sample, reading, &e, cfg)));
            }
        };

        if sample.reset {
            self.state.reset();
        }
        Ok(Some(self.state.route_model(sample, reading, row, &output, cfg)))
    }

    /// Validates the sample's overrides against the session configuration.
    /// `None` means the session configuration applies unchanged.
    fn one_shot_config(&self, sample: &Sample) -> Result<Option<EngineConfig>> {
        match &sample.config {
            Some(overrides) if !overrides.is_empty() => {
                let cfg = overrides.apply(&self.config)?;
                debug!(method = %cfg.method, window = cfg.window_size, "per-sample overrides");
                Ok(Some(cfg))
            }
            _ => Ok(None),
        }
    }

    fn score(&mut self, sample: &Sample, one_shot: Option<&EngineConfig>) -> Result<Option<Output>> {
        if sample.reset {
            self.state.reset();
        }
        let Some(reading) = &sample.reading else {
            return Ok(None);
        };
        let cfg = one_shot.unwrap_or(&self.config);
        if cfg.method == Method::Model && !self.fallback_logged {
            warn!("no healthy model runtime; scoring with z-score");
            self.fallback_logged = true;
        }
        self.state.route(sample, reading, cfg).map(Some)
    }

    /// Clears every window, estimator state, debounce state and reliability
    /// tracker. The configuration is kept.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Merges overrides into the session configuration for all later
    /// samples. The new configuration is validated before anything changes.
    pub fn update_config(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        let next = overrides.apply(&self.config)?;
        if next == self.config {
            return Ok(());
        }
        if next.method != self.config.method {
            info!(from = %self.config.method, to = %next.method, "detection method changed");
        }
        if next.window_size != self.config.window_size {
            info!(from = self.config.window_size, to = next.window_size, "window size changed");
        }
        self.config = next;
        self.state.reconfigure(&self.config);
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: STATE_VERSION,
            config: self.config.clone(),
            scalar: self.state.scalar.clone(),
            vector: self.state.vector.clone(),
            streams: self.state.streams.clone(),
            health: self.state.health.clone(),
        }
    }

    pub fn save_state(&self) -> Result<Vec<u8>> {
        self.snapshot().to_bytes()
    }

    /// Replaces all state with a saved snapshot. A corrupt snapshot leaves
    /// the session empty and returns `StateFault`.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<()> {
        match Snapshot::from_bytes(bytes) {
            Ok(snapshot) => {
                self.config = snapshot.config;
                self.state = Detectors {
                    scalar: snapshot.scalar,
                    vector: snapshot.vector,
                    streams: snapshot.streams,
                    health: snapshot.health,
                };
                info!(streams = self.state.streams.len(), "detector state restored");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "discarding persisted state");
                self.reset();
                Err(e)
            }
        }
    }

    /// Shuts the model runtime down, if one is attached.
    pub async fn close(&mut self, grace: Duration) -> Result<()> {
        if let Some(runtime) = self.runtime.take() {
            runtime.close(grace).await?;
        }
        Ok(())
    }
}

impl Detectors {
    fn route(&mut self, sample: &Sample, reading: &Reading, cfg: &EngineConfig) -> Result<Output> {
        match reading {
            Reading::Scalar(x) => {
                if cfg.method == Method::Pca {
                    return Err(EngineError::InvalidInput(
                        "the pca method needs a multi-sensor payload".into(),
                    ));
                }
                let channel = self.scalar.get_or_insert_with(|| Channel::new(cfg));
                let record = channel.ingest(sample.timestamp, *x, cfg);
                debug!(value = x, severity = record.verdict.severity.as_str(), "scalar sample scored");
                Ok(self.scalar_output(sample, record, cfg))
            }
            Reading::Named(map) if cfg.method == Method::Pca => {
                let vector = self.vector.get_or_insert_with(|| VectorChannel::new(cfg));
                let record = vector.ingest_pca(sample.timestamp, map, cfg)?;
                debug!(sensors = map.len(), severity = record.verdict.severity.as_str(), "vector sample scored");
                Ok(vector_output(sample, map, record, cfg))
            }
            Reading::Named(map) => {
                let record = self.streams.ingest(sample.timestamp, map, cfg);
                debug!(
                    sensors = map.len(),
                    anomalies = record.anomaly_sensors.len(),
                    "multi-sensor sample scored"
                );
                Ok(self.multi_output(sample, record, cfg))
            }
        }
    }

    fn route_model(
        &mut self,
        sample: &Sample,
        reading: &Reading,
        row: Vec<f64>,
        output: &[f64],
        cfg: &EngineConfig,
    ) -> Output {
        match reading {
            Reading::Scalar(x) => {
                let channel = self.scalar.get_or_insert_with(|| Channel::new(cfg));
                let record = channel.ingest_model(sample.timestamp, *x, output, cfg);
                self.scalar_output(sample, record, cfg)
            }
            Reading::Named(map) => {
                let vector = self.vector.get_or_insert_with(|| VectorChannel::new(cfg));
                let record = vector.ingest_model(sample.timestamp, map, row, output, cfg);
                vector_output(sample, map, record, cfg)
            }
        }
    }

    /// A normal record for a sample the model could not score.
    fn passed_through(
        &self,
        sample: &Sample,
        reading: &Reading,
        error: &RuntimeError,
        cfg: &EngineConfig,
    ) -> Output {
        let (payload, buffer_size, sensor_count) = match reading {
            Reading::Scalar(x) => (
                Payload::Scalar(*x),
                self.scalar.as_ref().map_or(0, |c| c.window.len()),
                None,
            ),
            Reading::Named(map) => (
                Payload::Vector(map.clone()),
                self.vector.as_ref().map_or(0, |v| v.window.len()),
                Some(map.len()),
            ),
        };
        Output {
            payload,
            is_anomaly: false,
            raw_anomaly: false,
            severity: Severity::Normal,
            method: cfg.method,
            buffer_size,
            window_size: cfg.window_size,
            timestamp: sample.timestamp,
            warmup: false,
            status_text: format!("model error: {error}"),
            details: BTreeMap::new(),
            contributions: Vec::new(),
            top_contributor: None,
            hysteresis: HysteresisInfo {
                enabled: cfg.hysteresis.enabled,
                ..Default::default()
            },
            anomaly_sensors: sensor_count.map(|_| Vec::new()),
            sensor_count,
            input_format: sensor_count.map(|_| "multi-sensor"),
            prediction: None,
            rul: None,
            health: None,
            label: sample.label.clone(),
            label_severity: sample.severity.clone(),
        }
    }

    fn scalar_output(&mut self, sample: &Sample, record: StreamRecord, cfg: &EngineConfig) -> Output {
        let health = match &self.scalar {
            Some(channel) if cfg.health.enabled => {
                let entry = channel.stream_health(SCALAR_STREAM, &record, cfg);
                Some(self.health.aggregate(&[entry], &cfg.health))
            }
            _ => None,
        };

        Output {
            payload: Payload::Scalar(record.value),
            is_anomaly: record.verdict.is_anomaly,
            raw_anomaly: record.raw_anomaly,
            severity: record.verdict.severity,
            method: cfg.method,
            buffer_size: record.buffer_size,
            window_size: cfg.window_size,
            timestamp: sample.timestamp,
            warmup: record.verdict.warmup,
            status_text: record.verdict.status_text,
            details: record.verdict.details,
            contributions: Vec::new(),
            top_contributor: None,
            hysteresis: record.hysteresis,
            anomaly_sensors: None,
            sensor_count: None,
            input_format: None,
            prediction: record.prediction,
            rul: record.rul,
            health,
            label: sample.label.clone(),
            label_severity: sample.severity.clone(),
        }
    }

    fn multi_output(&mut self, sample: &Sample, record: MultiRecord, cfg: &EngineConfig) -> Output {
        let health: Option<HealthReport> = if cfg.health.enabled {
            let entries: Vec<_> = record
                .records
                .iter()
                .filter_map(|(name, r)| {
                    self.streams
                        .streams
                        .get(name)
                        .map(|channel| channel.stream_health(name, r, cfg))
                })
                .collect();
            Some(self.health.aggregate(&entries, &cfg.health))
        } else {
            None
        };

        let hysteresis = HysteresisInfo {
            enabled: cfg.hysteresis.enabled,
            applied: record.records.values().any(|r| r.hysteresis.applied),
            consecutive_anomalies: record
                .records
                .values()
                .map(|r| r.hysteresis.consecutive_anomalies)
                .max()
                .unwrap_or(0),
            consecutive_normals: record
                .records
                .values()
                .map(|r| r.hysteresis.consecutive_normals)
                .min()
                .unwrap_or(0),
        };
        let buffer_size = record.records.values().map(|r| r.buffer_size).max().unwrap_or(0);
        let status_text = if record.any_anomaly {
            format!("Anomaly on {}", record.anomaly_sensors.join(", "))
        } else if record.all_warmup {
            "warmup".to_string()
        } else {
            "All sensors normal".to_string()
        };
        let sensor_count = record.records.len();
        let payload: BTreeMap<String, StreamOutput> = record
            .records
            .into_iter()
            .map(|(name, r)| (name, StreamOutput::from(r)))
            .collect();

        Output {
            payload: Payload::Streams(payload),
            is_anomaly: record.any_anomaly,
            raw_anomaly: record.any_raw_anomaly,
            severity: record.severity,
            method: cfg.method,
            buffer_size,
            window_size: cfg.window_size,
            timestamp: sample.timestamp,
            warmup: record.all_warmup,
            status_text,
            details: BTreeMap::new(),
            contributions: Vec::new(),
            top_contributor: None,
            hysteresis,
            anomaly_sensors: Some(record.anomaly_sensors),
            sensor_count: Some(sensor_count),
            input_format: Some("multi-sensor"),
            prediction: None,
            rul: None,
            health,
            label: sample.label.clone(),
            label_severity: sample.severity.clone(),
        }
    }

    fn reset(&mut self) {
        self.scalar = None;
        self.vector = None;
        self.streams.reset();
        self.health.reset();
        info!("detector state reset");
    }

    fn reconfigure(&mut self, cfg: &EngineConfig) {
        if let Some(channel) = &mut self.scalar {
            channel.reconfigure(cfg);
        }
        if let Some(vector) = &mut self.vector {
            vector.reconfigure(cfg);
        }
        self.streams.reconfigure(cfg);
    }
}

fn vector_output(
    sample: &Sample,
    map: &BTreeMap<String, f64>,
    record: VectorRecord,
    cfg: &EngineConfig,
) -> Output {
    let verdict = record.verdict;
    let anomaly_sensors = match (&verdict.top_contributor, verdict.is_anomaly) {
        (Some(top), true) => vec![top.clone()],
        _ => Vec::new(),
    };
    Output {
        payload: Payload::Vector(map.clone()),
        is_anomaly: verdict.is_anomaly,
        raw_anomaly: record.raw_anomaly,
        severity: verdict.severity,
        method: cfg.method,
        buffer_size: record.buffer_size,
        window_size: cfg.window_size,
        timestamp: sample.timestamp,
        warmup: verdict.warmup,
        status_text: verdict.status_text,
        details: verdict.details,
        contributions: verdict.contributions,
        top_contributor: verdict.top_contributor,
        hysteresis: record.hysteresis,
        anomaly_sensors: Some(anomaly_sensors),
        sensor_count: Some(map.len()),
        input_format: Some("multi-sensor"),
        prediction: None,
        rul: None,
        health: None,
        label: sample.label.clone(),
        label_severity: sample.severity.clone(),
    }
}
