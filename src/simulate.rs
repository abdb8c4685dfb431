//! Synthetic sensor telemetry for demos and pipelines.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

/// Baseline and noise level of a simulated sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorProfile {
    pub name: String,
    pub baseline: f64,
    pub noise: f64,
}

impl SensorProfile {
    /// Plausible defaults for common sensor names; anything else sits at
    /// 50 ± 1.
    pub fn for_name(name: &str) -> Self {
        let (baseline, noise) = match name {
            "temperature" | "temp" => (65.0, 0.5),
            "pressure" => (4.5, 0.1),
            "vibration" => (0.5, 0.05),
            "flow" => (120.0, 2.0),
            "current" => (15.0, 0.3),
            "humidity" => (45.0, 1.0),
            _ => (50.0, 1.0),
        };
        Self {
            name: name.to_string(),
            baseline,
            noise,
        }
    }
}

/// Standard normal draw (Box-Muller).
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Seeded generator of NDJSON-ready samples.
pub struct Simulator {
    rng: StdRng,
    sensors: Vec<SensorProfile>,
    anomaly_ratio: f64,
    timestamp: i64,
    interval_ms: i64,
}

impl Simulator {
    pub fn new(sensors: &[String], anomaly_ratio: f64, seed: u64, start_ms: i64, interval_ms: i64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            sensors: sensors.iter().map(|s| SensorProfile::for_name(s)).collect(),
            anomaly_ratio: anomaly_ratio.clamp(0.0, 1.0),
            timestamp: start_ms,
            interval_ms: interval_ms.max(1),
        }
    }

    /// Next sample as `{"timestamp": .., "payload": {name: value, ..}}`.
    /// With probability `anomaly_ratio` one sensor gets a 6–10σ spike and
    /// the sample carries `"label": "injected"`.
    pub fn next_sample(&mut self) -> Value {
        let spiked = if !self.sensors.is_empty() && self.rng.gen_bool(self.anomaly_ratio) {
            Some(self.rng.gen_range(0..self.sensors.len()))
        } else {
            None
        };

        let mut payload = Map::new();
        for (i, sensor) in self.sensors.iter().enumerate() {
            let mut value = sensor.baseline + gaussian(&mut self.rng) * sensor.noise;
            if spiked == Some(i) {
                let sigma = self.rng.gen_range(6.0..10.0);
                let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
                value += sign * sigma * sensor.noise;
            }
            payload.insert(sensor.name.clone(), json!(value));
        }

        let mut sample = json!({
            "timestamp": self.timestamp,
            "payload": payload,
        });
        if spiked.is_some() {
            sample["label"] = json!("injected");
        }
        self.timestamp += self.interval_ms;
        sample
    }
}

impl Iterator for Simulator {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        Some(self.next_sample())
    }
}
