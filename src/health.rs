//! Health index: per-stream scores folded into one reliability-weighted figure.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::analysis::stats::{self, Trend};
use crate::config::{Aggregation, HealthConfig};

/// Recent values kept per stream for the noise estimate.
pub const RELIABILITY_CAPACITY: usize = 50;
/// Indices remembered for the health trend.
const HISTORY_CAPACITY: usize = 10;
/// Index movement (points) that counts as a trend.
const TREND_BAND: f64 = 5.0;

/// Per-stream track record used to down-weight noisy or flapping sensors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliabilityTracker {
    pub values: VecDeque<f64>,
    pub anomaly_count: u64,
    pub total_count: u64,
}

impl ReliabilityTracker {
    pub fn record(&mut self, value: f64, is_anomaly: bool) {
        if self.values.len() >= RELIABILITY_CAPACITY {
            self.values.pop_front();
        }
        self.values.push_back(value);
        self.total_count += 1;
        if is_anomaly {
            self.anomaly_count += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn anomaly_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.anomaly_count as f64 / self.total_count as f64
    }

    pub fn coefficient_of_variation(&self) -> f64 {
        let values: Vec<f64> = self.values.iter().copied().collect();
        stats::coefficient_of_variation(&values)
    }

    /// Multiplier in `[0.1, 1.0]` for the stream's configured weight.
    pub fn reliability_factor(&self, confidence: Option<f64>) -> f64 {
        let mut factor = 1.0;

        let rate = self.anomaly_rate();
        if rate > 0.3 {
            factor -= rate - 0.3;
        }

        let cv = self.coefficient_of_variation();
        if cv > 0.5 {
            factor *= (1.0 - (cv - 0.5)).max(0.5);
        }

        if let Some(c) = confidence {
            factor *= c.clamp(0.0, 1.0);
        }

        factor.clamp(0.1, 1.0)
    }
}

/// What the aggregator needs to know about one stream's latest sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInput {
    pub is_anomaly: bool,
    pub z_score: f64,
    pub deviation_pct: f64,
    pub trend: Trend,
    pub slope: f64,
    pub confidence: Option<f64>,
}

/// Score in `[0, 100]` for one stream, with the reasons for each deduction.
pub fn score_stream(name: &str, input: &HealthInput) -> (f64, Vec<String>) {
    let mut deduction = 0.0;
    let mut factors = Vec::new();

    if input.is_anomaly {
        deduction += 30.0;
        factors.push(format!("{name}: anomaly detected"));
    }

    let z = input.z_score.abs();
    if z > 3.0 {
        deduction += 40.0;
        factors.push(format!("{name}: extreme deviation (|z| = {z:.2})"));
    } else if z > 2.0 {
        deduction += 20.0;
        factors.push(format!("{name}: elevated deviation (|z| = {z:.2})"));
    }

    let pct = input.deviation_pct.abs();
    if pct > 30.0 {
        deduction += 30.0;
        factors.push(format!("{name}: {pct:.1}% from baseline"));
    } else if pct > 15.0 {
        deduction += 15.0;
        factors.push(format!("{name}: {pct:.1}% from baseline"));
    }

    if input.trend == Trend::Increasing && input.slope > 0.0 {
        deduction += 10.0;
        factors.push(format!("{name}: rising trend"));
    }

    if let Some(conf) = input.confidence {
        if conf < 0.5 {
            deduction -= deduction * (1.0 - conf / 0.5) * 0.5;
        }
    }

    ((100.0 - deduction).clamp(0.0, 100.0), factors)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Attention,
    Warning,
    Degraded,
    Critical,
}

impl HealthStatus {
    /// Bands on the 0–100 scale.
    pub fn from_index(index: f64) -> Self {
        if index < 20.0 {
            HealthStatus::Critical
        } else if index < 40.0 {
            HealthStatus::Degraded
        } else if index < 60.0 {
            HealthStatus::Warning
        } else if index < 80.0 {
            HealthStatus::Attention
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTrend {
    Improving,
    Degrading,
    Stable,
}

/// Aggregated health output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub index: f64,
    pub status: HealthStatus,
    pub aggregation: Aggregation,
    pub sensor_scores: BTreeMap<String, f64>,
    pub worst_sensor: Option<String>,
    pub contributing_factors: Vec<String>,
    pub health_trend: HealthTrend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_weights: Option<BTreeMap<String, f64>>,
}

/// One stream's contribution to an aggregation round.
#[derive(Debug, Clone)]
pub struct StreamHealth<'a> {
    pub name: &'a str,
    pub input: HealthInput,
    pub reliability_factor: f64,
}

/// Folds stream scores into an index and remembers recent indices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthAggregator {
    history: VecDeque<f64>,
}

impl HealthAggregator {
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn aggregate(&mut self, streams: &[StreamHealth<'_>], cfg: &HealthConfig) -> HealthReport {
        let mut scores = BTreeMap::new();
        let mut factors = Vec::new();
        for s in streams {
            let (score, reasons) = score_stream(s.name, &s.input);
            scores.insert(s.name.to_string(), score);
            factors.extend(reasons);
        }

        let weight = |name: &str| cfg.sensor_weights.get(name).copied().unwrap_or(1.0);
        let mut dynamic_weights = None;

        let index = match cfg.aggregation {
            Aggregation::Weighted => weighted(&scores, |name| weight(name)),
            Aggregation::Dynamic => {
                let effective: BTreeMap<String, f64> = streams
                    .iter()
                    .map(|s| (s.name.to_string(), weight(s.name) * s.reliability_factor))
                    .collect();
                let index = weighted(&scores, |name| effective.get(name).copied().unwrap_or(0.0));
                dynamic_weights = Some(effective);
                index
            }
            Aggregation::Minimum => scores.values().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Average => {
                let values: Vec<f64> = scores.values().copied().collect();
                stats::mean(&values)
            }
            Aggregation::Geometric => {
                if scores.values().any(|s| *s <= 0.0) {
                    0.0
                } else {
                    let log_mean = scores.values().map(|s| s.ln()).sum::<f64>() / scores.len() as f64;
                    log_mean.exp()
                }
            }
        };
        let index = if index.is_finite() { index.clamp(0.0, 100.0) } else { 100.0 };

        let worst_sensor = scores
            .iter()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.clone());

        let health_trend = self.trend(index);
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(index);

        HealthReport {
            index: cfg.scale.apply(index),
            status: HealthStatus::from_index(index),
            aggregation: cfg.aggregation,
            sensor_scores: scores
                .into_iter()
                .map(|(k, v)| (k, cfg.scale.apply(v)))
                .collect(),
            worst_sensor,
            contributing_factors: factors,
            health_trend,
            dynamic_weights,
        }
    }

    fn trend(&self, index: f64) -> HealthTrend {
        if self.history.is_empty() {
            return HealthTrend::Stable;
        }
        let previous: Vec<f64> = self.history.iter().copied().collect();
        let diff = index - stats::mean(&previous);
        if diff > TREND_BAND {
            HealthTrend::Improving
        } else if diff < -TREND_BAND {
            HealthTrend::Degrading
        } else {
            HealthTrend::Stable
        }
    }
}

fn weighted(scores: &BTreeMap<String, f64>, weight: impl Fn(&str) -> f64) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    for (name, score) in scores {
        let w = weight(name);
        num += w * score;
        den += w;
    }
    if den > 0.0 {
        num / den
    } else {
        stats::mean(&scores.values().copied().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthScale;

    fn calm() -> HealthInput {
        HealthInput {
            is_anomaly: false,
            z_score: 0.3,
            deviation_pct: 1.0,
            trend: Trend::Stable,
            slope: 0.0,
            confidence: None,
        }
    }

    fn bad() -> HealthInput {
        HealthInput {
            is_anomaly: true,
            z_score: 3.5,
            deviation_pct: 20.0,
            trend: Trend::Increasing,
            slope: 0.4,
            confidence: None,
        }
    }

    #[test]
    fn test_score_deductions() {
        assert_eq!(score_stream("a", &calm()).0, 100.0);
        // 30 + 40 + 15 + 10
        let (score, factors) = score_stream("a", &bad());
        assert_eq!(score, 5.0);
        assert_eq!(factors.len(), 4);
    }

    #[test]
    fn test_low_confidence_refunds_part_of_deduction() {
        let mut input = bad();
        input.confidence = Some(0.25);
        // 95 * (1 - 0.5) * 0.5 = 23.75 refunded
        assert_eq!(score_stream("a", &input).0, 28.75);
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(HealthStatus::from_index(19.9), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_index(20.0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_index(40.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_index(60.0), HealthStatus::Attention);
        assert_eq!(HealthStatus::from_index(80.0), HealthStatus::Healthy);
    }

    #[test]
    fn test_reliability_factor_bounds() {
        let mut t = ReliabilityTracker::default();
        for i in 0..100 {
            t.record(if i % 2 == 0 { 1.0 } else { 100.0 }, true);
        }
        assert_eq!(t.values.len(), RELIABILITY_CAPACITY);
        let f = t.reliability_factor(Some(0.2));
        assert!((0.1..=1.0).contains(&f));
        assert_eq!(f, 0.1);

        let mut steady = ReliabilityTracker::default();
        for _ in 0..10 {
            steady.record(10.0, false);
        }
        assert_eq!(steady.reliability_factor(None), 1.0);
    }

    #[test]
    fn test_aggregations() {
        let streams = vec![
            StreamHealth { name: "a", input: calm(), reliability_factor: 1.0 },
            StreamHealth { name: "b", input: bad(), reliability_factor: 0.5 },
        ];
        let mut agg = HealthAggregator::default();

        let mut cfg = HealthConfig::default();
        cfg.sensor_weights.insert("a".into(), 3.0);
        let r = agg.aggregate(&streams, &cfg);
        assert!((r.index - (300.0 + 5.0) / 4.0).abs() < 1e-9);
        assert_eq!(r.worst_sensor.as_deref(), Some("b"));
        assert!(r.dynamic_weights.is_none());

        cfg.aggregation = Aggregation::Minimum;
        assert_eq!(agg.aggregate(&streams, &cfg).index, 5.0);

        cfg.aggregation = Aggregation::Average;
        assert_eq!(agg.aggregate(&streams, &cfg).index, 52.5);

        cfg.aggregation = Aggregation::Geometric;
        assert!((agg.aggregate(&streams, &cfg).index - 500.0_f64.sqrt()).abs() < 1e-9);

        cfg.aggregation = Aggregation::Dynamic;
        let r = agg.aggregate(&streams, &cfg);
        let weights = r.dynamic_weights.unwrap();
        assert_eq!(weights["a"], 3.0);
        assert_eq!(weights["b"], 0.5);
        assert!((r.index - (300.0 + 2.5) / 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_unit_scale_and_trend() {
        let cfg = HealthConfig {
            scale: HealthScale::Unit,
            ..Default::default()
        };
        let mut agg = HealthAggregator::default();
        let good = vec![StreamHealth { name: "a", input: calm(), reliability_factor: 1.0 }];
        let r = agg.aggregate(&good, &cfg);
        assert_eq!(r.index, 1.0);
        assert_eq!(r.sensor_scores["a"], 1.0);
        assert_eq!(r.health_trend, HealthTrend::Stable);

        let worse = vec![StreamHealth { name: "a", input: bad(), reliability_factor: 1.0 }];
        let r = agg.aggregate(&worse, &cfg);
        assert_eq!(r.health_trend, HealthTrend::Degrading);
        assert_eq!(r.status, HealthStatus::Critical);
    }
}
