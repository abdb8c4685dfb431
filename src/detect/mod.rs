//! Anomaly estimators and the debounce state machine.

pub mod cusum;
pub mod ema;
pub mod hysteresis;
pub mod iqr;
pub mod model;
pub mod moving_average;
pub mod pca;
pub mod percentile;
pub mod threshold;
pub mod zscore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, Method};
use crate::window::SlidingWindow;

/// Severity attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn is_anomalous(&self) -> bool {
        *self != Severity::Normal
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Share of one feature in a multivariate anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    pub contribution: f64,
}

/// Classification of one sample.
///
/// `is_anomaly` always equals `severity != Normal`; the constructors are the
/// only way verdicts are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_anomaly: bool,
    pub severity: Severity,
    pub details: BTreeMap<String, f64>,
    pub status_text: String,
    pub warmup: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributions: Vec<Contribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_contributor: Option<String>,
}

impl Verdict {
    pub fn new(severity: Severity, details: BTreeMap<String, f64>, status_text: impl Into<String>) -> Self {
        let mut verdict = Self {
            is_anomaly: severity.is_anomalous(),
            severity,
            details,
            status_text: status_text.into(),
            warmup: false,
            contributions: Vec::new(),
            top_contributor: None,
        };
        verdict.sanitize();
        verdict
    }

    /// Pass-through verdict while the estimator is below its sample minimum.
    pub fn warmup(have: usize, need: usize) -> Self {
        Self {
            is_anomaly: false,
            severity: Severity::Normal,
            details: BTreeMap::new(),
            status_text: format!("warmup ({have}/{need})"),
            warmup: true,
            contributions: Vec::new(),
            top_contributor: None,
        }
    }

    /// Replaces non-finite details with zero. Returns true if any were found.
    ///
    /// A faulted verdict is never reported as normal: it is raised to at
    /// least `Warning`, and non-finite numbers are dropped from the status.
    pub fn sanitize(&mut self) -> bool {
        let mut faulted = false;
        for value in self.details.values_mut() {
            if !value.is_finite() {
                *value = 0.0;
                faulted = true;
            }
        }
        for c in &mut self.contributions {
            if !c.contribution.is_finite() {
                c.contribution = 0.0;
                faulted = true;
            }
        }
        if faulted {
            tracing::warn!(status = %self.status_text, "non-finite estimator output replaced with 0");
            let status = if mentions_non_finite(&self.status_text) {
                "non-finite values replaced with 0"
            } else {
                self.status_text.as_str()
            };
            self.status_text = format!("numeric fault; {status}");
            if self.severity == Severity::Normal {
                self.severity = Severity::Warning;
                self.is_anomaly = true;
            }
        }
        faulted
    }

    /// Downgrades the verdict to the given severity, keeping the details.
    pub(crate) fn with_severity(mut self, severity: Severity, status_text: String) -> Self {
        self.severity = severity;
        self.is_anomaly = severity.is_anomalous();
        self.status_text = status_text;
        self
    }
}

/// True if `text` carries a formatted NaN or infinity.
fn mentions_non_finite(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "NaN" || word == "inf")
}

/// Severity from a score compared against critical and warning limits.
pub(crate) fn grade(score: f64, critical: f64, warning: f64) -> Severity {
    if score > critical {
        Severity::Critical
    } else if score > warning {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

/// Builds a detail map from `(key, value)` pairs.
pub(crate) fn details<const N: usize>(pairs: [(&str, f64); N]) -> BTreeMap<String, f64> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Univariate estimator and its private state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    ZScore,
    Iqr,
    Threshold,
    Percentile,
    Ema(ema::EmaState),
    Cusum(cusum::CusumState),
    MovingAverage,
}

impl Estimator {
    /// Fresh estimator for a method. The model method scores scalars with
    /// Z-score when no runtime is attached.
    pub fn for_method(method: Method) -> Self {
        match method {
            Method::ZScore | Method::Model | Method::Pca => Estimator::ZScore,
            Method::Iqr => Estimator::Iqr,
            Method::Threshold => Estimator::Threshold,
            Method::Percentile => Estimator::Percentile,
            Method::Ema => Estimator::Ema(ema::EmaState::default()),
            Method::Cusum => Estimator::Cusum(cusum::CusumState::default()),
            Method::MovingAverage => Estimator::MovingAverage,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Estimator::ZScore => Method::ZScore,
            Estimator::Iqr => Method::Iqr,
            Estimator::Threshold => Method::Threshold,
            Estimator::Percentile => Method::Percentile,
            Estimator::Ema(_) => Method::Ema,
            Estimator::Cusum(_) => Method::Cusum,
            Estimator::MovingAverage => Method::MovingAverage,
        }
    }

    pub fn min_samples(&self) -> usize {
        match self {
            Estimator::Iqr => 4,
            _ => 2,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::for_method(self.method());
    }

    /// Scores `x`, which the caller has already pushed into `window`.
    pub fn ingest(&mut self, window: &SlidingWindow<f64>, x: f64, cfg: &EngineConfig) -> Verdict {
        let values = window.values();
        let need = self.min_samples();

        // EMA state follows every sample, warm or not.
        if let Estimator::Ema(state) = self {
            state.update(x, cfg.ema_alpha);
        }
        if values.len() < need {
            return Verdict::warmup(values.len(), need);
        }

        match self {
            Estimator::ZScore => zscore::evaluate(&values, x, cfg),
            Estimator::Iqr => iqr::evaluate(&values, x, cfg),
            Estimator::Threshold => threshold::evaluate(x, cfg),
            Estimator::Percentile => percentile::evaluate(&values, x, cfg),
            Estimator::Ema(state) => ema::evaluate(state, &values, x, cfg),
            Estimator::Cusum(state) => cusum::evaluate(state, &values, x, cfg),
            Estimator::MovingAverage => moving_average::evaluate(&values, x, cfg),
        }
    }
}
