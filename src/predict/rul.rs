//! Remaining-useful-life estimation against a failure threshold.

use serde::Serialize;

use crate::analysis::stats::{self, Regression, Trend};
use crate::config::{DegradationModel, RulConfig, RulUnit};
use crate::window::SlidingWindow;

use super::weibull::{Weibull, WeibullEstimate, FAILURE_RELIABILITY};

/// Samples needed before any estimate is made.
pub const MIN_SAMPLES: usize = 5;
/// Two-sided 95% normal quantile for the prediction interval.
const Z_95: f64 = 1.96;
/// Interval assumed when every timestamp in the window is equal.
const FALLBACK_INTERVAL_MS: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RulStatus {
    Healthy,
    Warning,
    Critical,
    Failed,
    Stable,
}

impl RulStatus {
    /// Status from the remaining life expressed in sample intervals.
    pub fn from_steps(steps: f64) -> Self {
        if steps < 10.0 {
            RulStatus::Critical
        } else if steps < 50.0 {
            RulStatus::Warning
        } else {
            RulStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Degradation {
    /// Progress from the oldest window value towards the threshold, 0–100.
    pub percent: f64,
    /// Regression slope in units per sample.
    pub rate: f64,
    pub trend: Trend,
}

/// RUL side channel. `value` is `None` (serialized as null) when the
/// signal is not heading towards the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulEstimate {
    pub value: Option<f64>,
    pub unit: RulUnit,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub confidence: f64,
    pub status: RulStatus,
    pub model: DegradationModel,
    pub degradation: Degradation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weibull: Option<WeibullEstimate>,
}

/// Estimates RUL over the whole window. `None` below [`MIN_SAMPLES`] or
/// without a failure threshold.
pub fn estimate(window: &SlidingWindow<f64>, cfg: &RulConfig) -> Option<RulEstimate> {
    let threshold = cfg.failure_threshold?;
    let values = window.values();
    if values.len() < MIN_SAMPLES {
        return None;
    }
    let current = *values.last()?;
    let baseline = values[0];

    let interval = stats::mean_interval(&window.timestamps());
    let interval = if interval > 0.0 { interval } else { FALLBACK_INTERVAL_MS };

    let reg = stats::linear_regression(&values);
    let degradation = Degradation {
        percent: progress(baseline, current, threshold) * 100.0,
        rate: reg.slope,
        trend: reg.trend(),
    };

    let mut out = RulEstimate {
        value: None,
        unit: cfg.unit,
        lower: None,
        upper: None,
        confidence: reg.r_squared,
        status: RulStatus::Stable,
        model: cfg.degradation_model,
        degradation,
        weibull: None,
    };

    if current >= threshold {
        out.value = Some(0.0);
        out.lower = Some(0.0);
        out.upper = Some(0.0);
        out.status = RulStatus::Failed;
        return Some(out);
    }
    if reg.slope <= 0.0 {
        return Some(out);
    }

    let to_unit = |steps: f64| cfg.unit.from_millis(steps * interval, steps);

    if cfg.degradation_model == DegradationModel::Weibull {
        let elapsed_steps = (values.len() - 1) as f64;
        let elapsed = to_unit(elapsed_steps);
        let fraction = progress(baseline, current, threshold);
        if let Some(model) = Weibull::from_degradation(&values, fraction, elapsed) {
            if let Some(fail_at) = model.time_to_reliability(FAILURE_RELIABILITY) {
                let remaining = (fail_at - elapsed).max(0.0);
                // Linear interval and confidence still describe the trace.
                let (lower, upper) = linear_interval(&reg, threshold - current);
                out.value = Some(remaining);
                out.lower = Some(to_unit(lower).min(remaining));
                out.upper = Some(to_unit(upper).max(remaining));
                out.status = RulStatus::from_steps(remaining_steps(remaining, elapsed, elapsed_steps));
                out.weibull = Some(WeibullEstimate::at(&model, elapsed));
                return Some(out);
            }
        }
    }

    if cfg.degradation_model == DegradationModel::Exponential {
        if let Some((steps, lower, upper, r2)) = exponential_steps(&values, current, threshold) {
            out.value = Some(to_unit(steps));
            out.lower = Some(to_unit(lower));
            out.upper = Some(to_unit(upper));
            out.confidence = r2;
            out.status = RulStatus::from_steps(steps);
            return Some(out);
        }
    }

    let steps = (threshold - current) / reg.slope;
    let (lower, upper) = linear_interval(&reg, threshold - current);
    out.value = Some(to_unit(steps));
    out.lower = Some(to_unit(lower));
    out.upper = Some(to_unit(upper));
    out.status = RulStatus::from_steps(steps);
    Some(out)
}

/// Fraction of the way from `baseline` to `threshold`, clamped to `[0, 1]`.
fn progress(baseline: f64, current: f64, threshold: f64) -> f64 {
    let span = threshold - baseline;
    if span <= 0.0 {
        return 1.0;
    }
    ((current - baseline) / span).clamp(0.0, 1.0)
}

/// Steps-to-failure band from the residual standard error.
fn linear_interval(reg: &Regression, gap: f64) -> (f64, f64) {
    let margin = Z_95 * reg.std_error;
    let lower = ((gap - margin) / reg.slope).max(0.0);
    let upper = (gap + margin) / reg.slope;
    (lower, upper)
}

/// Converts remaining time back to sample intervals via the elapsed ratio.
fn remaining_steps(remaining: f64, elapsed: f64, elapsed_steps: f64) -> f64 {
    if elapsed > 0.0 {
        remaining * elapsed_steps / elapsed
    } else {
        remaining
    }
}

/// Log-linear fit; `None` when a value is non-positive or the growth rate
/// is not positive.
fn exponential_steps(values: &[f64], current: f64, threshold: f64) -> Option<(f64, f64, f64, f64)> {
    if threshold <= 0.0 || values.iter().any(|&v| v <= 0.0) {
        return None;
    }
    let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
    let reg = stats::linear_regression(&logs);
    if reg.slope <= 0.0 {
        return None;
    }
    let (lower, upper) = linear_interval(&reg, threshold.ln() - current.ln());
    let steps = (threshold.ln() - current.ln()) / reg.slope;
    Some((steps, lower, upper, reg.r_squared))
}
