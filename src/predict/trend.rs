//! Short-horizon forecast over the tail of a window.

use serde::Serialize;

use crate::analysis::stats::{self, Trend, HOLT_ALPHA, HOLT_BETA};
use crate::config::{ForecastMethod, TrendConfig};
use crate::window::SlidingWindow;

/// Trend side channel attached to an output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub method: ForecastMethod,
    /// Next `prediction_steps` values, one per sample interval.
    pub values: Vec<f64>,
    pub trend: Trend,
    /// Units per sample.
    pub slope: f64,
    pub steps_to_threshold: Option<usize>,
    pub time_to_threshold_ms: Option<f64>,
    /// Units per second between the last two samples.
    pub rate_of_change: Option<f64>,
    pub roc_alert: bool,
}

/// Forecasts from the last `cfg.lookback` values. Needs two samples.
pub fn forecast(window: &SlidingWindow<f64>, cfg: &TrendConfig) -> Option<Forecast> {
    let lookback = cfg.lookback.max(2);
    let values = window.last_n(lookback);
    if values.len() < 2 {
        return None;
    }
    let timestamps = window.timestamps();
    let tail = &timestamps[timestamps.len().saturating_sub(values.len())..];
    let steps = cfg.prediction_steps.max(1);
    let last = (values.len() - 1) as f64;

    let (predicted, slope): (Vec<f64>, f64) = match cfg.method {
        ForecastMethod::Linear => {
            let reg = stats::linear_regression(&values);
            let predicted = (1..=steps).map(|k| reg.predict(last + k as f64)).collect();
            (predicted, reg.slope)
        }
        ForecastMethod::Exponential => {
            let holt = stats::holt(&values, HOLT_ALPHA, HOLT_BETA)?;
            let predicted = (1..=steps).map(|k| holt.forecast(k)).collect();
            (predicted, holt.trend)
        }
    };

    let steps_to_threshold = cfg
        .threshold
        .and_then(|thr| steps_to_threshold(&predicted, thr));
    let interval = stats::mean_interval(tail);
    let time_to_threshold_ms = steps_to_threshold.map(|k| k as f64 * interval);

    let rate_of_change = rate_of_change(tail, &values);
    let roc_alert = match (rate_of_change, cfg.roc_threshold) {
        (Some(roc), Some(limit)) => roc.abs() > limit,
        _ => false,
    };

    Some(Forecast {
        method: cfg.method,
        values: predicted,
        trend: Trend::from_slope(slope),
        slope,
        steps_to_threshold,
        time_to_threshold_ms,
        rate_of_change,
        roc_alert,
    })
}

/// Smallest `k ≥ 1` with `predicted[k-1] ≥ threshold`.
pub fn steps_to_threshold(predicted: &[f64], threshold: f64) -> Option<usize> {
    predicted.iter().position(|&v| v >= threshold).map(|i| i + 1)
}

fn rate_of_change(timestamps: &[i64], values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 || timestamps.len() < 2 {
        return None;
    }
    let dt_ms = timestamps[timestamps.len() - 1] - timestamps[timestamps.len() - 2];
    if dt_ms <= 0 {
        return None;
    }
    Some((values[n - 1] - values[n - 2]) / (dt_ms as f64 / 1000.0))
}
