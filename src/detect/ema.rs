//! Exponential moving average deviation detector.

use serde::{Deserialize, Serialize};

use crate::analysis::stats;
use crate::config::{DeviationMode, EngineConfig};

use super::{details, grade, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaState {
    pub ema: f64,
    pub initialized: bool,
}

impl EmaState {
    /// `ema ← α·x + (1−α)·ema`, seeded with the first sample.
    pub fn update(&mut self, x: f64, alpha: f64) {
        if self.initialized {
            self.ema = alpha * x + (1.0 - alpha) * self.ema;
        } else {
            self.ema = x;
            self.initialized = true;
        }
    }
}

/// Scores the deviation of `x` from a reference level, shared with the
/// moving-average detector. Zero σ or a zero reference yields a zero score.
pub(crate) fn deviation_verdict(
    label: &str,
    reference: f64,
    sd: f64,
    x: f64,
    cfg: &EngineConfig,
) -> Verdict {
    let deviation = (x - reference).abs();
    let (score, critical, warning, score_key) = match cfg.deviation_mode {
        DeviationMode::StdDev => {
            let s = if sd == 0.0 { 0.0 } else { deviation / sd };
            (s, cfg.zscore_threshold, cfg.zscore_warning, "deviationScore")
        }
        DeviationMode::Percent => {
            let s = if reference == 0.0 {
                0.0
            } else {
                deviation / reference.abs() * 100.0
            };
            (s, cfg.percent_threshold, cfg.percent_warning, "deviationPercent")
        }
    };

    let severity = grade(score, critical, warning);
    let status = format!("{label} deviation {score:.2} ({})", severity.as_str());
    Verdict::new(
        severity,
        details([
            (label_key(label), reference),
            ("deviation", deviation),
            (score_key, score),
            ("stdDev", sd),
        ]),
        status,
    )
}

fn label_key(label: &str) -> &'static str {
    match label {
        "ema" => "ema",
        _ => "movingAverage",
    }
}

pub fn evaluate(state: &EmaState, values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    deviation_verdict("ema", state.ema, stats::std_dev(values), x, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;

    #[test]
    fn test_update_seeds_then_smooths() {
        let mut s = EmaState::default();
        s.update(10.0, 0.5);
        assert_eq!(s.ema, 10.0);
        s.update(20.0, 0.5);
        assert_eq!(s.ema, 15.0);
    }

    #[test]
    fn test_percent_mode() {
        let cfg = EngineConfig {
            deviation_mode: DeviationMode::Percent,
            ..Default::default()
        };
        let state = EmaState {
            ema: 100.0,
            initialized: true,
        };
        let v = evaluate(&state, &[100.0, 130.0], 130.0, &cfg);
        assert_eq!(v.details["deviationPercent"], 30.0);
        assert_eq!(v.severity, Severity::Critical);

        let zero = EmaState {
            ema: 0.0,
            initialized: true,
        };
        let v = evaluate(&zero, &[0.0, 5.0], 5.0, &cfg);
        assert_eq!(v.details["deviationPercent"], 0.0);
        assert!(!v.is_anomaly);
    }
}
