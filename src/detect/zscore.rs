//! Standard-score detector over the current window.

use crate::analysis::stats;
use crate::config::EngineConfig;

use super::{details, grade, Verdict};

/// `z = (x − μ)/σ` against the window (which includes `x`); zero when σ = 0.
pub fn z_score(values: &[f64], x: f64) -> (f64, f64, f64) {
    let mean = stats::mean(values);
    let sd = stats::std_dev(values);
    let z = if sd == 0.0 { 0.0 } else { (x - mean) / sd };
    (z, mean, sd)
}

pub fn evaluate(values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    let (z, mean, sd) = z_score(values, x);
    let severity = grade(z.abs(), cfg.zscore_threshold, cfg.zscore_warning);
    let status = format!("z-score {z:.2} ({})", severity.as_str());
    Verdict::new(
        severity,
        details([
            ("zScore", z),
            ("mean", mean),
            ("stdDev", sd),
            ("lowerBound", mean - cfg.zscore_threshold * sd),
            ("upperBound", mean + cfg.zscore_threshold * sd),
        ]),
        status,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;

    #[test]
    fn test_outlier_is_critical() {
        let mut values = vec![10.0, 10.2, 9.8, 10.1, 9.9, 10.0, 10.1, 9.9];
        values.push(14.0);
        let cfg = EngineConfig {
            zscore_threshold: 2.5,
            ..Default::default()
        };
        // One outlier in nine samples caps |z| at 8/3.
        let v = evaluate(&values, 14.0, &cfg);
        assert_eq!(v.severity, Severity::Critical);
        assert!(v.details["zScore"] > 2.5);
    }

    #[test]
    fn test_constant_window_gives_zero() {
        let values = vec![5.0; 6];
        let v = evaluate(&values, 5.0, &EngineConfig::default());
        assert_eq!(v.details["zScore"], 0.0);
        assert!(!v.is_anomaly);
    }
}
