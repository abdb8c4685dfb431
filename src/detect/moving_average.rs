//! Deviation from the mean of the preceding window values.

use crate::analysis::stats;
use crate::config::EngineConfig;

use super::ema::deviation_verdict;
use super::Verdict;

/// `values` ends with `x`; the reference is everything before it.
pub fn evaluate(values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    let history = &values[..values.len().saturating_sub(1)];
    deviation_verdict(
        "movingAverage",
        stats::mean(history),
        stats::std_dev(history),
        x,
        cfg,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Severity;

    #[test]
    fn test_reference_excludes_current() {
        let values = [10.0, 12.0, 10.0, 12.0, 30.0];
        let v = evaluate(&values, 30.0, &EngineConfig::default());
        assert_eq!(v.details["movingAverage"], 11.0);
        assert_eq!(v.details["deviation"], 19.0);
        assert_eq!(v.details["deviationScore"], 19.0);
        assert_eq!(v.severity, Severity::Critical);
    }

    #[test]
    fn test_flat_history_short_circuits() {
        let v = evaluate(&[4.0, 4.0, 9.0], 9.0, &EngineConfig::default());
        assert_eq!(v.details["deviationScore"], 0.0);
        assert!(!v.is_anomaly);
    }
}
