//! Fixed engineering limits.

use crate::config::EngineConfig;

use super::{details, Severity, Verdict};

pub fn evaluate(x: f64, cfg: &EngineConfig) -> Verdict {
    let (min, max) = (cfg.min_threshold, cfg.max_threshold);
    let margin = cfg.warning_margin / 100.0;
    // Warning band width: a share of the range when both bounds exist,
    // otherwise a share of the bound's magnitude.
    let band = |bound: f64| match (min, max) {
        (Some(lo), Some(hi)) => (hi - lo) * margin,
        _ => bound.abs() * margin,
    };

    let (severity, status) = match (min, max) {
        (Some(lo), _) if x < lo => (Severity::Critical, format!("Below minimum threshold ({x} < {lo})")),
        (_, Some(hi)) if x > hi => (Severity::Critical, format!("Above maximum threshold ({x} > {hi})")),
        (_, Some(hi)) if x > hi - band(hi) => (Severity::Warning, format!("Approaching maximum threshold ({x} near {hi})")),
        (Some(lo), _) if x < lo + band(lo) => (Severity::Warning, format!("Approaching minimum threshold ({x} near {lo})")),
        _ => (Severity::Normal, "Within thresholds".to_string()),
    };

    let mut d = details([("value", x)]);
    if let Some(lo) = min {
        d.insert("minThreshold".into(), lo);
    }
    if let Some(hi) = max {
        d.insert("maxThreshold".into(), hi);
    }
    Verdict::new(severity, d, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig {
            min_threshold: Some(0.0),
            max_threshold: Some(100.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_bounds() {
        assert_eq!(evaluate(50.0, &cfg()).severity, Severity::Normal);
        let v = evaluate(150.0, &cfg());
        assert_eq!(v.severity, Severity::Critical);
        assert!(v.status_text.contains("Above"));
        let v = evaluate(-1.0, &cfg());
        assert!(v.status_text.contains("Below"));
    }

    #[test]
    fn test_warning_margin() {
        assert_eq!(evaluate(95.0, &cfg()).severity, Severity::Warning);
        assert_eq!(evaluate(5.0, &cfg()).severity, Severity::Warning);
        assert_eq!(evaluate(89.0, &cfg()).severity, Severity::Normal);
    }

    #[test]
    fn test_single_bound_uses_magnitude() {
        let cfg = EngineConfig {
            max_threshold: Some(200.0),
            ..Default::default()
        };
        assert_eq!(evaluate(185.0, &cfg).severity, Severity::Warning);
        assert_eq!(evaluate(-1e6, &cfg).severity, Severity::Normal);
    }
}
