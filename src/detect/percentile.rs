//! Empirical percentile bands over the window.

use crate::analysis::stats;
use crate::config::EngineConfig;

use super::{details, Severity, Verdict};

pub fn evaluate(values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    let sorted = stats::sorted(values);
    let low = stats::percentile(&sorted, cfg.percentile_low);
    let high = stats::percentile(&sorted, cfg.percentile_high);

    let (severity, status) = if x < low {
        (Severity::Critical, format!("Below P{} ({x:.3} < {low:.3})", cfg.percentile_low))
    } else if x > high {
        (Severity::Critical, format!("Above P{} ({x:.3} > {high:.3})", cfg.percentile_high))
    } else {
        (Severity::Normal, "Within percentile band".to_string())
    };

    Verdict::new(
        severity,
        details([("lowerPercentile", low), ("upperPercentile", high)]),
        status,
    )
}
