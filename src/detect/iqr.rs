//! Tukey fences from the window quartiles.

use crate::analysis::stats;
use crate::config::EngineConfig;

use super::{details, Severity, Verdict};

/// Warning fences sit at this fraction of the configured multiplier.
const WARNING_FACTOR: f64 = 0.8;

pub fn evaluate(values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    let sorted = stats::sorted(values);
    let Some(q) = stats::quartiles(&sorted) else {
        return Verdict::warmup(0, 4);
    };

    let m = cfg.iqr_multiplier;
    let lower = q.q1 - m * q.iqr;
    let upper = q.q3 + m * q.iqr;
    let warn_lower = q.q1 - WARNING_FACTOR * m * q.iqr;
    let warn_upper = q.q3 + WARNING_FACTOR * m * q.iqr;

    let (severity, status) = if x < lower {
        (Severity::Critical, format!("Below lower bound ({x:.3} < {lower:.3})"))
    } else if x > upper {
        (Severity::Critical, format!("Above upper bound ({x:.3} > {upper:.3})"))
    } else if x < warn_lower {
        (Severity::Warning, format!("Near lower bound ({x:.3} < {warn_lower:.3})"))
    } else if x > warn_upper {
        (Severity::Warning, format!("Near upper bound ({x:.3} > {warn_upper:.3})"))
    } else {
        (Severity::Normal, "Within bounds".to_string())
    };

    Verdict::new(
        severity,
        details([
            ("q1", q.q1),
            ("q3", q.q3),
            ("iqr", q.iqr),
            ("lowerBound", lower),
            ("upperBound", upper),
        ]),
        status,
    )
}
