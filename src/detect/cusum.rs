//! Two-sided tabular CUSUM on raw deviations.

use serde::{Deserialize, Serialize};

use crate::analysis::stats;
use crate::config::EngineConfig;

use super::{details, Severity, Verdict};

/// Upper and lower cumulative sums, both kept non-negative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CusumState {
    pub pos: f64,
    pub neg: f64,
}

impl CusumState {
    /// Accumulates one deviation and returns `max(S⁺, S⁻)`.
    pub fn accumulate(&mut self, deviation: f64, drift: f64) -> f64 {
        self.pos = (self.pos + deviation - drift).max(0.0);
        self.neg = (self.neg - deviation - drift).max(0.0);
        self.pos.max(self.neg)
    }
}

/// The sums restart only after a critical crossing, never on a warning.
pub fn evaluate(state: &mut CusumState, values: &[f64], x: f64, cfg: &EngineConfig) -> Verdict {
    let target = cfg.cusum_target.unwrap_or_else(|| stats::mean(values));
    let max = state.accumulate(x - target, cfg.cusum_drift);
    let (pos, neg) = (state.pos, state.neg);

    let (severity, status) = if max > cfg.cusum_threshold {
        *state = CusumState::default();
        let side = if pos >= neg { "upward" } else { "downward" };
        (
            Severity::Critical,
            format!("CUSUM {side} shift ({max:.3} > {})", cfg.cusum_threshold),
        )
    } else if max > cfg.cusum_warning {
        (Severity::Warning, format!("CUSUM drifting ({max:.3} > {})", cfg.cusum_warning))
    } else {
        (Severity::Normal, "CUSUM in control".to_string())
    };

    Verdict::new(
        severity,
        details([
            ("cusumPos", pos),
            ("cusumNeg", neg),
            ("cusumMax", max),
            ("target", target),
        ]),
        status,
    )
}
