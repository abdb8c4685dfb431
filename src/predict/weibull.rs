//! Weibull reliability model fitted from a single degradation trace.
//!
//! The shape comes from the window's coefficient of variation and the scale
//! from the reliability implied by the current degradation:
//!
//! ```text
//! beta = clamp(1 / CV, 0.5, 5)
//! R    = 1 - degradation
//! eta  = t / (-ln R)^(1/beta)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::stats;

const MIN_BETA: f64 = 0.5;
const MAX_BETA: f64 = 5.0;
/// Reliability at which the unit is considered failed.
pub const FAILURE_RELIABILITY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    InfantMortality,
    Random,
    WearOut,
}

impl FailureMode {
    pub fn from_beta(beta: f64) -> Self {
        if beta < 0.95 {
            FailureMode::InfantMortality
        } else if beta <= 1.05 {
            FailureMode::Random
        } else {
            FailureMode::WearOut
        }
    }
}

/// Shape and scale of `R(t) = exp(-(t/eta)^beta)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weibull {
    pub beta: f64,
    pub eta: f64,
}

impl Weibull {
    /// `None` unless both parameters are positive and finite.
    pub fn new(beta: f64, eta: f64) -> Option<Self> {
        if !beta.is_finite() || !eta.is_finite() || beta <= 0.0 || eta <= 0.0 {
            return None;
        }
        Some(Self { beta, eta })
    }

    /// Fits the model to a trace whose degradation fraction is `degradation`
    /// after `elapsed` time units.
    ///
    /// Returns `None` when the trace is degenerate: no spread, no elapsed
    /// time, or degradation outside `(0, 1)`.
    pub fn from_degradation(values: &[f64], degradation: f64, elapsed: f64) -> Option<Self> {
        let cv = stats::coefficient_of_variation(values);
        if !cv.is_finite() || cv <= 0.0 {
            return None;
        }
        if !(degradation > 0.0 && degradation < 1.0) || !(elapsed > 0.0) {
            return None;
        }
        let beta = (1.0 / cv).clamp(MIN_BETA, MAX_BETA);
        let reliability = 1.0 - degradation;
        let eta = elapsed / (-reliability.ln()).powf(1.0 / beta);
        Self::new(beta, eta)
    }

    pub fn reliability(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 1.0;
        }
        (-(t / self.eta).powf(self.beta)).exp()
    }

    pub fn hazard_rate(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        (self.beta / self.eta) * (t / self.eta).powf(self.beta - 1.0)
    }

    pub fn mttf(&self) -> f64 {
        self.eta * stats::gamma(1.0 + 1.0 / self.beta)
    }

    /// Solves `R(t) = p` for `t`.
    pub fn time_to_reliability(&self, p: f64) -> Option<f64> {
        if p <= 0.0 || p >= 1.0 {
            return None;
        }
        Some(self.eta * (-p.ln()).powf(1.0 / self.beta))
    }

    /// Time by which `fraction_failed` of a population has failed.
    pub fn b_life(&self, fraction_failed: f64) -> Option<f64> {
        if fraction_failed <= 0.0 || fraction_failed >= 1.0 {
            return None;
        }
        self.time_to_reliability(1.0 - fraction_failed)
    }
}

/// Weibull section of the RUL output. Times are in the RUL unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeibullEstimate {
    pub beta: f64,
    pub eta: f64,
    pub current_reliability: f64,
    pub hazard_rate: f64,
    pub mttf: f64,
    /// Keys `b1`, `b5`, `b10`, `b50`.
    pub b_life: BTreeMap<String, f64>,
    pub failure_mode: FailureMode,
}

impl WeibullEstimate {
    pub fn at(model: &Weibull, elapsed: f64) -> Self {
        let b_life = [("b1", 0.01), ("b5", 0.05), ("b10", 0.10), ("b50", 0.50)]
            .into_iter()
            .filter_map(|(key, p)| model.b_life(p).map(|t| (key.to_string(), t)))
            .collect();
        Self {
            beta: model.beta,
            eta: model.eta,
            current_reliability: model.reliability(elapsed),
            hazard_rate: model.hazard_rate(elapsed),
            mttf: model.mttf(),
            b_life,
            failure_mode: FailureMode::from_beta(model.beta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(Weibull::new(0.0, 1.0).is_none());
        assert!(Weibull::new(1.0, f64::INFINITY).is_none());
        assert!(Weibull::new(2.0, 100.0).is_some());
    }

    #[test]
    fn test_exponential_case() {
        let w = Weibull::new(1.0, 50.0).unwrap();
        assert!((w.mttf() - 50.0).abs() < 1e-8);
        assert!((w.hazard_rate(10.0) - 0.02).abs() < 1e-12);
        assert!((w.reliability(50.0) - (-1.0_f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_b_lives_are_ordered() {
        let w = Weibull::new(2.0, 100.0).unwrap();
        let b5 = w.b_life(0.05).unwrap();
        let b10 = w.b_life(0.10).unwrap();
        let b50 = w.b_life(0.50).unwrap();
        assert!(b5 < b10 && b10 < b50);
        assert!((w.reliability(b10) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_fit_reproduces_current_reliability() {
        let values = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let w = Weibull::from_degradation(&values, 0.3, 5.0).unwrap();
        assert!((MIN_BETA..=MAX_BETA).contains(&w.beta));
        assert!((w.reliability(5.0) - 0.7).abs() < 1e-9);
        let fail = w.time_to_reliability(FAILURE_RELIABILITY).unwrap();
        assert!(fail > 5.0);
    }

    #[test]
    fn test_degenerate_traces() {
        assert!(Weibull::from_degradation(&[5.0; 6], 0.3, 5.0).is_none());
        assert!(Weibull::from_degradation(&[1.0, 2.0], 0.0, 5.0).is_none());
        assert!(Weibull::from_degradation(&[1.0, 2.0], 0.5, 0.0).is_none());
    }

    #[test]
    fn test_failure_mode_bands() {
        assert_eq!(FailureMode::from_beta(0.6), FailureMode::InfantMortality);
        assert_eq!(FailureMode::from_beta(1.0), FailureMode::Random);
        assert_eq!(FailureMode::from_beta(3.0), FailureMode::WearOut);
    }
}
